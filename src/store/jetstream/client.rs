//! NATS JetStream client — connect, append, last-value lookup, live consumers

use super::config::{JetStreamConfig, StorageType};
use super::feed::JetStreamFeed;
use crate::codec;
use crate::error::{EventError, Result};
use crate::pattern::KeyPattern;
use crate::types::{Event, EventKey};
use async_nats::jetstream;
use async_nats::jetstream::stream::LastRawMessageErrorKind;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Idle time after which the server reaps a consumer whose feed vanished
const CONSUMER_INACTIVE_THRESHOLD: Duration = Duration::from_secs(60);

/// NATS JetStream client
///
/// Owns one NATS connection and the handle to the event stream. The
/// stream is a compacted log: with `max_messages_per_subject = 1` it
/// holds exactly the current value of every key.
pub struct JetStreamClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    /// Cloned into feeds so they can delete their consumer on close
    stream: jetstream::stream::Stream,
    config: Arc<JetStreamConfig>,
    shutdown_tx: watch::Sender<bool>,
}

impl JetStreamClient {
    /// Connect to NATS and make sure the event stream exists
    pub async fn connect(config: JetStreamConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| EventError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        let stream = ensure_stream(&jetstream, &config).await?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            client,
            jetstream,
            stream,
            config: Arc::new(config),
            shutdown_tx,
        })
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            return Err(EventError::Closed("NATS connection is shut down".to_string()));
        }
        Ok(())
    }

    /// Append an event to its key's subject and wait for the ack
    pub async fn publish(&self, event: &Event) -> Result<u64> {
        self.ensure_open()?;
        let payload = codec::encode(event)?;
        codec::check_size(event, &payload, self.config.max_payload_bytes)?;
        let subject = self.config.subject_for(&event.key);

        let ack = self
            .jetstream
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| EventError::Publish {
                key: event.key.to_string(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| EventError::Publish {
                key: event.key.to_string(),
                reason: format!("ack failed: {}", e),
            })?;

        tracing::debug!(
            event_id = %event.id,
            subject = %subject,
            sequence = ack.sequence,
            "Event published"
        );

        Ok(ack.sequence)
    }

    /// Most recent event on the key's subject, or the sentinel
    pub async fn last_value(&self, key: &EventKey) -> Result<Event> {
        self.ensure_open()?;
        let subject = self.config.subject_for(key);
        match self.stream.get_last_raw_message_by_subject(&subject).await {
            Ok(message) => codec::decode(&message.payload),
            Err(e) if e.kind() == LastRawMessageErrorKind::NoMessageFound => {
                Ok(Event::invalid_for(key.clone()))
            }
            Err(e) => Err(EventError::Stream(format!(
                "Failed to read last message on '{}': {}",
                subject, e
            ))),
        }
    }

    /// Create an ephemeral consumer that sees only messages published from now on
    pub async fn subscribe(
        &self,
        filter_subjects: Vec<String>,
        key_filter: Option<KeyPattern>,
    ) -> Result<JetStreamFeed> {
        self.ensure_open()?;
        let target = filter_subjects.join(",");

        let mut config = jetstream::consumer::pull::Config {
            deliver_policy: jetstream::consumer::DeliverPolicy::New,
            ack_policy: jetstream::consumer::AckPolicy::None,
            inactive_threshold: CONSUMER_INACTIVE_THRESHOLD,
            ..Default::default()
        };
        if filter_subjects.len() == 1 {
            config.filter_subject = target.clone();
        } else {
            config.filter_subjects = filter_subjects;
        }

        let consumer = self
            .stream
            .create_consumer(config)
            .await
            .map_err(|e| EventError::SubscriptionSetup {
                target: target.clone(),
                reason: format!("Failed to create ephemeral consumer: {}", e),
            })?;
        let consumer_name = consumer.cached_info().name.clone();

        let messages = consumer
            .messages()
            .await
            .map_err(|e| EventError::SubscriptionSetup {
                target: target.clone(),
                reason: e.to_string(),
            })?
            .map(|msg| {
                msg.map(|m| (m.message.subject.to_string(), m.message.payload))
                    .map_err(|e| e.to_string())
            })
            .boxed();

        tracing::debug!(consumer = %consumer_name, filter = %target, "JetStream feed created");

        Ok(JetStreamFeed::new(
            messages,
            consumer_name,
            self.stream.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
            key_filter,
        ))
    }

    /// Mark the connection closed and flush pending writes
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown_tx.send_replace(true) {
            return Ok(());
        }
        self.client
            .flush()
            .await
            .map_err(|e| EventError::Connection(format!("Flush on shutdown failed: {}", e)))?;
        tracing::info!(url = %self.config.url, "NATS connection shut down");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        !*self.shutdown_tx.borrow()
            && self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Get stream info
    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self.stream.clone();
        let info = stream
            .info()
            .await
            .map_err(|e| EventError::Stream(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }

    pub fn config(&self) -> &JetStreamConfig {
        &self.config
    }
}

/// Summary of stream state
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}

/// Build NATS connect options from config
fn build_connect_options(config: &JetStreamConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Ensure the JetStream stream exists with the correct configuration
async fn ensure_stream(
    js: &jetstream::Context,
    config: &JetStreamConfig,
) -> Result<jetstream::stream::Stream> {
    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.stream_subjects(),
        storage,
        max_messages_per_subject: config.max_messages_per_subject,
        retention: jetstream::stream::RetentionPolicy::Limits,
        allow_direct: true,
        ..Default::default()
    };

    let stream = js
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| EventError::Stream(format!(
            "Failed to create/get stream '{}': {}",
            config.stream_name, e
        )))?;

    tracing::info!(
        stream = %config.stream_name,
        subjects = ?config.stream_subjects(),
        max_messages_per_subject = config.max_messages_per_subject,
        "JetStream stream ready"
    );

    Ok(stream)
}
