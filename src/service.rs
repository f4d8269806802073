//! Event service factory
//!
//! Builds publishers and subscribers for the configured backend. The
//! default publisher and subscriber share one connection; `make_new_*`
//! opens a dedicated connection that can be shut down on its own.

use crate::config::{BackendConfig, EventServiceConfig};
use crate::error::Result;
use crate::location::LocationResolver;
use crate::publisher::EventPublisher;
use crate::store::{EventStore, JetStreamConfig, JetStreamStore, MemoryBroker, RedisConfig, RedisStore};
use crate::subscriber::EventSubscriber;
use std::sync::Arc;

/// Connection recipe after location resolution
enum Backend {
    Memory(MemoryBroker),
    Redis(RedisConfig),
    JetStream(JetStreamConfig),
}

/// Entry point: one configured backend, any number of publishers and subscribers
pub struct EventService {
    backend: Backend,
    default_store: Arc<dyn EventStore>,
}

impl EventService {
    /// Connect using the URL in the backend config
    pub async fn connect(config: EventServiceConfig) -> Result<Self> {
        let backend = match config.backend {
            BackendConfig::Memory(memory) => Backend::Memory(MemoryBroker::new(memory)),
            BackendConfig::Redis(redis) => Backend::Redis(redis),
            BackendConfig::Jetstream(js) => Backend::JetStream(js),
        };
        Self::start(backend).await
    }

    /// Connect to wherever `resolver` says the service lives
    ///
    /// Resolution failures are returned as construction errors.
    pub async fn connect_with(config: EventServiceConfig, resolver: &dyn LocationResolver) -> Result<Self> {
        let backend = match config.backend {
            BackendConfig::Memory(memory) => Backend::Memory(MemoryBroker::new(memory)),
            BackendConfig::Redis(mut redis) => {
                let location = resolver.resolve(&config.service_name).await?;
                redis.url = format!("redis://{}", location);
                Backend::Redis(redis)
            }
            BackendConfig::Jetstream(mut js) => {
                let location = resolver.resolve(&config.service_name).await?;
                js.url = format!("nats://{}", location);
                Backend::JetStream(js)
            }
        };
        Self::start(backend).await
    }

    /// Service over an existing in-process broker
    pub fn from_broker(broker: MemoryBroker) -> Self {
        let default_store: Arc<dyn EventStore> = Arc::new(broker.connect());
        Self {
            backend: Backend::Memory(broker),
            default_store,
        }
    }

    async fn start(backend: Backend) -> Result<Self> {
        let default_store = open_store(&backend).await?;
        tracing::info!(backend = default_store.name(), "Event service started");
        Ok(Self {
            backend,
            default_store,
        })
    }

    /// Publisher on the shared connection
    pub fn default_publisher(&self) -> EventPublisher {
        EventPublisher::new(self.default_store.clone())
    }

    /// Subscriber on the shared connection
    pub fn default_subscriber(&self) -> EventSubscriber {
        EventSubscriber::new(self.default_store.clone())
    }

    /// Publisher on its own connection
    pub async fn make_new_publisher(&self) -> Result<EventPublisher> {
        Ok(EventPublisher::new(open_store(&self.backend).await?))
    }

    /// Subscriber on its own connection
    pub async fn make_new_subscriber(&self) -> Result<EventSubscriber> {
        Ok(EventSubscriber::new(open_store(&self.backend).await?))
    }

    pub fn backend_name(&self) -> &str {
        self.default_store.name()
    }

    /// Shut down the shared connection
    pub async fn shutdown(&self) -> Result<()> {
        self.default_store.shutdown().await
    }
}

async fn open_store(backend: &Backend) -> Result<Arc<dyn EventStore>> {
    let store: Arc<dyn EventStore> = match backend {
        Backend::Memory(broker) => Arc::new(broker.connect()),
        Backend::Redis(config) => Arc::new(RedisStore::connect(config.clone()).await?),
        Backend::JetStream(config) => Arc::new(JetStreamStore::connect(config.clone()).await?),
    };
    Ok(store)
}
