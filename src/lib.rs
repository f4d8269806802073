//! # tmt-event
//!
//! Last-value event publish/subscribe for observatory control components.
//!
//! ## Overview
//!
//! Components publish timestamped parameter bundles ([`Event`]s) under
//! hierarchical keys (`wfos.red.detector.filterWheel`). A subscriber
//! first receives the current value of every key it asks for, or the
//! invalid-event sentinel if nothing was published yet, and then every
//! later update. Publish and subscribe order do not matter.
//!
//! ## Quick Start
//!
//! ```rust
//! use futures::StreamExt;
//! use tmt_event::{Event, EventName, EventService, EventServiceConfig, Prefix};
//!
//! # async fn example() -> tmt_event::Result<()> {
//! let service = EventService::connect(EventServiceConfig::memory()).await?;
//! let publisher = service.default_publisher();
//! let subscriber = service.default_subscriber();
//!
//! let event = Event::system(Prefix::parse("tcs.mount")?, EventName::new("azimuth")?)
//!     .with_param("degrees", 181.25);
//! publisher.publish(event.clone()).await?;
//!
//! let mut updates = subscriber.subscribe([event.key.clone()]);
//! assert_eq!(updates.next().await, Some(event));
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **memory** — in-process broker for tests and single-process use
//! - **redis** — keyspace model: `SET` + `PUBLISH` per event
//! - **jetstream** — log model: NATS JetStream, last message per subject
//!
//! ## Architecture
//!
//! - **EventStore** trait — the one seam every backend implements
//! - **EventPublisher** — single, streamed, and periodic publishing
//! - **EventSubscriber** — snapshot-then-live, pattern, and rate-adapted delivery
//! - **EventSubscription** — `ready()` and idempotent `unsubscribe()`
//! - **EventService** — builds publishers and subscribers from configuration

pub mod codec;
pub mod config;
pub mod error;
pub mod location;
pub mod pattern;
pub mod publisher;
pub mod rate;
pub mod service;
pub mod sink;
pub mod store;
pub mod subscriber;
pub mod subscription;
pub mod types;

// Re-export core types
pub use config::{BackendConfig, EventServiceConfig};
pub use error::{EventError, PublishFailure, Result};
pub use location::{Location, LocationResolver, StaticResolver};
pub use pattern::KeyPattern;
pub use publisher::{Cancellable, EventPublisher};
pub use rate::{Rate, RateBuffer, SubscriptionMode};
pub use service::EventService;
pub use sink::{AsyncCallbackSink, CallbackSink, ChannelSink, EventSink};
pub use store::{EventFeed, EventStore};
pub use subscriber::EventSubscriber;
pub use subscription::{EventSubscription, SubscriptionStream};
pub use types::{
    Event, EventCategory, EventKey, EventName, Parameter, Prefix, Subsystem, INVALID_EVENT_ID,
    INVALID_KEY,
};

// Re-export stores for convenience
pub use store::jetstream::{JetStreamClient, JetStreamConfig, JetStreamStore, StorageType};
pub use store::memory::{MemoryBroker, MemoryConfig, MemoryStore};
pub use store::redis::{RedisConfig, RedisStore};
