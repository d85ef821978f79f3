//! # Fare Negotiation Runtime
//!
//! The negotiation engine and its background machinery.
//!
//! - [`NegotiationEngine`]: the state machine behind every negotiation
//!   operation (offers, responses, counter-offers, cancellation, queries)
//! - [`BookingConverter`]: atomic accept-and-book
//! - [`ExpirySweeper`]: periodic expiry of lapsed offers
//! - [`ChannelNotificationSink`]: non-blocking outbound notification queue
//! - [`metrics`]: Prometheus metrics
//!
//! Storage is injected through the traits in `fare-negotiation-core`; use
//! `fare-negotiation-postgres` in production and `fare-negotiation-testing`
//! in tests.
//!
//! ## Example
//!
//! ```ignore
//! use fare_negotiation_runtime::{EngineConfig, EngineEnvironment, NegotiationEngine};
//!
//! let (sink, notifications) = ChannelNotificationSink::channel(1024);
//! let env = EngineEnvironment::from_backend(backend, Arc::new(sink), Arc::new(SystemClock));
//! let engine = Arc::new(NegotiationEngine::new(env, EngineConfig::default()));
//!
//! let (stop, stopped) = tokio::sync::watch::channel(false);
//! ExpirySweeper::new(engine.clone()).spawn(stopped);
//! ```

pub mod booking;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod notify;
pub mod sweeper;

pub use booking::BookingConverter;
pub use config::{ConfigError, EngineConfig};
pub use engine::{BulkRespondOutcome, Decision, EngineEnvironment, NegotiationEngine, OfferRequest};
pub use notify::ChannelNotificationSink;
pub use sweeper::ExpirySweeper;
