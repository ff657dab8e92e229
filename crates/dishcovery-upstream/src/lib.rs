//! Upstream side of the Dishcovery voice relay.
//!
//! Defines the session contract every speech-service adapter implements
//! ([`UpstreamAdapter`] producing a direction-split [`UpstreamSession`]),
//! the adapter for the live speech service, a deterministic mock used when
//! no credentials are available, and the single-shot text chat client.
//!
//! The relay depends only on the contract, so the live adapter and the mock
//! are interchangeable at runtime.

pub mod chat;
pub mod config;
pub mod error;
pub mod live;
pub mod mock;
pub mod persona;
pub mod session;

pub use chat::{ChatBackend, GeminiChat, MockChat};
pub use config::GeminiConfig;
pub use error::UpstreamError;
pub use live::GeminiLiveAdapter;
pub use mock::{MockAdapter, MockProbe};
pub use session::{
    AudioSink, EventStream, GroundingTools, SessionConfig, UpstreamAdapter, UpstreamEvent,
    UpstreamHandle, UpstreamSession,
};
