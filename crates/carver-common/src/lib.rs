//! Common types for Carver: errors, event channels, filter chains, and the
//! resource model shared by environments and services

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod infra;
pub mod mesh;
pub mod naming;
pub mod resources;
pub mod telemetry;

pub use config::{Preferences, PreferencesSource};
pub use error::Error;
pub use events::EventChannel;
pub use filter::FilterChain;
pub use infra::{
    Infrastructure, ProvisionRequest, RecordingInfrastructure, ResourceHandle, ResourceKind,
};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default listener port for HTTP, HTTP/2 and gRPC listeners
pub const DEFAULT_LISTENER_PORT: u16 = 80;
