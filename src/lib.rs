pub mod app;
pub mod clock;
pub mod codec;
mod config;
mod connector;
mod error;
mod local;
mod logger;
pub mod output;
pub mod protocol;
mod remote;
pub mod transport;
mod types;

pub use config::{Configuration, OutputFormat};
pub use connector::Connector;
pub use error::{Error, ErrorKind, Result};
pub use local::{
    detect_peer_identity, LocalConnector, LocalConnectorBuilder, LocalState, PairingPolicy,
    DEFAULT_DISCOVERY_ATTEMPTS, DEFAULT_DISCOVERY_TIMEOUT,
};
pub use remote::{RemoteConnector, RemoteConnectorBuilder, DEFAULT_PORTAL_URL};
pub use transport::{RetryPolicy, SleepFn, SleepFuture};
pub use types::*;
