pub mod config;
pub mod error;
pub mod db;
pub mod model;
pub mod provider;
pub mod cache;
pub mod graph;
pub mod network;

pub use config::Config;
pub use error::{RelnetError, Result};
pub use network::{NetworkOrchestrator, NetworkRequest, NetworkResult, NetworkView};
