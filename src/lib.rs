pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod server;
pub mod services;
pub mod sse;
pub mod translate;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{BridgeError, ErrorKind, Result};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
