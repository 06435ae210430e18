pub mod config;
pub mod observability;
pub mod runtime;

pub use config::{AppConfig, ConfigError, ServiceMode};
pub use observability::init_tracing;
pub use runtime::run;
