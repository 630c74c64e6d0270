pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{load_config, parse_config};
pub use types::{Config, GlobalConfig, MetricsFormat, ServerEndpoint};
pub use validation::{validate_config, validate_endpoint, ValidationError};
