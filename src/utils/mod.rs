pub mod clock;
pub mod errors;
pub mod logging;
pub mod metrics;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use errors::{ToolGateError, ToolGateResult};
pub use logging::{init_logging, LogFormat};
pub use metrics::MetricsCollector;
