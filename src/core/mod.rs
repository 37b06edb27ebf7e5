pub mod context;
pub mod debug_logger;
pub mod errors;
pub mod local;
pub mod target;
pub mod wait;

pub use context::{CancelHandle, WaitContext};
pub use errors::{BoxError, PermanentError, TargetError, WaitError};
pub use target::StrategyTarget;
