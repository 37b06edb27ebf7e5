pub mod cli;
pub mod config;
pub mod core;

pub use crate::core::wait::Strategy;
pub use crate::core::{StrategyTarget, WaitContext, WaitError};
