//! Utility classes

pub mod logging;
pub mod task;
