//! Shared data-types and utility methods go here.

pub mod address;
pub mod shared_box;
pub mod uuid;
