//! Utility modules

pub mod abort;
pub mod backoff;
