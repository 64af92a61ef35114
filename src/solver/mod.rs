//! The two schedulers built on the shared assignment engine.

pub mod exam;
pub mod invigilation;
