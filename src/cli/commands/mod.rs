//! CLI command implementations

pub mod resolve;
pub mod targets;

pub use resolve::execute as resolve;
pub use targets::execute as targets;
