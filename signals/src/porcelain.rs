//! User-facing subscription helpers layered over the node types.

pub mod subscribe;

pub use subscribe::*;
