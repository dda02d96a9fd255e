//! Utility modules
//!
//! - `intern`: shared `Arc<str>` storage for event names

mod intern;

pub use intern::{intern, Interner};
