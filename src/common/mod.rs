//! Common module - shared building blocks
//!
//! Keyed registries back every "one handler per key" lookup in the crate
//! (adapter factories, transfer factories, scheduler callbacks, hook
//! callbacks).

pub mod keyed;
pub mod utils;

pub use keyed::KeyedRegistry;
pub use utils::{Timer, pluralize};
