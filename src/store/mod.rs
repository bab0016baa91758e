//! Local state stores reconciling remote reads with confirmed writes.
//!
//! Both stores are owned by the engine and exposed outward only as cloned
//! snapshots plus change events; a renderer never mutates them.

mod coils;
mod registers;

pub use coils::CoilStateStore;
pub use registers::{RegisterSnapshot, RegisterWindow};
