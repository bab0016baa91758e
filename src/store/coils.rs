//! Coil state store.
//!
//! Authoritative local map of coil address to last confirmed state. Every
//! tracked key was explicitly requested, either by the default range or by
//! an explicit load; the tracked set only ever changes wholesale through
//! [`CoilStateStore::replace_range`].

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use crate::coalesce::{coalesce_addresses, AddressRange};

#[derive(Debug, Default)]
pub struct CoilStateStore {
    states: RwLock<BTreeMap<u16, bool>>,
}

impl CoilStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the full address-to-state map.
    pub async fn snapshot(&self) -> BTreeMap<u16, bool> {
        self.states.read().await.clone()
    }

    /// Local state for `address`; untracked addresses read as `false`.
    pub async fn state(&self, address: u16) -> bool {
        self.states.read().await.get(&address).copied().unwrap_or(false)
    }

    pub async fn is_tracked(&self, address: u16) -> bool {
        self.states.read().await.contains_key(&address)
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    /// Number of coils currently on.
    pub async fn active_count(&self) -> usize {
        self.states.read().await.values().filter(|on| **on).count()
    }

    /// The single read window covering every tracked address, or
    /// `default_range` when nothing is tracked yet.
    pub async fn request_window(&self, default_range: AddressRange) -> AddressRange {
        let states = self.states.read().await;
        coalesce_addresses(states.keys().copied(), default_range)
    }

    /// Replace the entire tracked set with `start .. start + values.len()`.
    /// Values running past address 65535 are dropped, never wrapped.
    pub async fn replace_range(&self, start: u16, values: &[bool]) {
        let mut states = self.states.write().await;
        states.clear();
        for (i, value) in values.iter().enumerate() {
            if let Some(addr) = start.checked_add(i as u16) {
                states.insert(addr, *value);
            }
        }
    }

    /// Fold a coalesced response window back into the store. Response index
    /// `i` maps to address `start + i`; addresses fetched only because they
    /// fell inside the covering window are discarded, tracked addresses are
    /// updated in place.
    pub async fn apply_window(&self, start: u16, values: &[bool]) {
        let mut states = self.states.write().await;
        for (i, value) in values.iter().enumerate() {
            let Some(addr) = start.checked_add(i as u16) else {
                break;
            };
            if let Some(state) = states.get_mut(&addr) {
                *state = *value;
            }
        }
    }

    /// Commit a confirmed single-coil write.
    pub async fn commit(&self, address: u16, state: bool) {
        self.states.write().await.insert(address, state);
    }
}
