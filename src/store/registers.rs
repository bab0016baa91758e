//! Register snapshot.
//!
//! Holds the most recent contiguous register read. Each successful read
//! replaces the window wholesale; there is never a partial merge, which
//! keeps renderer-side diffing a plain address-by-address comparison.

use tokio::sync::RwLock;

/// One contiguous read result: addresses `start .. start + values.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWindow {
    pub start: u16,
    pub values: Vec<u16>,
}

impl RegisterWindow {
    pub fn new(start: u16, values: Vec<u16>) -> Self {
        Self { start, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(address, value)` pairs, addresses strictly increasing by one.
    /// Stops at address 65535; values past it are not addressable.
    pub fn entries(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(move |(i, v)| self.start.checked_add(i as u16).map(|addr| (addr, *v)))
    }

    pub fn value_at(&self, address: u16) -> Option<u16> {
        if address < self.start {
            return None;
        }
        self.values.get((address - self.start) as usize).copied()
    }

    /// Addresses whose value differs from `previous`, including addresses
    /// absent from it. Renderer-side diff helper.
    pub fn changed_since(&self, previous: &RegisterWindow) -> Vec<u16> {
        self.entries()
            .filter(|(addr, value)| previous.value_at(*addr) != Some(*value))
            .map(|(addr, _)| addr)
            .collect()
    }
}

/// Holder for the latest window, owned by the engine.
#[derive(Debug, Default)]
pub struct RegisterSnapshot {
    window: RwLock<Option<RegisterWindow>>,
}

impl RegisterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the window wholesale.
    pub async fn replace(&self, window: RegisterWindow) {
        *self.window.write().await = Some(window);
    }

    pub async fn window(&self) -> Option<RegisterWindow> {
        self.window.read().await.clone()
    }

    pub async fn clear(&self) {
        *self.window.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_pair_addresses_with_values() {
        let window = RegisterWindow::new(4, vec![10, 20, 30]);
        let entries: Vec<(u16, u16)> = window.entries().collect();
        assert_eq!(entries, vec![(4, 10), (5, 20), (6, 30)]);
    }

    #[test]
    fn entries_stop_at_the_last_address() {
        let window = RegisterWindow::new(65534, vec![1, 2, 3]);
        let entries: Vec<(u16, u16)> = window.entries().collect();
        assert_eq!(entries, vec![(65534, 1), (65535, 2)]);
    }

    #[test]
    fn value_at_respects_window_bounds() {
        let window = RegisterWindow::new(4, vec![10, 20, 30]);
        assert_eq!(window.value_at(5), Some(20));
        assert_eq!(window.value_at(3), None);
        assert_eq!(window.value_at(7), None);
    }

    #[test]
    fn changed_since_reports_differing_and_new_addresses() {
        let old = RegisterWindow::new(0, vec![1, 2, 3, 4]);
        let new = RegisterWindow::new(0, vec![1, 9, 3, 4]);
        assert_eq!(new.changed_since(&old), vec![1]);

        let shifted = RegisterWindow::new(2, vec![3, 4, 5]);
        // Address 4 is new relative to `old`, address 2 and 3 are unchanged.
        assert_eq!(shifted.changed_since(&old), vec![4]);
    }

    #[tokio::test]
    async fn replace_is_wholesale() {
        let snapshot = RegisterSnapshot::new();
        assert!(snapshot.window().await.is_none());

        snapshot.replace(RegisterWindow::new(0, vec![1, 2, 3, 4])).await;
        snapshot.replace(RegisterWindow::new(100, vec![7])).await;

        let window = snapshot.window().await.unwrap();
        assert_eq!(window.start, 100);
        assert_eq!(window.values, vec![7]);
    }
}
