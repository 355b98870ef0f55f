use crate::value::{Address, Value};

/// Anything that can enumerate the references keeping objects alive.
///
/// Only non-null references are yielded. Addresses that no longer name a
/// live object are tolerated by the collector and simply skipped.
pub trait RootProvider {
    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = Address> + '_>;
}

/// An explicit, caller-managed collection of roots.
#[derive(Clone, Debug, Default)]
pub struct RootSet {
    roots: Vec<Address>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins `value` if it is a non-null reference; other values are ignored.
    pub fn add(&mut self, value: Value) {
        if let Some(address) = value.as_address() {
            self.roots.push(address);
        }
    }

    /// Drops one pin of `value`. Returns whether it was pinned.
    pub fn remove(&mut self, value: Value) -> bool {
        let Some(address) = value.as_address() else {
            return false;
        };
        match self.roots.iter().position(|&a| a == address) {
            Some(i) => {
                self.roots.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl RootProvider for RootSet {
    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = Address> + '_> {
        Box::new(self.roots.iter().copied())
    }
}
