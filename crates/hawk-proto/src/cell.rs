use parking_lot::Mutex;

/// Single-slot shared cell: holds the most recently published value.
///
/// A publish overwrites whatever was there (never queues) and a snapshot hands
/// back a clone, so a slow reader can never stall a writer and always sees
/// the freshest value. Neither operation waits for a new value.
#[derive(Debug)]
pub struct LatestCell<T> {
    slot: Mutex<Slot<T>>,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    // bumped on every publish; lets readers tell a fresh value from a stale one
    version: u64,
}

impl<T: Clone> LatestCell<T> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(Slot { value: None, version: 0 }) }
    }

    pub fn publish(&self, value: T) {
        let mut slot = self.slot.lock();
        slot.value = Some(value);
        slot.version = slot.version.wrapping_add(1);
    }

    pub fn snapshot(&self) -> Option<T> {
        self.slot.lock().value.clone()
    }

    /// Snapshot together with the publish counter it was taken at.
    pub fn snapshot_versioned(&self) -> (Option<T>, u64) {
        let slot = self.slot.lock();
        (slot.value.clone(), slot.version)
    }

    pub fn version(&self) -> u64 {
        self.slot.lock().version
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().value.is_none()
    }
}

impl<T: Clone> Default for LatestCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
