use std::collections::{btree_map::Entry, BTreeMap};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::OutputId;

/// The region an output covers on the virtual screen. The origin is the top-left corner of
/// the virtual screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The current geometry of every enabled output.
#[derive(Debug, Default)]
pub struct TopologyStore {
    outputs: Mutex<BTreeMap<OutputId, Geometry>>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the stored geometry of `id` changed.
    ///
    /// The display server likes to repeat notifications, an upsert with the geometry which is
    /// already stored doesn't touch the store. An empty geometry removes the entry.
    pub fn upsert(&self, id: OutputId, geometry: Geometry) -> bool {
        if geometry.is_empty() {
            debug!("Output {} reported an empty geometry", id);
            return self.remove(id);
        }

        let mut outputs = self.outputs.lock();
        match outputs.entry(id) {
            Entry::Occupied(entry) if *entry.get() == geometry => false,
            Entry::Occupied(mut entry) => {
                debug!("Update output {}: {:?} -> {:?}", id, entry.get(), geometry);
                entry.insert(geometry);
                true
            }
            Entry::Vacant(entry) => {
                debug!("Add output {}: {:?}", id, geometry);
                entry.insert(geometry);
                true
            }
        }
    }

    /// Returns `true` if there was an entry to remove.
    pub fn remove(&self, id: OutputId) -> bool {
        let removed = self.outputs.lock().remove(&id);
        if let Some(geometry) = removed {
            debug!("Remove output {}: {:?}", id, geometry);
        }
        removed.is_some()
    }

    pub fn get(&self, id: OutputId) -> Option<Geometry> {
        self.outputs.lock().get(&id).copied()
    }

    /// A copy of the whole store, ordered by id.
    pub fn snapshot(&self) -> Vec<(OutputId, Geometry)> {
        self.outputs
            .lock()
            .iter()
            .map(|(&id, &geometry)| (id, geometry))
            .collect()
    }

    pub fn ids(&self) -> Vec<OutputId> {
        self.outputs.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.lock().is_empty()
    }
}
