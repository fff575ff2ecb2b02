use std::collections::HashMap;

use parking_lot::Mutex;

/// The process-wide id of an output.
pub type OutputId = u32;

const FIRST_ID: OutputId = 1;

/// Hands out one [`OutputId`] per durable output key (uuid, EDID based name, connector name).
///
/// Ids are never reclaimed: an output which got unplugged gets its old id back once it
/// reappears.
#[derive(Debug)]
pub struct IdentityAssigner {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    next_id: OutputId,
    ids: HashMap<String, OutputId>,
}

impl Default for IdentityAssigner {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityAssigner {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: FIRST_ID,
                ids: HashMap::new(),
            }),
        }
    }

    pub fn get_or_assign(&self, durable_id: &str) -> OutputId {
        let mut inner = self.inner.lock();

        if let Some(&id) = inner.ids.get(durable_id) {
            return id;
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.ids.insert(durable_id.to_owned(), id);
        tracing::debug!("Assigned id {} to output '{}'", id, durable_id);

        id
    }

    pub fn lookup(&self, durable_id: &str) -> Option<OutputId> {
        self.inner.lock().ids.get(durable_id).copied()
    }
}
