// SPDX-License-Identifier: MIT

//! Local session slot table.
//!
//! Maps a service-assigned download id to the callbacks registered for it.
//! The table is pure data with a small fixed capacity; callers must hold the
//! client's session lock for every access. Capacity overflow is a visible
//! error, never a silent drop or a grow.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::{DownloadId, ProgressCallback, StateCallback};

/// Maximum number of concurrently bound sessions per client.
pub(crate) const MAX_SESSIONS: usize = 5;

/// One bound session: its id plus whatever callbacks are registered.
#[derive(Default)]
pub(crate) struct Slot {
    pub state_cb: Option<Arc<StateCallback>>,
    pub progress_cb: Option<Arc<ProgressCallback>>,
}

/// Fixed-capacity table of (download id, slot) entries.
///
/// A download id appears in at most one entry; ids are always positive, so
/// `None` marks a free entry.
pub(crate) struct SlotTable {
    entries: [Option<(DownloadId, Slot)>; MAX_SESSIONS],
}

impl SlotTable {
    pub fn new() -> Self {
        SlotTable {
            entries: std::array::from_fn(|_| None),
        }
    }

    /// Linear scan for the entry bound to `id`. O(capacity) is fine at this
    /// size.
    pub fn find(&self, id: DownloadId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, Some((bound, _)) if *bound == id))
    }

    /// Return the index bound to `id`, binding the first free entry if the
    /// id has none yet.
    pub fn allocate(&mut self, id: DownloadId) -> Result<usize> {
        if let Some(index) = self.find(id) {
            return Ok(index);
        }
        match self.entries.iter().position(Option::is_none) {
            Some(index) => {
                self.entries[index] = Some((id, Slot::default()));
                Ok(index)
            }
            None => Err(Error::TooManyDownloads(MAX_SESSIONS)),
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.iter().all(Option::is_some)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.entries.get_mut(index)?.as_mut().map(|(_, slot)| slot)
    }

    /// Free the entry bound to `id`, dropping its callbacks. A no-op for
    /// unbound ids.
    pub fn clear(&mut self, id: DownloadId) {
        if let Some(index) = self.find(id) {
            self.entries[index] = None;
        }
    }

    /// Drop every binding. Used when the connection is torn down; callbacks
    /// are not re-armed automatically after a reconnect.
    pub fn clear_all(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
    }

    /// Snapshot the callbacks registered for `id` so they can be invoked
    /// without holding the session lock.
    pub fn callbacks(
        &self,
        id: DownloadId,
    ) -> Option<(Option<Arc<StateCallback>>, Option<Arc<ProgressCallback>>)> {
        let index = self.find(id)?;
        self.entries[index]
            .as_ref()
            .map(|(_, slot)| (slot.state_cb.clone(), slot.progress_cb.clone()))
    }
}

#[cfg(test)]
#[path = "slots_tests.rs"]
mod tests;
