//! Who still draws a shared mesh.
//!
//! The ledger maps a mesh source to the names of the live instances sharing
//! its buffers. A source only appears once a second instance starts sharing
//! it; a lone instance is not tracked. When the last registered name goes,
//! the entry goes too and the caller may free the buffers.

use std::collections::{BTreeSet, HashMap};

use crate::data_structures::geometry::SourceId;

/// Outcome of [`ResourceLedger::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// Other instances still share the source; keep the buffers.
    Retained,
    /// This was the last registered instance; the buffers may be freed.
    LastReference,
    /// The source is not shared at all, so the caller is the sole owner.
    Untracked,
}

impl Release {
    pub fn frees_buffers(self) -> bool {
        !matches!(self, Release::Retained)
    }
}

#[derive(Debug, Default)]
pub struct ResourceLedger {
    holders: HashMap<SourceId, BTreeSet<String>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `original` and `duplicate` share the buffers of `source`.
    pub fn register_duplicate(&mut self, source: &SourceId, original: &str, duplicate: &str) {
        let names = self.holders.entry(source.clone()).or_default();
        names.insert(original.to_string());
        names.insert(duplicate.to_string());
        log::debug!("{source} now shared by {names:?}");
    }

    /// Moves `old` to `new` within the entry of `source`. Returns whether
    /// `old` was registered.
    pub fn rename(&mut self, source: &SourceId, old: &str, new: &str) -> bool {
        let Some(names) = self.holders.get_mut(source) else {
            return false;
        };
        if !names.remove(old) {
            return false;
        }
        names.insert(new.to_string());
        true
    }

    /// Drops `name` from `source` and says whether the buffers may be freed.
    pub fn release(&mut self, source: &SourceId, name: &str) -> Release {
        let Some(names) = self.holders.get_mut(source) else {
            return Release::Untracked;
        };
        if !names.remove(name) {
            // shared source, but this name never registered: it can't own the buffers
            log::warn!("{name} is not registered for {source}, keeping buffers");
            return Release::Retained;
        }
        if names.is_empty() {
            self.holders.remove(source);
            log::debug!("{source} released by its last holder {name}");
            Release::LastReference
        } else {
            Release::Retained
        }
    }

    pub fn holders(&self, source: &SourceId) -> Option<&BTreeSet<String>> {
        self.holders.get(source)
    }

    pub fn is_tracked(&self, source: &SourceId) -> bool {
        self.holders.contains_key(source)
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }
}
