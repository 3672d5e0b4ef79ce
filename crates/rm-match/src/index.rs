//! Reference index: feature sets of the original files, keyed by identity
//!
//! Internally synchronized with a `parking_lot::RwLock` so the worker can
//! grow it while a front end reads or renames entries.

use crate::error::{MatchError, MatchResult};
use crate::features::FeatureSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One reference file
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    /// Base name of the source file
    pub identity: String,

    /// Shared, immutable fingerprint
    pub features: Arc<FeatureSet>,

    /// Untrimmed duration in seconds (0.0 = unknown)
    pub duration: f64,

    /// Source path
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct IndexInner {
    entries: Vec<ReferenceEntry>,
    positions: HashMap<String, usize>,
}

impl IndexInner {
    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.identity.clone(), i))
            .collect();
    }
}

/// Insertion-ordered reference collection
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    inner: RwLock<IndexInner>,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of a reference file: its base name
    pub fn identity_for<P: AsRef<Path>>(path: P) -> String {
        let path = path.as_ref();
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    /// Insert or replace an entry; returns true when an entry was replaced
    ///
    /// A replaced entry keeps its position in iteration order.
    pub fn add(
        &self,
        identity: impl Into<String>,
        features: impl Into<Arc<FeatureSet>>,
        duration: f64,
        path: impl Into<PathBuf>,
    ) -> bool {
        let entry = ReferenceEntry {
            identity: identity.into(),
            features: features.into(),
            duration,
            path: path.into(),
        };

        let mut inner = self.inner.write();
        match inner.positions.get(&entry.identity).copied() {
            Some(slot) => {
                log::warn!(
                    "Reference identity collision: {} ({} replaces {})",
                    entry.identity,
                    entry.path.display(),
                    inner.entries[slot].path.display()
                );
                inner.entries[slot] = entry;
                true
            }
            None => {
                let slot = inner.entries.len();
                inner.positions.insert(entry.identity.clone(), slot);
                inner.entries.push(entry);
                false
            }
        }
    }

    /// Insert an entry keyed by the base name of `path`
    pub fn add_file(&self, path: &Path, features: impl Into<Arc<FeatureSet>>, duration: f64) -> bool {
        self.add(Self::identity_for(path), features, duration, path)
    }

    pub fn get(&self, identity: &str) -> Option<ReferenceEntry> {
        let inner = self.inner.read();
        inner
            .positions
            .get(identity)
            .map(|&slot| inner.entries[slot].clone())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.inner.read().positions.contains_key(identity)
    }

    /// Re-key an entry and update its path in one step
    ///
    /// Renaming onto another existing identity replaces that entry; the
    /// renamed entry keeps its own position.
    pub fn rename(&self, old: &str, new: impl Into<String>, new_path: impl Into<PathBuf>) -> MatchResult<()> {
        let new = new.into();
        let new_path = new_path.into();

        let mut inner = self.inner.write();
        let slot = inner
            .positions
            .get(old)
            .copied()
            .ok_or_else(|| MatchError::UnknownReference(old.to_string()))?;

        let displaced = if new != old {
            inner.positions.get(&new).copied()
        } else {
            None
        };

        let slot = match displaced {
            Some(existing) => {
                log::warn!("Rename {} -> {} replaces an existing reference", old, new);
                inner.entries.remove(existing);
                if existing < slot { slot - 1 } else { slot }
            }
            None => slot,
        };

        let entry = &mut inner.entries[slot];
        entry.identity = new;
        entry.path = new_path;
        inner.reindex();
        Ok(())
    }

    /// Remove an entry, returning it
    pub fn remove(&self, identity: &str) -> Option<ReferenceEntry> {
        let mut inner = self.inner.write();
        let slot = inner.positions.get(identity).copied()?;
        let entry = inner.entries.remove(slot);
        inner.reindex();
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Identities in insertion order
    pub fn identities(&self) -> Vec<String> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|e| e.identity.clone())
            .collect()
    }

    /// Ordered copy of the entries; feature data is shared, not cloned
    pub fn snapshot(&self) -> Vec<ReferenceEntry> {
        self.inner.read().entries.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.positions.clear();
    }
}
