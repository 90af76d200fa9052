//! Incremental maintenance of a hosted repository's published prefix list.
//!
//! Offering adds the (depth limited) directory of a stored item unless an
//! existing entry already covers it, and drops entries the new one subsumes.
//! Revoking removes an entry only once local storage holds nothing under it.

use crate::discovery::child_path;
use crate::prefix::{PrefixSet, normalize_path, parent_path, path_depth, truncate_to_depth};
use crate::storage::LocalStorage;

#[derive(Clone, Debug)]
pub struct PrefixModifier {
    depth: usize,
}

impl PrefixModifier {
    pub fn new(depth: usize) -> Self {
        PrefixModifier { depth }
    }

    /// The entry standing for an item: its directory cut to the configured depth,
    /// or the item itself when it sits directly under the root.
    pub fn entry_for(&self, item_path: &str) -> String {
        let path = normalize_path(item_path);
        if path_depth(&path) <= 1 {
            return path;
        }
        truncate_to_depth(parent_path(&path), self.depth).to_string()
    }

    /// Returns whether `entries` changed.
    pub fn offer(&self, entries: &mut PrefixSet, item_path: &str) -> bool {
        let entry = self.entry_for(item_path);
        if entries.covers(&entry) {
            return false;
        }
        for subsumed in entries.descendants_of(&entry) {
            entries.remove(&subsumed);
        }
        entries.insert(&entry)
    }

    /// Returns whether `entries` changed. Entries are kept when storage cannot be read.
    pub async fn revoke(
        &self,
        entries: &mut PrefixSet,
        item_path: &str,
        storage: &dyn LocalStorage,
    ) -> bool {
        let entry = self.entry_for(item_path);
        let mut candidates = entries.descendants_of(&entry);
        if let Some(covering) = entries.covering_entry(&entry) {
            candidates.push(covering.to_string());
        }

        let mut changed = false;
        for candidate in candidates {
            if !has_content_under(storage, &candidate).await {
                changed |= entries.remove(&candidate);
            }
        }
        changed
    }
}

/// Whether a visible file exists at or below `path`.
async fn has_content_under(storage: &dyn LocalStorage, path: &str) -> bool {
    match storage.retrieve(path).await {
        Ok(Some(_)) => return true,
        Ok(None) => {}
        Err(_) => return true,
    }
    let mut pending = vec![path.to_string()];
    while let Some(dir) = pending.pop() {
        let children = match storage.list(&dir).await {
            Ok(children) => children,
            Err(e) => {
                tracing::debug!(path = %dir, "Could not list local storage, keeping entry: {e}");
                return true;
            }
        };
        for child in children.into_iter().filter(|c| !c.is_hidden()) {
            if !child.is_dir {
                return true;
            }
            pending.push(child_path(&dir, &child.name));
        }
    }
    false
}
