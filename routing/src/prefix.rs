//! Prefix lists: the set of root-anchored directory paths a repository is
//! known to have content under.
//!
//! Membership is decided on path segment boundaries, so an entry `/org/apache`
//! covers `/org/apache` and `/org/apache/maven/...` but never `/org/apache2`.

use crate::errors::RoutingError;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Normalizes a repository path to the form stored in a [`PrefixSet`]:
/// a leading `/`, no trailing `/` (except the root itself) and no empty segments.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    normalized
}

/// Number of segments in a normalized path; the root has depth zero.
pub fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Parent directory of a normalized path. The parent of a top level item is `/`.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Cuts a normalized path down to at most `depth` segments.
pub fn truncate_to_depth(path: &str, depth: usize) -> &str {
    if depth == 0 {
        return "/";
    }
    let mut seen = 0;
    for (idx, ch) in path.char_indices().skip(1) {
        if ch == '/' {
            seen += 1;
            if seen == depth {
                return &path[..idx];
            }
        }
    }
    path
}

/// Yields the proper ancestors of a normalized path, shallowest first,
/// excluding the root: `/a/b/c` yields `/a`, `/a/b`.
fn proper_ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .skip(1)
        .filter(|(_, ch)| *ch == '/')
        .map(move |(idx, _)| &path[..idx])
}

fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return candidate != "/";
    }
    candidate.len() > ancestor.len()
        && candidate.starts_with(ancestor)
        && candidate.as_bytes()[ancestor.len()] == b'/'
}

/// An ordered set of normalized path prefixes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixSet {
    entries: BTreeSet<String>,
}

impl PrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = PrefixSet::new();
        for entry in entries {
            set.insert(entry.as_ref());
        }
        set
    }

    /// Adds an entry verbatim (after normalization). Returns false if it was already present.
    pub fn insert(&mut self, entry: &str) -> bool {
        self.entries.insert(normalize_path(entry))
    }

    pub fn remove(&mut self, entry: &str) -> bool {
        self.entries.remove(&normalize_path(entry))
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains(entry)
    }

    /// True iff `path` equals a stored entry or lies below one.
    pub fn covers(&self, path: &str) -> bool {
        self.covering_entry(path).is_some()
    }

    /// The shallowest stored entry equal to or above `path`.
    pub fn covering_entry(&self, path: &str) -> Option<&str> {
        if let Some(root) = self.entries.get("/") {
            return Some(root.as_str());
        }
        let path = normalize_path(path);
        proper_ancestors(&path)
            .chain(std::iter::once(path.as_str()))
            .find_map(|candidate| self.entries.get(candidate))
            .map(|s| s.as_str())
    }

    /// Stored entries strictly below `path`.
    pub fn descendants_of(&self, path: &str) -> Vec<String> {
        let path = normalize_path(path);
        if path == "/" {
            return self.entries.iter().filter(|e| *e != "/").cloned().collect();
        }
        let lower = format!("{path}/");
        self.entries
            .range(lower.clone()..)
            .take_while(|e| e.starts_with(&lower))
            .filter(|e| is_descendant(e, &path))
            .cloned()
            .collect()
    }

    pub fn extend(&mut self, other: &PrefixSet) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.as_str())
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for PrefixSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        PrefixSet::from_entries(iter)
    }
}

/// Read contract over a prefix list, wherever it lives.
#[async_trait]
pub trait PrefixSource: Send + Sync {
    /// Whether the backing artifact exists at all.
    async fn exists(&self) -> bool;

    /// Whether the artifact exists and holds a usable list. Always false when `!exists()`.
    async fn supported(&self) -> bool;

    /// The entries, or `None` when the list does not exist or is unsupported.
    async fn read_entries(&self) -> Result<Option<Vec<String>>, RoutingError>;

    /// Millis since the epoch, or -1 when unknown.
    async fn last_modified_timestamp(&self) -> i64;
}

#[async_trait]
pub trait WritablePrefixSource: PrefixSource {
    /// Replaces the current content with the entries of `source`.
    async fn write_entries(&self, source: &dyn PrefixSource) -> Result<(), RoutingError>;

    /// Removes the artifact; `exists()` is false afterwards.
    async fn delete(&self) -> Result<(), RoutingError>;
}

/// A prefix list held in memory, produced by discovery or merging.
#[derive(Clone, Debug)]
pub struct ListPrefixSource {
    entries: PrefixSet,
    last_modified: i64,
}

impl ListPrefixSource {
    pub fn new(entries: PrefixSet) -> Self {
        Self::with_timestamp(entries, crate::now_millis())
    }

    pub fn with_timestamp(entries: PrefixSet, last_modified: i64) -> Self {
        ListPrefixSource {
            entries,
            last_modified,
        }
    }

    pub fn entries(&self) -> &PrefixSet {
        &self.entries
    }

    pub fn into_entries(self) -> PrefixSet {
        self.entries
    }
}

#[async_trait]
impl PrefixSource for ListPrefixSource {
    async fn exists(&self) -> bool {
        true
    }

    async fn supported(&self) -> bool {
        true
    }

    async fn read_entries(&self) -> Result<Option<Vec<String>>, RoutingError> {
        Ok(Some(self.entries.to_vec()))
    }

    async fn last_modified_timestamp(&self) -> i64 {
        self.last_modified
    }
}
