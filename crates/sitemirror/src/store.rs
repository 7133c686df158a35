//! The run-scoped mapping from original resource URL to local path.
//!
//! One mutex guards the mapping, the path reservation set and the in-flight
//! set. The lock is never held across file system calls.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use crate::reference::ResourceUrl;

/// Read-only copy of the mapping, handed to the rewriter.
#[derive(Debug, Clone, Default)]
pub struct ResourceMapping {
    entries: HashMap<ResourceUrl, String>,
}

impl ResourceMapping {
    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(url).map(String::as_str)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceUrl, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }
}

impl FromIterator<(ResourceUrl, String)> for ResourceMapping {
    fn from_iter<I: IntoIterator<Item = (ResourceUrl, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<ResourceUrl, String>,
    reserved: HashSet<String>,
    in_flight: HashSet<ResourceUrl>,
}

/// Shared mapping store for one pipeline run.
#[derive(Debug, Default)]
pub struct MappingStore {
    state: Mutex<StoreState>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a mapping. Re-inserting the same pair is a no-op; an attempt to
    /// remap a URL to a different path is refused and the first mapping
    /// stays. Returns whether `url` now maps to `local_path`.
    pub fn put(&self, url: ResourceUrl, local_path: String) -> bool {
        let mut state = self.lock();
        if let Some(existing) = state.entries.get(&url) {
            if *existing == local_path {
                return true;
            }
            warn!(url = %url, existing = %existing, rejected = %local_path, "refusing to remap resource");
            return false;
        }
        state.reserved.insert(local_path.clone());
        state.entries.insert(url, local_path);
        true
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.lock().entries.get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn snapshot(&self) -> ResourceMapping {
        ResourceMapping {
            entries: self.lock().entries.clone(),
        }
    }

    /// Mark `url` as being downloaded. False when it is already mapped or
    /// another task holds it.
    pub fn claim(&self, url: &ResourceUrl) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(url) {
            return false;
        }
        state.in_flight.insert(url.clone())
    }

    /// Drop the in-flight mark, whatever the outcome.
    pub fn finish(&self, url: &ResourceUrl) {
        self.lock().in_flight.remove(url);
    }

    /// Take `candidate` (relative to `root`) if it is neither reserved in
    /// this run nor present on disk.
    ///
    /// Every file this run writes is reserved before it exists, so the
    /// reservation set alone arbitrates between tasks. The disk only holds
    /// files from outside the run and is checked with the lock released.
    pub fn try_reserve(&self, root: &Path, candidate: &str) -> bool {
        let reserved = self.lock().reserved.contains(candidate);
        if reserved || root.join(candidate).exists() {
            return false;
        }
        self.lock().reserved.insert(candidate.to_string())
    }

    /// Give back a reservation whose file was never written.
    pub fn release(&self, candidate: &str) {
        let mut state = self.lock();
        if !state.entries.values().any(|p| p == candidate) {
            state.reserved.remove(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn url(s: &str) -> ResourceUrl {
        ResourceUrl::parse(s).unwrap()
    }

    #[test]
    fn first_mapping_wins() {
        let store = MappingStore::new();
        let a = url("https://a.test/x.css");
        assert!(store.put(a.clone(), "css/x.css".into()));
        assert!(store.put(a.clone(), "css/x.css".into()));
        assert!(!store.put(a.clone(), "css/other.css".into()));
        assert_eq!(store.get(a.as_str()).as_deref(), Some("css/x.css"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn claim_excludes_mapped_and_in_flight() {
        let store = MappingStore::new();
        let a = url("https://a.test/x.css");
        assert!(store.claim(&a));
        assert!(!store.claim(&a));
        store.finish(&a);
        assert!(store.claim(&a));
        store.finish(&a);
        store.put(a.clone(), "css/x.css".into());
        assert!(!store.claim(&a));
    }

    #[test]
    fn reservation_checks_run_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/taken.png"), b"x").unwrap();

        let store = MappingStore::new();
        assert!(!store.try_reserve(dir.path(), "images/taken.png"));
        assert!(store.try_reserve(dir.path(), "images/free.png"));
        assert!(!store.try_reserve(dir.path(), "images/free.png"));
        store.release("images/free.png");
        assert!(store.try_reserve(dir.path(), "images/free.png"));
    }

    #[test]
    fn released_path_left_on_disk_stays_taken() {
        let dir = tempfile::tempdir().unwrap();
        let store = MappingStore::new();
        assert!(store.try_reserve(dir.path(), "js/app.js"));

        // A partial write leaves the file behind before the path is given back.
        std::fs::create_dir_all(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js/app.js"), b"par").unwrap();
        store.release("js/app.js");

        assert!(!store.try_reserve(dir.path(), "js/app.js"));
    }

    #[test]
    fn mapped_paths_are_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let store = MappingStore::new();
        store.put(url("https://a.test/logo.png"), "images/logo.png".into());
        assert!(!store.try_reserve(dir.path(), "images/logo.png"));
        store.release("images/logo.png");
        assert!(!store.try_reserve(dir.path(), "images/logo.png"));
    }

    #[test]
    fn concurrent_reservations_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MappingStore::new());
        let root = dir.path().to_path_buf();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let root = root.clone();
                std::thread::spawn(move || store.try_reserve(&root, "css/site.css"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn snapshot_is_detached() {
        let store = MappingStore::new();
        store.put(url("https://a.test/a.js"), "js/a.js".into());
        let snap = store.snapshot();
        store.put(url("https://a.test/b.js"), "js/b.js".into());
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get("https://a.test/a.js"), Some("js/a.js"));
    }
}
