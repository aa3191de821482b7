use arc_swap::ArcSwap;
use log::{debug, error, info, warn};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::storage::patterns::{PatternList, matches_at_start};

/// Immutable view of the share tree, flattened by file name.
///
/// Directory names and directory paths end with `/`. Paths always use `/`
/// as separator and start with [`IndexSnapshot::root`].
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    root: String,
    entries: Vec<(String, Vec<String>)>,
}

impl IndexSnapshot {
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root_prefix(root).unwrap_or_default(),
            entries: Vec::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .binary_search_by(|(key, _)| key.as_str().cmp(name))
            .ok()
            .map(|i| self.entries[i].1.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// `path` relative to the indexed root.
    pub fn relative<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.root.as_str()).unwrap_or(path)
    }
}

fn root_prefix(root: &Path) -> Option<String> {
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    let mut prefix = absolute.to_str()?.to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    Some(prefix)
}

/// Walk `root` and build a fresh snapshot.
///
/// Hidden entries are skipped together with their subtrees. A symlinked
/// directory is followed only if its canonical target has not been entered
/// yet, so symlink cycles terminate. Errors only cost the entry or subtree
/// they occur in.
pub fn build_index(root: &Path, hidden: &PatternList) -> IndexSnapshot {
    let Some(prefix) = root_prefix(root) else {
        error!("Share root {:?} is not valid unicode, index stays empty", root);
        return IndexSnapshot::default();
    };

    let mut index = BTreeMap::new();
    let mut visited = HashSet::new();
    match fs::canonicalize(root) {
        Ok(real) => {
            visited.insert(real);
        }
        Err(e) => {
            warn!("Cannot resolve share root {:?}: {}", root, e);
            return IndexSnapshot {
                root: prefix,
                entries: Vec::new(),
            };
        }
    }

    walk(root, &prefix, hidden, &mut index, &mut visited);

    IndexSnapshot {
        root: prefix,
        entries: index.into_iter().collect(),
    }
}

fn walk(
    dir: &Path,
    dir_str: &str,
    hidden: &PatternList,
    index: &mut BTreeMap<String, Vec<String>>,
    visited: &mut HashSet<PathBuf>,
) {
    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Error while listing {:?}: {}", dir, e);
                    None
                }
            })
            .collect(),
        Err(e) => {
            debug!("Cannot index {:?}: {}", dir, e);
            return;
        }
    };
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!("Skipping undecodable file name {:?} in {:?}", file_name, dir);
            continue;
        };
        if hidden.matches_any(name) {
            continue;
        }

        let path = entry.path();
        // Follows symlinks on purpose: a link to a directory is a directory.
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        if metadata.is_dir() {
            let dir_path = format!("{}{}/", dir_str, name);
            index
                .entry(format!("{}/", name))
                .or_default()
                .push(dir_path.clone());

            let is_link = entry.file_type().is_ok_and(|kind| kind.is_symlink());
            match fs::canonicalize(&path) {
                Ok(real) => {
                    // Real directories are always walked, links only once
                    // per target.
                    if visited.insert(real) || !is_link {
                        walk(&path, &dir_path, hidden, index, visited);
                    } else {
                        debug!("Not following {:?} again", path);
                    }
                }
                Err(e) => debug!("Cannot resolve {:?}: {}", path, e),
            }
        } else {
            index
                .entry(name.to_string())
                .or_default()
                .push(format!("{}{}", dir_str, name));
        }
    }
}

struct Shared {
    root: ArcSwap<PathBuf>,
    snapshot: ArcSwap<IndexSnapshot>,
    hidden: PatternList,
    max_results: usize,
    ready: watch::Sender<bool>,
    wake: Notify,
    requested: AtomicU64,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Periodically rebuilt name index of the share tree.
///
/// Readers never lock: the current snapshot is swapped in atomically once a
/// rebuild is complete. Searches wait until a snapshot has been published
/// after the most recent [`FileIndex::request_update`].
#[derive(Clone)]
pub struct FileIndex {
    shared: Arc<Shared>,
    task: Option<Arc<AbortOnDrop>>,
}

impl FileIndex {
    /// An index with an empty snapshot and no background task yet.
    pub fn new(root: PathBuf, hidden: PatternList, max_results: usize) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                snapshot: ArcSwap::from_pointee(IndexSnapshot::empty(&root)),
                root: ArcSwap::from_pointee(root),
                hidden,
                max_results,
                ready,
                wake: Notify::new(),
                requested: AtomicU64::new(0),
            }),
            task: None,
        }
    }

    /// Create the index and start rebuilding it every `interval`.
    pub fn start(root: PathBuf, hidden: PatternList, max_results: usize, interval: Duration) -> Self {
        let mut index = Self::new(root, hidden, max_results);
        index.spawn(interval);
        index
    }

    fn spawn(&mut self, interval: Duration) {
        let updater = Self {
            shared: self.shared.clone(),
            task: None,
        };
        let handle = tokio::spawn(async move {
            loop {
                updater.rebuild_now().await;
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = updater.shared.wake.notified() => {}
                }
            }
        });
        self.task = Some(Arc::new(AbortOnDrop(handle)));
    }

    /// Rebuild on the blocking pool and publish the result.
    pub async fn rebuild_now(&self) {
        let generation = self.shared.requested.load(Ordering::SeqCst);
        let root = self.shared.root.load_full();
        let hidden = self.shared.hidden.clone();
        debug!("Updating file index for {:?}", root);

        let build_root = root.clone();
        let snapshot =
            match tokio::task::spawn_blocking(move || build_index(&build_root, &hidden)).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("File index rebuild of {:?} panicked: {}", root, e);
                    return;
                }
            };

        info!(
            "File index updated: {} names under {}",
            snapshot.len(),
            snapshot.root()
        );
        self.shared.snapshot.store(Arc::new(snapshot));
        if self.shared.requested.load(Ordering::SeqCst) == generation {
            self.shared.ready.send_replace(true);
        }
    }

    /// Ask for an asynchronous rebuild. Searches issued from now on see the
    /// refreshed tree.
    pub fn request_update(&self) {
        self.shared.requested.fetch_add(1, Ordering::SeqCst);
        self.shared.ready.send_replace(false);
        self.shared.wake.notify_one();
    }

    /// Point the index at a new share root and rebuild.
    pub fn set_root(&self, root: PathBuf) {
        info!("File index root changed to {:?}", root);
        self.shared.root.store(Arc::new(root));
        self.request_update();
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.shared.snapshot.load_full()
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    /// Paths whose name matches `pattern` from its first character, at most
    /// `max_results` of them. Waits for the index to become ready.
    pub async fn search(&self, pattern: &Regex) -> SearchResults {
        let mut ready = self.shared.ready.subscribe();
        // The sender lives in `shared`, so this only returns once ready.
        let _ = ready.wait_for(|ready| *ready).await;

        SearchResults {
            snapshot: self.snapshot(),
            pattern: pattern.clone(),
            name_idx: 0,
            path_idx: 0,
            remaining: self.shared.max_results,
        }
    }
}

/// Lazy iterator over the matches of one search, bound to one snapshot.
pub struct SearchResults {
    snapshot: Arc<IndexSnapshot>,
    pattern: Regex,
    name_idx: usize,
    path_idx: usize,
    remaining: usize,
}

impl SearchResults {
    /// The snapshot these results are drawn from.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.clone()
    }
}

impl Iterator for SearchResults {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.remaining == 0 {
            return None;
        }
        while let Some((name, paths)) = self.snapshot.entries.get(self.name_idx) {
            if self.path_idx < paths.len() && matches_at_start(&self.pattern, name) {
                let path = paths[self.path_idx].clone();
                self.path_idx += 1;
                self.remaining -= 1;
                return Some(path);
            }
            self.name_idx += 1;
            self.path_idx = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::patterns::compile_search;
    use tokio::time::timeout;

    fn hidden() -> PatternList {
        PatternList::new(&[r"\..*", r"Thumbs\.db"], false).unwrap()
    }

    fn share_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Foo/bar")).unwrap();
        fs::create_dir_all(root.join(".secret/inner")).unwrap();
        for name in [".invisible", "fooö", "Foo/oOo", "Foo/cover.jpg", "Foo/bar/spam", "Foo/bar/huge", "huge", ".secret/inner/file"] {
            fs::write(root.join(name), b"test").unwrap();
        }
        dir
    }

    #[test]
    fn test_build_index_flattens_by_name() {
        let dir = share_tree();
        let snapshot = build_index(dir.path(), &hidden());
        let root = snapshot.root().to_string();

        assert_eq!(snapshot.get("huge").unwrap().len(), 2);
        assert_eq!(snapshot.get("Foo/").unwrap(), &[format!("{}Foo/", root)]);
        assert_eq!(snapshot.get("bar/").unwrap(), &[format!("{}Foo/bar/", root)]);
        assert_eq!(snapshot.relative(&snapshot.get("spam").unwrap()[0]), "Foo/bar/spam");

        assert!(snapshot.get(".invisible").is_none());
        assert!(snapshot.get("inner/").is_none());
        assert!(snapshot.get("file").is_none());
        assert!(snapshot.names().all(|name| !name.starts_with('.')));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        use std::os::unix::fs::symlink;

        let dir = share_tree();
        let root = dir.path();
        symlink(root, root.join("Foo/bar/loop")).unwrap();
        symlink(root.join("Foo"), root.join("zz-foo-link")).unwrap();

        let snapshot = build_index(root, &hidden());

        // The link itself is indexed but not followed back into the root.
        assert_eq!(snapshot.get("loop/").unwrap().len(), 1);
        assert_eq!(snapshot.get("spam").unwrap().len(), 1);
        assert_eq!(snapshot.get("oOo").unwrap().len(), 1);
        assert_eq!(snapshot.get("huge").unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_link_sorted_before_target_keeps_real_paths() {
        use std::os::unix::fs::symlink;

        let dir = share_tree();
        let root = dir.path();
        symlink(root.join("Foo"), root.join("A-link")).unwrap();

        let snapshot = build_index(root, &hidden());
        let prefix = snapshot.root().to_string();

        let ooo = snapshot.get("oOo").unwrap();
        assert!(ooo.contains(&format!("{}Foo/oOo", prefix)));
        assert!(ooo.contains(&format!("{}A-link/oOo", prefix)));
        let spam = snapshot.get("spam").unwrap();
        assert!(spam.contains(&format!("{}Foo/bar/spam", prefix)));
    }

    #[tokio::test]
    async fn test_search_waits_for_first_snapshot() {
        let dir = share_tree();
        let index = FileIndex::new(dir.path().to_path_buf(), hidden(), 128);
        assert!(!index.is_ready());

        let searcher = index.clone();
        let pending = tokio::spawn(async move {
            let pattern = compile_search("huge").unwrap();
            searcher.search(&pattern).await.count()
        });

        sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        index.rebuild_now().await;
        let found = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
        assert_eq!(found, 2);
    }

    #[tokio::test]
    async fn test_search_caps_results() {
        let dir = share_tree();
        let index = FileIndex::start(dir.path().to_path_buf(), hidden(), 3, Duration::from_secs(3600));

        let everything = compile_search("").unwrap();
        assert_eq!(index.search(&everything).await.count(), 3);

        let nothing = compile_search(r"\.invisible").unwrap();
        assert_eq!(index.search(&nothing).await.count(), 0);

        let foo = compile_search("foo").unwrap();
        let mut results: Vec<String> = index.search(&foo).await.collect();
        results.sort();
        assert_eq!(results.len(), 2);
        assert!(results[0].ends_with("Foo/"));
    }

    #[tokio::test]
    async fn test_request_update_sees_new_files() {
        let dir = share_tree();
        let index = FileIndex::start(dir.path().to_path_buf(), hidden(), 128, Duration::from_secs(3600));
        let pattern = compile_search("fresh").unwrap();
        assert_eq!(index.search(&pattern).await.count(), 0);

        fs::write(dir.path().join("fresh.txt"), b"new").unwrap();
        index.request_update();
        let found = timeout(Duration::from_secs(5), index.search(&pattern))
            .await
            .unwrap()
            .count();
        assert_eq!(found, 1);
    }

    #[tokio::test]
    async fn test_set_root_reindexes() {
        let first = share_tree();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("elsewhere"), b"x").unwrap();

        let index = FileIndex::start(first.path().to_path_buf(), hidden(), 128, Duration::from_secs(3600));
        let pattern = compile_search("elsewhere").unwrap();
        assert_eq!(index.search(&pattern).await.count(), 0);

        index.set_root(second.path().to_path_buf());
        let results: Vec<String> = index.search(&pattern).await.collect();
        assert_eq!(results.len(), 1);
        assert_eq!(index.snapshot().relative(&results[0]), "elsewhere");
    }
}
