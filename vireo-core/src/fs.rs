use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

/// Minimal, async-capable filesystem abstraction used by the import and
/// rescan engines.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a path exists.
    async fn path_exists(&self, path: &Path) -> bool;

    /// Fetch metadata, following symlinks.
    async fn metadata(&self, path: &Path) -> Result<FsMetadata, String>;

    /// Fetch metadata without following symlinks.
    async fn symlink_metadata(&self, path: &Path) -> Result<FsMetadata, String>;

    /// Open a directory for iteration.
    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>, String>;

    /// Read up to `len` bytes from the start of a file.
    async fn read_head(&self, path: &Path, len: usize) -> Result<Vec<u8>, String>;
}

/// Lightweight metadata needed by the walk engines.
#[derive(Debug, Clone, Copy)]
pub struct FsMetadata {
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub len: u64,
    /// Last modified time, unix seconds; 0 when unavailable.
    pub mtime: i64,
}

/// Async directory iterator (similar to tokio::fs::ReadDir).
#[async_trait]
pub trait ReadDirStream {
    /// Return next entry's path, or None when exhausted.
    async fn next_entry(&mut self) -> Result<Option<PathBuf>, String>;
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Real filesystem implementation backed by tokio::fs.
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn path_exists(&self, path: &Path) -> bool {
        // try_exists avoids errors for permission issues by returning false
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata, String> {
        let md = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("metadata failed for {:?}: {}", path, e))?;
        Ok(FsMetadata {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            is_symlink: false,
            len: md.len(),
            mtime: md.modified().map(unix_seconds).unwrap_or(0),
        })
    }

    async fn symlink_metadata(&self, path: &Path) -> Result<FsMetadata, String> {
        let md = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| format!("symlink_metadata failed for {:?}: {}", path, e))?;
        Ok(FsMetadata {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            is_symlink: md.file_type().is_symlink(),
            len: md.len(),
            mtime: md.modified().map(unix_seconds).unwrap_or(0),
        })
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>, String> {
        let rd = tokio::fs::read_dir(path)
            .await
            .map_err(|e| format!("read_dir failed for {:?}: {}", path, e))?;
        Ok(Box::new(RealReadDir { inner: rd }))
    }

    async fn read_head(&self, path: &Path, len: usize) -> Result<Vec<u8>, String> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| format!("open failed for {:?}: {}", path, e))?;
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let read = file
                .read(&mut buffer[filled..])
                .await
                .map_err(|e| format!("read failed for {:?}: {}", path, e))?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }
}

struct RealReadDir {
    inner: tokio::fs::ReadDir,
}

#[async_trait]
impl ReadDirStream for RealReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>, String> {
        match self.inner.next_entry().await {
            Ok(Some(entry)) => Ok(Some(entry.path())),
            Ok(None) => Ok(None),
            Err(e) => Err(format!("next_entry failed: {}", e)),
        }
    }
}

#[derive(Clone)]
enum Node {
    Dir { children: Vec<PathBuf>, mtime: i64 },
    File { len: u64, mtime: i64, head: Vec<u8> },
    Symlink,
}

/// In-memory filesystem for tests. Paths are treated literally; callers
/// should use consistent absolute paths. All mutators take `&self` so a
/// shared handle can be reshaped between scans.
#[derive(Default)]
pub struct InMemoryFs {
    nodes: Mutex<HashMap<PathBuf, Node>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir<P: Into<PathBuf>>(&self, path: P, mtime: i64) {
        let path = path.into();
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&path) {
            return;
        }
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(
            path,
            Node::Dir {
                children: Vec::new(),
                mtime,
            },
        );
    }

    pub fn add_file<P: Into<PathBuf>>(&self, path: P, len: u64, mtime: i64) {
        self.add_file_with_head(path, len, mtime, Vec::new());
    }

    pub fn add_file_with_head<P: Into<PathBuf>>(&self, path: P, len: u64, mtime: i64, head: Vec<u8>) {
        let path = path.into();
        let mut nodes = self.nodes.lock().unwrap();
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::File { len, mtime, head });
    }

    pub fn add_symlink<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        let mut nodes = self.nodes.lock().unwrap();
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::Symlink);
    }

    /// Update a file or directory mtime in place.
    pub fn touch<P: AsRef<Path>>(&self, path: P, new_mtime: i64) {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(path.as_ref()) {
            Some(Node::File { mtime, .. }) => *mtime = new_mtime,
            Some(Node::Dir { mtime, .. }) => *mtime = new_mtime,
            _ => {}
        }
    }

    /// Remove a path and everything below it.
    pub fn remove<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        let mut nodes = self.nodes.lock().unwrap();
        let doomed: Vec<PathBuf> = nodes
            .keys()
            .filter(|key| key.as_path() == path || key.starts_with(path))
            .cloned()
            .collect();
        for key in doomed {
            nodes.remove(&key);
        }
        if let Some(parent) = path.parent() {
            if let Some(Node::Dir { children, .. }) = nodes.get_mut(parent) {
                children.retain(|child| child.as_path() != path);
            }
        }
    }

    fn ensure_parent_link(nodes: &mut HashMap<PathBuf, Node>, path: &Path) {
        if let Some(parent) = path.parent() {
            if !nodes.contains_key(parent) {
                nodes.insert(
                    parent.to_path_buf(),
                    Node::Dir {
                        children: Vec::new(),
                        mtime: 0,
                    },
                );
                Self::ensure_parent_link(nodes, parent);
            }
            if let Some(Node::Dir { children, .. }) = nodes.get_mut(parent) {
                if !children.iter().any(|p| p.as_path() == path) {
                    children.push(path.to_path_buf());
                }
            }
        }
    }

    fn node_metadata(node: &Node) -> FsMetadata {
        match node {
            Node::Dir { mtime, .. } => FsMetadata {
                is_dir: true,
                is_file: false,
                is_symlink: false,
                len: 0,
                mtime: *mtime,
            },
            Node::File { len, mtime, .. } => FsMetadata {
                is_dir: false,
                is_file: true,
                is_symlink: false,
                len: *len,
                mtime: *mtime,
            },
            Node::Symlink => FsMetadata {
                is_dir: false,
                is_file: false,
                is_symlink: true,
                len: 0,
                mtime: 0,
            },
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn path_exists(&self, path: &Path) -> bool {
        self.nodes.lock().unwrap().contains_key(path)
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata, String> {
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(node) => Ok(Self::node_metadata(node)),
            None => Err(format!("metadata on missing path: {:?}", path)),
        }
    }

    async fn symlink_metadata(&self, path: &Path) -> Result<FsMetadata, String> {
        self.metadata(path).await
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>, String> {
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(Node::Dir { children, .. }) => {
                let mut sorted = children.clone();
                sorted.sort();
                Ok(Box::new(InMemReadDir {
                    queue: sorted.into(),
                }))
            }
            Some(_) => Err(format!("read_dir on non-directory: {:?}", path)),
            None => Err(format!("read_dir on missing path: {:?}", path)),
        }
    }

    async fn read_head(&self, path: &Path, len: usize) -> Result<Vec<u8>, String> {
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(Node::File { head, .. }) => Ok(head.iter().copied().take(len).collect()),
            Some(_) => Err(format!("read_head on non-file: {:?}", path)),
            None => Err(format!("read_head on missing path: {:?}", path)),
        }
    }
}

struct InMemReadDir {
    queue: VecDeque<PathBuf>,
}

#[async_trait]
impl ReadDirStream for InMemReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>, String> {
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_fs_links_parents_and_lists_children() {
        let fs = InMemoryFs::new();
        fs.add_file("/m/a/track.mp3", 10, 100);
        fs.add_file("/m/b.mp3", 5, 50);

        assert!(fs.path_exists(Path::new("/m")).await);
        let mut dir = fs.read_dir(Path::new("/m")).await.unwrap();
        let mut seen = Vec::new();
        while let Some(entry) = dir.next_entry().await.unwrap() {
            seen.push(entry);
        }
        assert_eq!(seen, vec![PathBuf::from("/m/a"), PathBuf::from("/m/b.mp3")]);
    }

    #[tokio::test]
    async fn in_memory_fs_remove_drops_subtree() {
        let fs = InMemoryFs::new();
        fs.add_file("/m/a/track.mp3", 10, 100);
        fs.remove("/m/a");

        assert!(!fs.path_exists(Path::new("/m/a")).await);
        assert!(!fs.path_exists(Path::new("/m/a/track.mp3")).await);
        let mut dir = fs.read_dir(Path::new("/m")).await.unwrap();
        assert_eq!(dir.next_entry().await.unwrap(), None);
    }

    #[tokio::test]
    async fn touch_updates_mtime() {
        let fs = InMemoryFs::new();
        fs.add_file("/m/a.mp3", 10, 100);
        fs.touch("/m/a.mp3", 200);
        let meta = fs.metadata(Path::new("/m/a.mp3")).await.unwrap();
        assert_eq!(meta.mtime, 200);
    }
}
