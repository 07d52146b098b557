//! File existence and modification-time probing, with a per-path cache.

use std::collections::HashMap;
use std::time::SystemTime;

/// MTime info gathered for a file.  This also models "file is absent".
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn exists(&self) -> bool {
        matches!(self, MTime::Stamp(_))
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        match self {
            MTime::Stamp(t) => Some(*t),
            MTime::Missing => None,
        }
    }
}

/// stat() an on-disk path, producing its MTime.
/// An unreadable path counts as absent; the up-to-date logic treats both
/// the same way.
fn stat(path: &str) -> MTime {
    match std::fs::metadata(path) {
        Ok(meta) => match meta.modified() {
            Ok(t) => MTime::Stamp(t),
            Err(_) => MTime::Missing,
        },
        Err(_) => MTime::Missing,
    }
}

/// Caches stat results so repeated up-to-date checks stay off the disk.
/// The executor invalidates a path after its producing command finishes;
/// a build with multiple goals drops the whole cache between goals.
#[derive(Default)]
pub struct FileCache {
    entries: HashMap<String, MTime>,
}

impl FileCache {
    pub fn new() -> Self {
        FileCache {
            entries: HashMap::new(),
        }
    }

    /// Cached stat of a path.
    pub fn probe(&mut self, path: &str) -> MTime {
        if let Some(mtime) = self.entries.get(path) {
            return *mtime;
        }
        self.restat(path)
    }

    /// stat a path again even if a cached entry exists.
    pub fn restat(&mut self, path: &str) -> MTime {
        let mtime = stat(path);
        self.entries.insert(path.to_string(), mtime);
        mtime
    }

    pub fn invalidate(&mut self, path: &str) {
        self.entries.remove(path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
