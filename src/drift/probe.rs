use std::path::{Path, PathBuf};

/// Answers whether a tracked resource still exists.
pub trait ResourceProbe: Send + Sync {
    fn exists(&self, resource_id: &str) -> bool;
}

/// Treats every resource as present, so no obsolete references are reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeExists;

impl ResourceProbe for AssumeExists {
    fn exists(&self, _resource_id: &str) -> bool {
        true
    }
}

/// Checks resource ids as file paths, relative ones against `root`.
#[derive(Debug, Clone)]
pub struct FsProbe {
    root: PathBuf,
}

impl FsProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceProbe for FsProbe {
    fn exists(&self, resource_id: &str) -> bool {
        let path = Path::new(resource_id);
        if path.is_absolute() {
            path.exists()
        } else {
            self.root.join(path).exists()
        }
    }
}
