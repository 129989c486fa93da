//! The one shared mutable resource: the target's code tree.
//!
//! Write access passes along the phase sequence; scanners share read
//! access. Both are expressed as guards on a single `RwLock` so a writer can
//! never overlap with an in-flight scan.

use std::path::{Path, PathBuf};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::worker::Scope;

pub struct Workspace {
    root: PathBuf,
    lock: RwLock<()>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Exclusive right to mutate the workspace.
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }

    /// Shared read access; held for the duration of a scan.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    pub fn scope(&self) -> Scope {
        Scope::workspace(&self.root)
    }

    pub fn read_only_scope(&self) -> Scope {
        Scope::read_only(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_readers_share_access() {
        let ws = Workspace::new("/repo");
        let a = ws.read().await;
        let b = tokio::time::timeout(Duration::from_millis(100), ws.read()).await;
        assert!(b.is_ok());
        drop(a);
    }

    #[tokio::test]
    async fn test_writer_waits_for_readers() {
        let ws = Workspace::new("/repo");
        let reader = ws.read().await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), ws.write()).await;
        assert!(blocked.is_err());
        drop(reader);
        let writer = tokio::time::timeout(Duration::from_millis(100), ws.write()).await;
        assert!(writer.is_ok());
    }

    #[test]
    fn test_scopes() {
        let ws = Workspace::new("/repo");
        assert!(!ws.scope().read_only);
        assert!(ws.read_only_scope().read_only);
        assert_eq!(ws.root(), Path::new("/repo"));
    }
}
