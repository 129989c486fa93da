use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{Index, IndexEntry, IndexTime, Oid, Repository, Signature};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::STATE_DIR;
use crate::errors::SnapshotError;

const SNAPSHOT_REF_PREFIX: &str = "refs/phasegate/snapshots/";

/// A restorable capture of the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

/// Capture and restore of the mutable workspace.
pub trait SnapshotStore: Send + Sync {
    fn capture(&self, label: &str) -> Result<Snapshot, SnapshotError>;

    /// All-or-nothing; on error the workspace is left as it is.
    fn restore(&self, id: &str) -> Result<(), SnapshotError>;

    /// Most recent snapshot, if any.
    fn latest(&self) -> Result<Option<Snapshot>, SnapshotError>;
}

/// Label for a snapshot of `target` taken at `at`.
pub fn snapshot_label(target: &Path, at: DateTime<Utc>) -> String {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.display().to_string());
    format!("{}@{}", name, at.to_rfc3339())
}

/// Snapshots stored as unreferenced commits under `refs/phasegate/snapshots/`.
///
/// Capturing never moves `HEAD` or touches the index; the tree is built from
/// the working directory as it is, including untracked (but not ignored) files.
pub struct GitSnapshotStore {
    root: PathBuf,
}

impl GitSnapshotStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn open(&self) -> Result<Repository, SnapshotError> {
        Repository::open(&self.root).map_err(|source| SnapshotError::NotARepository {
            path: self.root.clone(),
            source,
        })
    }

    /// Every snapshot, most recent first.
    pub fn list(&self) -> Result<Vec<Snapshot>, SnapshotError> {
        let repo = self.open()?;
        let mut snapshots = Vec::new();
        for reference in repo.references_glob(&format!("{}*", SNAPSHOT_REF_PREFIX))? {
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            let id = name.trim_start_matches(SNAPSHOT_REF_PREFIX).to_string();
            let commit = reference.peel_to_commit()?;
            snapshots.push(read_snapshot(id, &commit));
        }
        snapshots.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(snapshots)
    }

    fn build_tree(&self, repo: &Repository) -> Result<Oid, SnapshotError> {
        let mut index = Index::new()?;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_excluded(repo, e));

        for entry in walker {
            let entry = entry.map_err(|e| SnapshotError::ReadFailed {
                path: e.path().unwrap_or(&self.root).to_path_buf(),
                source: e.into(),
            })?;
            let file_type = entry.file_type();
            if !(file_type.is_file() || file_type.is_symlink()) {
                continue;
            }

            let path = entry.path();
            let read_failed = |source| SnapshotError::ReadFailed {
                path: path.to_path_buf(),
                source,
            };
            let (content, mode) = if file_type.is_symlink() {
                let target = std::fs::read_link(path).map_err(read_failed)?;
                (target.to_string_lossy().into_owned().into_bytes(), 0o120000)
            } else {
                let content = std::fs::read(path).map_err(read_failed)?;
                (content, file_mode(&entry))
            };

            let blob = repo.blob(&content)?;
            let relative = git_path(path.strip_prefix(&self.root).unwrap_or(path));
            index.add(&IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode,
                uid: 0,
                gid: 0,
                file_size: content.len() as u32,
                id: blob,
                flags: relative.len().min(0xfff) as u16,
                flags_extended: 0,
                path: relative.into_bytes(),
            })?;
        }

        Ok(index.write_tree_to(repo)?)
    }

    fn is_excluded(&self, repo: &Repository, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name();
        if name == ".git" || (entry.depth() == 1 && name == STATE_DIR) {
            return true;
        }
        entry
            .path()
            .strip_prefix(&self.root)
            .ok()
            .and_then(|relative| repo.is_path_ignored(relative).ok())
            .unwrap_or(false)
    }
}

impl SnapshotStore for GitSnapshotStore {
    fn capture(&self, label: &str) -> Result<Snapshot, SnapshotError> {
        let repo = self.open()?;
        let timestamp = Utc::now();
        let id = format!(
            "{}-{}",
            timestamp.format("%Y%m%d%H%M%S%3f"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let tree_id = self.build_tree(&repo)?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now("phasegate", "phasegate@localhost")?;
        let message = format!(
            "[phasegate] snapshot {}\n\nid: {}\ntimestamp: {}\n",
            label,
            id,
            timestamp.to_rfc3339()
        );

        // Parent on HEAD when there is one; unborn branches get a root commit
        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = head.iter().collect();
        let commit_id = repo.commit(None, &sig, &sig, &message, &tree, &parents)?;

        repo.reference(
            &format!("{}{}", SNAPSHOT_REF_PREFIX, id),
            commit_id,
            false,
            &format!("phasegate: snapshot {}", label),
        )?;

        tracing::info!(snapshot = %id, commit = %commit_id, "workspace snapshot captured");
        Ok(Snapshot {
            id,
            label: label.to_string(),
            timestamp,
        })
    }

    fn restore(&self, id: &str) -> Result<(), SnapshotError> {
        let repo = self.open()?;
        let reference = repo
            .find_reference(&format!("{}{}", SNAPSHOT_REF_PREFIX, id))
            .map_err(|_| SnapshotError::NotFound(id.to_string()))?;
        let tree = reference.peel_to_commit()?.tree()?;

        // Run state and project lessons live in the workspace but are not part of it
        repo.add_ignore_rule(&format!("/{}/", STATE_DIR))?;

        // Working tree only; the user's index keeps whatever was staged
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true).update_index(false);
        repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;

        tracing::info!(snapshot = %id, "workspace restored");
        Ok(())
    }

    fn latest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.list()?.into_iter().next())
    }
}

fn read_snapshot(id: String, commit: &git2::Commit<'_>) -> Snapshot {
    let message = commit.message().unwrap_or_default();
    let label = message
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("[phasegate] snapshot "))
        .unwrap_or_default()
        .to_string();
    let timestamp = message
        .lines()
        .find_map(|l| l.strip_prefix("timestamp: "))
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .or_else(|| DateTime::from_timestamp(commit.time().seconds(), 0))
        .unwrap_or_default();
    Snapshot {
        id,
        label,
        timestamp,
    }
}

/// Forward-slash path as git stores it.
fn git_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(entry: &DirEntry) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    match entry.metadata() {
        Ok(meta) if meta.permissions().mode() & 0o111 != 0 => 0o100755,
        _ => 0o100644,
    }
}

#[cfg(not(unix))]
fn file_mode(_entry: &DirEntry) -> u32 {
    0o100644
}
