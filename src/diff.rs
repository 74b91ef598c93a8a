//! Diff snapshots: two git revisions mirrored into parallel content maps.
//!
//! The base side is frozen at snapshot time. The head side reflects live disk
//! content when the head reference is the currently checked out branch, so
//! uncommitted edits show up; otherwise it is frozen too.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::Interface;
use crate::git::GitQuery;
use crate::permissions::Permission;

#[derive(Debug)]
pub struct DiffSnapshot {
    pub base_ref: String,
    pub head_ref: String,
    /// Head content is read live from disk and kept live by the watcher.
    pub is_working_dir: bool,
    pub changed: BTreeSet<String>,
    pub base: BTreeMap<String, String>,
    pub head: BTreeMap<String, String>,
}

/// Compute the changed-file set between `base_ref` and `head_ref` and resolve
/// both sides' content. When `interface` is given, its read permission filters
/// which paths are admitted into the content maps; the changed set itself is
/// reported unfiltered.
pub fn snapshot(
    git: &GitQuery,
    interface: Option<&Interface>,
    root: &Path,
    base_ref: &str,
    head_ref: &str,
) -> Result<DiffSnapshot> {
    if !git.branch_exists(base_ref) {
        return Err(anyhow!("branch does not exist: {base_ref}"));
    }

    let is_working_dir = head_ref == git.current_branch()?;

    let mut changed: BTreeSet<String> = git.changed_files(base_ref, head_ref)?.into_iter().collect();
    if is_working_dir {
        changed.extend(git.workdir_changed_files(base_ref)?);
    }

    let mut base = BTreeMap::new();
    let mut head = BTreeMap::new();
    for path in &changed {
        if let Some(iface) = interface {
            if !iface.allows(path, Permission::Read) {
                continue;
            }
        }

        // Absence at a revision means the file did not exist there; it maps
        // to empty content rather than an error.
        let base_content = git.read_at_ref(base_ref, path)?.unwrap_or_default();
        let head_content = if is_working_dir {
            std::fs::read_to_string(root.join(path)).unwrap_or_default()
        } else {
            git.read_at_ref(head_ref, path)?.unwrap_or_default()
        };

        base.insert(path.clone(), base_content);
        head.insert(path.clone(), head_content);
    }

    Ok(DiffSnapshot {
        base_ref: base_ref.to_string(),
        head_ref: head_ref.to_string(),
        is_working_dir,
        changed,
        base,
        head,
    })
}
