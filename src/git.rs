//! Version-control queries backing diff mode.
//!
//! Repository-level failures (not a repository, unknown reference) are
//! errors; a file simply not existing at some revision is `None`.

use anyhow::{anyhow, Context as _, Result};
use git2::{Repository, Tree};
use std::path::Path;

pub struct GitQuery {
    repo: Repository,
}

impl GitQuery {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .with_context(|| format!("not a git repository: {}", path.display()))?;
        Ok(Self { repo })
    }

    /// Shorthand name of the currently checked out branch.
    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head().context("cannot resolve git HEAD")?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("git HEAD is not a named branch"))
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.revparse_single(name).is_ok()
    }

    fn tree_at(&self, refname: &str) -> Result<Tree<'_>> {
        let object = self
            .repo
            .revparse_single(refname)
            .with_context(|| format!("branch does not exist: {refname}"))?;
        let commit = object
            .peel_to_commit()
            .with_context(|| format!("'{refname}' does not name a commit"))?;
        Ok(commit.tree()?)
    }

    /// Paths that differ between two committed references.
    pub fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let base_tree = self.tree_at(base)?;
        let head_tree = self.tree_at(head)?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)?;
        Ok(collect_paths(&diff))
    }

    /// Paths in the working tree (including uncommitted edits) that differ
    /// from `base`.
    pub fn workdir_changed_files(&self, base: &str) -> Result<Vec<String>> {
        let base_tree = self.tree_at(base)?;
        let mut opts = git2::DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut opts))?;
        Ok(collect_paths(&diff))
    }

    /// Historical content of `path` at `refname`. `None` when the file did
    /// not exist at that revision.
    pub fn read_at_ref(&self, refname: &str, path: &str) -> Result<Option<String>> {
        let tree = self.tree_at(refname)?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("cannot read '{path}' at {refname}"))
            }
        };
        let object = entry.to_object(&self.repo)?;
        let blob = object
            .peel_to_blob()
            .with_context(|| format!("'{path}' at {refname} is not a regular file"))?;
        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }
}

fn collect_paths(diff: &git2::Diff<'_>) -> Vec<String> {
    diff.deltas()
        .filter_map(|delta| {
            delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;
    use tempfile::TempDir;

    fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@example.dev").unwrap();
        let parent = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    fn fixture() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "test").unwrap();
            config.set_str("user.email", "test@example.dev").unwrap();
        }
        (dir, repo)
    }

    #[test]
    fn open_fails_outside_a_repository() {
        let dir = TempDir::new().unwrap();
        assert!(GitQuery::open(dir.path()).is_err());
    }

    #[test]
    fn reports_branch_existence() {
        let (dir, repo) = fixture();
        fs::write(dir.path().join("f.txt"), "v1").unwrap();
        commit_all(&repo, "initial");

        let git = GitQuery::open(dir.path()).unwrap();
        let branch = git.current_branch().unwrap();
        assert!(git.branch_exists(&branch));
        assert!(!git.branch_exists("no-such-branch"));
    }

    #[test]
    fn reads_historical_content_and_reports_absence() {
        let (dir, repo) = fixture();
        fs::write(dir.path().join("f.txt"), "v1").unwrap();
        commit_all(&repo, "initial");

        let git = GitQuery::open(dir.path()).unwrap();
        let branch = git.current_branch().unwrap();
        assert_eq!(
            git.read_at_ref(&branch, "f.txt").unwrap().as_deref(),
            Some("v1")
        );
        assert_eq!(git.read_at_ref(&branch, "missing.txt").unwrap(), None);
        assert!(git.read_at_ref("no-such-branch", "f.txt").is_err());
    }

    #[test]
    fn diffs_committed_and_workdir_changes() {
        let (dir, repo) = fixture();
        fs::write(dir.path().join("f.txt"), "v1").unwrap();
        commit_all(&repo, "initial");
        let git = GitQuery::open(dir.path()).unwrap();
        let base = git.current_branch().unwrap();

        fs::write(dir.path().join("f.txt"), "v2").unwrap();
        commit_all(&repo, "edit");
        fs::write(dir.path().join("new.txt"), "fresh").unwrap();

        let committed = git.changed_files(&format!("{base}~1"), &base).unwrap();
        assert_eq!(committed, vec!["f.txt".to_string()]);

        let workdir = git.workdir_changed_files(&format!("{base}~1")).unwrap();
        assert!(workdir.contains(&"f.txt".to_string()));
        assert!(workdir.contains(&"new.txt".to_string()));
    }
}
