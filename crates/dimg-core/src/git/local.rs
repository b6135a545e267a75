//! The project's own checkout.

use std::path::{Path, PathBuf};

use crate::error::{DimgError, Result};
use crate::git::command::Git;
use crate::git::GitRepo;

/// Name under which the project checkout appears in labels and errors.
pub const OWN_REPO_NAME: &str = "own";

#[derive(Debug, Clone)]
pub struct LocalGitRepo {
    path: PathBuf,
    git: Git,
}

impl LocalGitRepo {
    /// Open the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let probe = std::process::Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["rev-parse", "--absolute-git-dir"])
            .output()
            .map_err(|e| DimgError::git(OWN_REPO_NAME, format!("failed to run git: {e}")))?;
        if !probe.status.success() {
            return Err(DimgError::Configuration(format!(
                "{} is not inside a git repository",
                path.display()
            )));
        }
        let git_dir = String::from_utf8_lossy(&probe.stdout).trim().to_string();

        Ok(Self {
            path: path.to_path_buf(),
            git: Git::new(OWN_REPO_NAME, git_dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GitRepo for LocalGitRepo {
    fn name(&self) -> &str {
        OWN_REPO_NAME
    }

    fn describe(&self) -> String {
        OWN_REPO_NAME.to_string()
    }

    fn git(&self) -> &Git {
        &self.git
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::{commit_file, make_git_repo};
    use crate::git::GitReference;

    #[test]
    fn open_resolves_head() {
        let repo = make_git_repo();
        let head = commit_file(repo.path(), "a.txt", "a", "add a");
        let own = LocalGitRepo::open(repo.path()).unwrap();
        assert_eq!(own.resolve_commit(&GitReference::Head).unwrap(), head);
        assert_eq!(own.name(), "own");
    }

    #[test]
    fn open_from_subdirectory() {
        let repo = make_git_repo();
        commit_file(repo.path(), "sub/a.txt", "a", "add a");
        let own = LocalGitRepo::open(&repo.path().join("sub")).unwrap();
        assert!(own.resolve_commit(&GitReference::Head).is_ok());
    }

    #[test]
    fn open_outside_repo_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalGitRepo::open(dir.path()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn unknown_branch_fails_with_repo_identity() {
        let repo = make_git_repo();
        let own = LocalGitRepo::open(repo.path()).unwrap();
        let err = own
            .resolve_commit(&GitReference::Branch("nope".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("'own'"));
        assert!(err.to_string().contains("branch nope"));
    }
}
