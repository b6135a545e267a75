//! Real-repository fixtures for git tests.

use std::path::Path;
use std::process::Command;

pub(crate) fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub(crate) fn make_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["-c", "init.defaultBranch=main", "init"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
    run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
    dir
}

/// Write `content` to `path`, commit it, and return the new HEAD.
pub(crate) fn commit_file(repo_dir: &Path, path: &str, content: &str, message: &str) -> String {
    let full = repo_dir.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&full, content).unwrap();
    run_git(repo_dir, &["add", path]);
    run_git(repo_dir, &["commit", "-m", message]);
    run_git(repo_dir, &["rev-parse", "HEAD"])
}
