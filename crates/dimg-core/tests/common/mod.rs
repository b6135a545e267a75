//! Shared fixtures: real git repositories and ready-made configs.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use dimg_core::{Conveyor, ConveyorOptions, Dappfile, MemoryBackend};

pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
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

pub fn make_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["-c", "init.defaultBranch=main", "init"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
    run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
    dir
}

pub fn commit_file(repo_dir: &Path, path: &str, content: &str, message: &str) -> String {
    let full = repo_dir.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&full, content).unwrap();
    run_git(repo_dir, &["add", path]);
    run_git(repo_dir, &["commit", "-m", message]);
    run_git(repo_dir, &["rev-parse", "HEAD"])
}

/// Text content of at least `bytes` bytes.
pub fn text_of_size(bytes: usize) -> String {
    let mut out = String::with_capacity(bytes + 32);
    let mut i = 0usize;
    while out.len() < bytes {
        out.push_str(&format!("line {i:010} of generated content\n"));
        i += 1;
    }
    out
}

/// One shippable image `x` exporting `app/` of the project checkout, with
/// install and setup commands and a final CMD.
pub fn app_dappfile(install_cache_version: &str) -> Dappfile {
    serde_json::from_value(serde_json::json!({
        "dimgs": [{
            "name": "x",
            "from": { "image": "alpine:3.19" },
            "git": {
                "local": [{ "to": "/app", "include_paths": ["app"] }]
            },
            "builder": {
                "shell": {
                    "install": ["apk add git make"],
                    "install_cache_version": install_cache_version,
                    "setup": ["make -C /app/app"]
                }
            },
            "docker": { "cmd": ["/app/app/run"] }
        }]
    }))
    .unwrap()
}

/// Project checkout plus separate build and temp directories.
pub struct Project {
    pub repo: tempfile::TempDir,
    pub build_dir: tempfile::TempDir,
    pub tmp_dir: tempfile::TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            repo: make_git_repo(),
            build_dir: tempfile::tempdir().unwrap(),
            tmp_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn options(&self) -> ConveyorOptions {
        let mut options = ConveyorOptions::new(self.repo.path());
        options.project_name = "scenario".to_string();
        options.build_dir = self.build_dir.path().to_path_buf();
        options.tmp_dir = Some(self.tmp_dir.path().to_path_buf());
        options
    }

    pub fn conveyor(&self, dappfile: Dappfile, backend: &Arc<MemoryBackend>) -> Conveyor {
        Conveyor::new(dappfile, self.options(), backend.clone())
    }
}
