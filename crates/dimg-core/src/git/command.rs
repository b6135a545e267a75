//! Thin wrapper over the `git` CLI.
//!
//! Every call is blocking and never retried. Failures carry the repository
//! name so they can be diagnosed from the top-level error alone.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{DimgError, Result};

/// Hash of the empty tree, used as the baseline for patches from nothing.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// `git` bound to one repository's object database.
#[derive(Debug, Clone)]
pub struct Git {
    repo: String,
    git_dir: PathBuf,
}

impl Git {
    pub fn new(repo: impl Into<String>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            git_dir: git_dir.into(),
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("--git-dir")
            .arg(&self.git_dir)
            .args(["-c", "core.quotepath=false"]);
        cmd
    }

    /// Run `git <args>` and return stdout.
    pub fn output<S: AsRef<std::ffi::OsStr>>(&self, args: &[S]) -> Result<Vec<u8>> {
        let output = self
            .command()
            .args(args)
            .output()
            .map_err(|e| DimgError::git(&self.repo, format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DimgError::git(
                &self.repo,
                format!(
                    "git {} failed: {}",
                    describe_args(args),
                    stderr.trim()
                ),
            ));
        }

        Ok(output.stdout)
    }

    /// Run `git <args>` and return trimmed stdout as a string.
    pub fn output_string<S: AsRef<std::ffi::OsStr>>(&self, args: &[S]) -> Result<String> {
        let stdout = self.output(args)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Run `git <args>` and report only whether it exited successfully.
    pub fn succeeds<S: AsRef<std::ffi::OsStr>>(&self, args: &[S]) -> Result<bool> {
        let status = self
            .command()
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| DimgError::git(&self.repo, format!("failed to run git: {e}")))?;
        Ok(status.success())
    }

    /// Run `git <args>` with `stdin` piped in and extra environment.
    pub fn output_with_input<S: AsRef<std::ffi::OsStr>>(
        &self,
        args: &[S],
        envs: &[(&str, &Path)],
        stdin: &[u8],
    ) -> Result<Vec<u8>> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in envs {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| DimgError::git(&self.repo, format!("failed to run git: {e}")))?;
        if let Some(mut input) = child.stdin.take() {
            input
                .write_all(stdin)
                .map_err(|e| DimgError::git(&self.repo, format!("failed to write git stdin: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| DimgError::git(&self.repo, format!("failed to wait for git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DimgError::git(
                &self.repo,
                format!("git {} failed: {}", describe_args(args), stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

fn describe_args<S: AsRef<std::ffi::OsStr>>(args: &[S]) -> String {
    args.iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `git <args>` outside any repository (clone, init).
pub fn run_standalone<S: AsRef<std::ffi::OsStr>>(repo: &str, args: &[S]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|e| DimgError::git(repo, format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DimgError::git(
            repo,
            format!("git {} failed: {}", describe_args(args), stderr.trim()),
        ));
    }
    Ok(())
}
