//! Git repositories consumed by git artifacts.
//!
//! All access goes through the `git` CLI. Repositories are read-only here:
//! nothing in this module touches a work tree.

pub mod command;
pub mod diff_parser;
pub mod local;
pub mod path_filter;
pub mod remote;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::path::Path;

use crate::error::{DimgError, Result};

pub use command::{Git, EMPTY_TREE};
pub use diff_parser::{ChangeKind, DiffParser, DiffSummary, PatchPath};
pub use local::LocalGitRepo;
pub use path_filter::PathFilter;
pub use remote::{RemoteGitRepo, RemoteRepoCache};

/// Which commit of a repository an artifact follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitReference {
    Head,
    Branch(String),
    Tag(String),
    Commit(String),
}

impl GitReference {
    /// Precedence when several are declared: commit, tag, branch.
    pub fn from_parts(branch: Option<&str>, tag: Option<&str>, commit: Option<&str>) -> Self {
        match (commit, tag, branch) {
            (Some(c), _, _) => GitReference::Commit(c.to_string()),
            (None, Some(t), _) => GitReference::Tag(t.to_string()),
            (None, None, Some(b)) => GitReference::Branch(b.to_string()),
            (None, None, None) => GitReference::Head,
        }
    }

    fn rev_spec(&self) -> String {
        match self {
            GitReference::Head => "HEAD".to_string(),
            GitReference::Branch(b) => format!("refs/heads/{b}"),
            GitReference::Tag(t) => format!("refs/tags/{t}"),
            GitReference::Commit(c) => c.clone(),
        }
    }
}

impl fmt::Display for GitReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitReference::Head => f.write_str("HEAD"),
            GitReference::Branch(b) => write!(f, "branch {b}"),
            GitReference::Tag(t) => write!(f, "tag {t}"),
            GitReference::Commit(c) => write!(f, "commit {c}"),
        }
    }
}

/// One `git ls-tree` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: String,
    pub object: String,
    /// Raw path bytes; git paths need not be UTF-8.
    pub path: Vec<u8>,
}

/// Repository access shared by the project checkout and remote clones.
pub trait GitRepo: Send + Sync + fmt::Debug {
    /// Name used in labels and error messages.
    fn name(&self) -> &str;

    /// Human-readable identity, e.g. the remote URL.
    fn describe(&self) -> String;

    fn git(&self) -> &Git;

    fn resolve_commit(&self, reference: &GitReference) -> Result<String> {
        let spec = format!("{}^{{commit}}", reference.rev_spec());
        let commit = self
            .git()
            .output_string(&["rev-parse", "--verify", "--quiet", spec.as_str()])
            .map_err(|_| {
                DimgError::git(
                    self.describe(),
                    format!("cannot resolve {reference} to a commit"),
                )
            })?;
        if commit.is_empty() {
            return Err(DimgError::git(
                self.describe(),
                format!("cannot resolve {reference} to a commit"),
            ));
        }
        Ok(commit)
    }

    fn is_commit_exists(&self, commit: &str) -> Result<bool> {
        if commit.is_empty() {
            return Ok(false);
        }
        let spec = format!("{commit}^{{commit}}");
        self.git().succeeds(&["cat-file", "-e", spec.as_str()])
    }

    /// Raw diff between two commits limited to `scope`. An empty `from`
    /// diffs against the empty tree.
    fn diff(&self, from: &str, to: &str, scope: &str) -> Result<Vec<u8>> {
        let from = if from.is_empty() { EMPTY_TREE } else { from };
        let mut args = vec![
            "diff",
            "--binary",
            "--full-index",
            "--no-renames",
            "--no-color",
            "--no-ext-diff",
            "--no-textconv",
            "--src-prefix=a/",
            "--dst-prefix=b/",
            from,
            to,
        ];
        if !scope.is_empty() {
            args.push("--");
            args.push(scope);
        }
        self.git().output(&args)
    }

    /// Recursive tree listing at `commit`, limited to `scope`.
    fn ls_tree(&self, commit: &str, scope: &str) -> Result<Vec<TreeEntry>> {
        let mut args = vec!["ls-tree", "-r", "-z", "--full-tree", commit];
        if !scope.is_empty() {
            args.push("--");
            args.push(scope);
        }
        let stdout = self.git().output(&args)?;
        parse_ls_tree(&stdout).ok_or_else(|| {
            DimgError::git(self.describe(), "unexpected git ls-tree output".to_string())
        })
    }

    /// Write a tar of the filtered tree at `commit` to `dest`, with paths
    /// relative to the filter's base. Returns the number of entries.
    fn archive(&self, commit: &str, filter: &PathFilter, dest: &Path) -> Result<usize> {
        let entries: Vec<TreeEntry> = self
            .ls_tree(commit, filter.base_path())?
            .into_iter()
            .filter(|e| filter.is_path_valid(&e.path))
            .collect();

        let mut index_info = Vec::new();
        for entry in &entries {
            let rel = filter.relative(&entry.path).unwrap_or(entry.path.as_slice());
            index_info.extend_from_slice(format!("{} {}\t", entry.mode, entry.object).as_bytes());
            index_info.extend_from_slice(rel);
            index_info.push(0);
        }

        let index_dir = tempfile::tempdir()?;
        let index_file = index_dir.path().join("index");
        let envs = [("GIT_INDEX_FILE", index_file.as_path())];
        self.git()
            .output_with_input(&["update-index", "-z", "--index-info"], &envs, &index_info)?;
        let tree = self.git().output_with_input(&["write-tree"], &envs, &[])?;
        let tree = String::from_utf8_lossy(&tree).trim().to_string();

        let dest = dest.to_string_lossy().into_owned();
        self.git()
            .output(&["archive", "--format=tar", "-o", dest.as_str(), tree.as_str()])?;
        Ok(entries.len())
    }
}

fn parse_ls_tree(stdout: &[u8]) -> Option<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for record in stdout.split(|b| *b == 0).filter(|r| !r.is_empty()) {
        let tab = record.iter().position(|b| *b == b'\t')?;
        let meta = std::str::from_utf8(&record[..tab]).ok()?;
        let mut fields = meta.split(' ');
        let mode = fields.next()?.to_string();
        let kind = fields.next()?.to_string();
        let object = fields.next()?.to_string();
        entries.push(TreeEntry {
            mode,
            kind,
            object,
            path: record[tab + 1..].to_vec(),
        });
    }
    Some(entries)
}
