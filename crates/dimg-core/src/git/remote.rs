//! Remote repositories, cloned bare into the build directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::{DimgError, Result};
use crate::git::command::{run_standalone, Git};
use crate::git::url::{slug, url_scheme};
use crate::git::GitRepo;

/// Bumped when the on-disk clone layout changes.
pub const REMOTE_CACHE_VERSION: &str = "3";

#[derive(Debug)]
pub struct RemoteGitRepo {
    name: String,
    url: String,
    path: PathBuf,
    git: Git,
}

impl RemoteGitRepo {
    pub fn new(name: &str, url: &str, build_dir: &Path) -> Result<Self> {
        let path = Self::clone_path(build_dir, name, url)?;
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            git: Git::new(format!("{name} ({url})"), path.clone()),
            path,
        })
    }

    /// `<build_dir>/remote_git_repo/<version>/<slug(name)>/<scheme>`; the
    /// scheme component is omitted for plain paths.
    pub fn clone_path(build_dir: &Path, name: &str, url: &str) -> Result<PathBuf> {
        let scheme = url_scheme(url)?;
        let mut path = build_dir
            .join("remote_git_repo")
            .join(REMOTE_CACHE_VERSION)
            .join(slug(name));
        if !scheme.is_empty() {
            path.push(scheme);
        }
        Ok(path)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone on first use, then fetch all branches and tags.
    pub fn clone_and_fetch(&self) -> Result<()> {
        if !self.path.exists() {
            self.clone_bare()?;
        }

        info!(repo = %self.name, url = %self.url, "fetching remote git repo");
        self.git.output(&[
            "fetch",
            "--prune",
            "--quiet",
            self.url.as_str(),
            "+refs/heads/*:refs/heads/*",
            "+refs/tags/*:refs/tags/*",
        ])?;
        Ok(())
    }

    fn clone_bare(&self) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            DimgError::InternalInvariant(format!(
                "clone path {} has no parent",
                self.path.display()
            ))
        })?;
        std::fs::create_dir_all(parent)?;

        // Clone next to the final location, then move it in place so an
        // interrupted clone never looks complete.
        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)?;
        let target = staging.path().join("repo");

        info!(repo = %self.name, url = %self.url, path = %self.path.display(), "cloning remote git repo");
        run_standalone(
            &self.describe(),
            &[
                std::ffi::OsStr::new("clone"),
                std::ffi::OsStr::new("--bare"),
                std::ffi::OsStr::new("--quiet"),
                std::ffi::OsStr::new(&self.url),
                target.as_os_str(),
            ],
        )?;
        std::fs::rename(&target, &self.path)?;
        Ok(())
    }
}

impl GitRepo for RemoteGitRepo {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.url)
    }

    fn git(&self) -> &Git {
        &self.git
    }
}

type Slot = Arc<Mutex<Option<Arc<RemoteGitRepo>>>>;

/// Per-run cache of remote repositories keyed by name.
///
/// The first request for a name clones and fetches while holding that
/// name's slot; concurrent requests for the same name wait on the slot and
/// reuse the result.
#[derive(Debug, Default)]
pub struct RemoteRepoCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl RemoteRepoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_clone(&self, name: &str, url: &str, build_dir: &Path) -> Result<Arc<RemoteGitRepo>> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| DimgError::InternalInvariant("remote repo cache poisoned".to_string()))?;
            slots.entry(name.to_string()).or_default().clone()
        };

        let mut guard = slot
            .lock()
            .map_err(|_| DimgError::InternalInvariant(format!("remote repo slot '{name}' poisoned")))?;
        if let Some(repo) = guard.as_ref() {
            if repo.url() != url {
                warn!(repo = %name, cached_url = %repo.url(), url = %url, "remote repo name reused with a different url; using the first");
            }
            debug!(repo = %name, "reusing remote git repo");
            return Ok(Arc::clone(repo));
        }

        let repo = Arc::new(RemoteGitRepo::new(name, url, build_dir)?);
        repo.clone_and_fetch()?;
        *guard = Some(Arc::clone(&repo));
        Ok(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::{commit_file, make_git_repo, run_git};
    use crate::git::GitReference;

    #[test]
    fn clone_path_layout() {
        let build = Path::new("/var/build");
        let path = RemoteGitRepo::clone_path(build, "lib", "https://example.com/lib.git").unwrap();
        assert_eq!(
            path,
            Path::new("/var/build/remote_git_repo")
                .join(REMOTE_CACHE_VERSION)
                .join("lib")
                .join("https")
        );

        let ssh = RemoteGitRepo::clone_path(build, "lib", "git@github.com:org/repo.git").unwrap();
        assert!(ssh.ends_with("lib/ssh"));

        let plain = RemoteGitRepo::clone_path(build, "lib", "/srv/lib.git").unwrap();
        assert!(plain.ends_with("lib"));
    }

    #[test]
    fn clone_path_rejects_bad_url() {
        let err = RemoteGitRepo::clone_path(Path::new("/b"), "lib", "deploy@host:lib.git").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn clone_fetch_and_resolve_branch() {
        let upstream = make_git_repo();
        let head = commit_file(upstream.path(), "lib/a.rs", "fn a() {}", "add a");
        run_git(upstream.path(), &["tag", "v1"]);
        let build = tempfile::tempdir().unwrap();
        let url = upstream.path().to_string_lossy().into_owned();

        let repo = RemoteGitRepo::new("lib", &url, build.path()).unwrap();
        repo.clone_and_fetch().unwrap();
        assert!(repo.path().join("HEAD").exists());
        assert_eq!(
            repo.resolve_commit(&GitReference::Branch("main".to_string())).unwrap(),
            head
        );
        assert_eq!(repo.resolve_commit(&GitReference::Tag("v1".to_string())).unwrap(), head);

        let next = commit_file(upstream.path(), "lib/b.rs", "fn b() {}", "add b");
        repo.clone_and_fetch().unwrap();
        assert_eq!(
            repo.resolve_commit(&GitReference::Branch("main".to_string())).unwrap(),
            next
        );
    }

    #[test]
    fn cache_reuses_clone_by_name() {
        let upstream = make_git_repo();
        let build = tempfile::tempdir().unwrap();
        let url = upstream.path().to_string_lossy().into_owned();
        let cache = RemoteRepoCache::new();

        let first = cache.get_or_clone("lib", &url, build.path()).unwrap();
        let second = cache.get_or_clone("lib", &url, build.path()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let slots = build.path().join("remote_git_repo").join(REMOTE_CACHE_VERSION);
        assert_eq!(std::fs::read_dir(slots).unwrap().count(), 1);
    }

    #[test]
    fn cache_blocks_concurrent_clones_of_same_name() {
        let upstream = make_git_repo();
        let build = tempfile::tempdir().unwrap();
        let url = upstream.path().to_string_lossy().into_owned();
        let cache = Arc::new(RemoteRepoCache::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let url = url.clone();
                let build = build.path().to_path_buf();
                std::thread::spawn(move || cache.get_or_clone("lib", &url, &build).unwrap())
            })
            .collect();
        let repos: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(repos.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
