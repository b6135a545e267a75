//! Binding of one git repository into one image.
//!
//! A git artifact selects part of a repository (`add` plus include/exclude
//! globs), places it at `to` inside the image and optionally re-owns it.
//! The commit last synced into a layer is recorded as a label on that layer
//! so that later builds only need to apply the difference.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::config::{GitExport, GitLocal, GitRemote, StageDependencies};
use crate::digest::{sha256_bytes, sha256_hash};
use crate::error::Result;
use crate::git::{ChangeKind, DiffParser, DiffSummary, GitReference, GitRepo, PathFilter};
use crate::image::{shell_quote, BuiltImage, ImageSpec};
use crate::stage::StageName;

/// Container directory where patches and archives are mounted.
pub const CONTAINER_GIT_DIR: &str = "/.dimg/git";

/// Patches are applied with the image's own `git`; fail with a clear message
/// when the image has none.
const REQUIRE_GIT: &str =
    "command -v git >/dev/null 2>&1 || { echo 'dimg: git is required in the image to apply git patches' >&2; exit 1; }";

#[derive(Debug)]
pub struct GitArtifact {
    repo: Arc<dyn GitRepo>,
    name: String,
    reference: GitReference,
    add: String,
    to: String,
    filter: PathFilter,
    owner: Option<String>,
    group: Option<String>,
    stage_dependencies: StageDependencies,
    latest_commit: OnceLock<String>,
}

impl GitArtifact {
    /// Artifact over the project checkout.
    pub fn local(repo: Arc<dyn GitRepo>, config: &GitLocal) -> Self {
        let name = config
            .as_name
            .clone()
            .unwrap_or_else(|| repo.name().to_string());
        Self::new(repo, name, GitReference::Head, &config.export)
    }

    /// Artifact over a cloned remote.
    pub fn remote(repo: Arc<dyn GitRepo>, config: &GitRemote) -> Self {
        let reference = GitReference::from_parts(
            config.branch.as_deref(),
            config.tag.as_deref(),
            config.commit.as_deref(),
        );
        Self::new(repo, config.name.clone(), reference, &config.export)
    }

    fn new(repo: Arc<dyn GitRepo>, name: String, reference: GitReference, export: &GitExport) -> Self {
        Self {
            repo,
            name,
            reference,
            add: export.add.clone(),
            to: export.to.clone(),
            filter: PathFilter::new(&export.add, &export.include_paths, &export.exclude_paths),
            owner: export.owner.clone(),
            group: export.group.clone(),
            stage_dependencies: export.stage_dependencies.clone().unwrap_or_default(),
            latest_commit: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repo(&self) -> &Arc<dyn GitRepo> {
        &self.repo
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Replace the per-stage watched paths.
    pub fn set_stage_dependencies(&mut self, deps: StageDependencies) {
        self.stage_dependencies = deps;
    }

    /// Digest of everything that identifies this artifact except commits.
    pub fn paramshash(&self) -> String {
        let parts = [
            self.repo.name().to_string(),
            self.name.clone(),
            self.add.clone(),
            self.to.clone(),
            self.filter_patterns(),
            self.owner.clone().unwrap_or_default(),
            self.group.clone().unwrap_or_default(),
        ];
        sha256_hash(&parts)
    }

    fn filter_patterns(&self) -> String {
        serde_json::to_string(&self.filter).unwrap_or_default()
    }

    /// Layer label recording the commit synced by this artifact.
    pub fn commit_label(&self) -> String {
        format!("dimg-git-{}-commit", self.paramshash())
    }

    /// Commit the bound reference points at, resolved once per run.
    pub fn latest_commit(&self) -> Result<String> {
        if let Some(commit) = self.latest_commit.get() {
            return Ok(commit.clone());
        }
        let commit = self.repo.resolve_commit(&self.reference)?;
        let _ = self.latest_commit.set(commit.clone());
        Ok(commit)
    }

    /// True when no path at the latest commit passes the filters.
    pub fn is_empty(&self) -> Result<bool> {
        let commit = self.latest_commit()?;
        let entries = self.repo.ls_tree(&commit, self.filter.base_path())?;
        Ok(!entries.iter().any(|e| self.filter.is_path_valid(&e.path)))
    }

    /// Commit recorded on `image`, or `None` if this artifact never synced
    /// into it.
    pub fn get_synced_commit(&self, image: &BuiltImage) -> Option<String> {
        image
            .label(&self.commit_label())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    /// Synced commit that is still present in history.
    pub fn usable_synced_commit(&self, image: &BuiltImage) -> Result<Option<String>> {
        match self.get_synced_commit(image) {
            Some(commit) if self.repo.is_commit_exists(&commit)? => Ok(Some(commit)),
            Some(commit) => {
                debug!(artifact = %self.name, commit = %commit, "synced commit no longer exists");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Filtered patch between two commits written to `out`. An empty `from`
    /// patches from the empty tree.
    pub fn build_patch<W: Write>(&self, from: &str, to: &str, out: &mut W) -> Result<DiffSummary> {
        let raw = self.repo.diff(from, to, self.filter.base_path())?;
        DiffParser::new(&self.filter, &self.name).parse(&raw, out)
    }

    /// Size in bytes of the filtered patch from `since` to the latest commit.
    pub fn patch_byte_size(&self, since: &str) -> Result<u64> {
        let latest = self.latest_commit()?;
        if since == latest {
            return Ok(0);
        }
        Ok(self.build_patch(since, &latest, &mut std::io::sink())?.bytes_written)
    }

    /// Digest of the filtered patch from `since` to latest; `None` when the
    /// patch would be empty.
    pub fn patch_digest(&self, since: &str) -> Result<Option<String>> {
        let latest = self.latest_commit()?;
        if since == latest {
            return Ok(None);
        }
        let mut buf = Vec::new();
        let summary = self.build_patch(since, &latest, &mut buf)?;
        if summary.paths.is_empty() {
            return Ok(None);
        }
        Ok(Some(sha256_bytes(&buf)))
    }

    /// Filtered tar of `commit`, paths relative to `add`.
    pub fn build_archive(&self, commit: &str, dest: &Path) -> Result<usize> {
        self.repo.archive(commit, &self.filter, dest)
    }

    /// Digest over (path, mode, blob) of filtered entries at the latest
    /// commit. With `watched`, only matching entries count.
    pub fn tree_checksum(&self, watched: Option<&[String]>) -> Result<String> {
        let commit = self.latest_commit()?;
        let mut lines: Vec<Vec<u8>> = self
            .repo
            .ls_tree(&commit, self.filter.base_path())?
            .into_iter()
            .filter(|e| match watched {
                Some(paths) => self.filter.is_path_watched(&e.path, paths),
                None => self.filter.is_path_valid(&e.path),
            })
            .map(|e| [e.path, format!(" {} {}", e.mode, e.object).into_bytes()].concat())
            .collect();
        lines.sort();
        Ok(sha256_bytes(&lines.join(&b'\0')))
    }

    /// Checksum of watched paths for `stage`; empty when nothing is watched.
    pub fn stage_dependencies_checksum(&self, stage: StageName) -> Result<String> {
        let watched = self.stage_dependencies.paths(stage);
        if watched.is_empty() {
            return Ok(String::new());
        }
        self.tree_checksum(Some(watched))
    }

    fn owner_spec(&self) -> Option<String> {
        match (&self.owner, &self.group) {
            (None, None) => None,
            (Some(o), None) => Some(o.clone()),
            (None, Some(g)) => Some(format!(":{g}")),
            (Some(o), Some(g)) => Some(format!("{o}:{g}")),
        }
    }

    /// Container commands extracting an archive mounted at `archive`.
    pub fn apply_archive_commands(&self, archive: &str) -> Vec<String> {
        let to = shell_quote(&self.to);
        let mut commands = vec![
            format!("mkdir -p {to}"),
            format!("tar -xf {} -C {to} --no-same-owner", shell_quote(archive)),
        ];
        if let Some(owner) = self.owner_spec() {
            commands.push(format!("chown -R {} {to}", shell_quote(&owner)));
        }
        commands
    }

    /// Container commands applying a patch mounted at `patch`. The image
    /// must provide `git`.
    ///
    /// `touched` is a NUL-separated list of paths relative to `to` that get
    /// re-owned after the patch is applied.
    pub fn apply_patch_commands(&self, patch: &str, touched: Option<&str>) -> Vec<String> {
        let to = self.to.trim_matches('/');
        let mut apply = String::from("git -C / apply --whitespace=nowarn --unsafe-paths");
        if !to.is_empty() {
            apply.push_str(&format!(" --directory={}", shell_quote(to)));
        }
        apply.push(' ');
        apply.push_str(&shell_quote(patch));

        let mut commands = vec![
            format!("mkdir -p {}", shell_quote(&self.to)),
            REQUIRE_GIT.to_string(),
            apply,
        ];
        if let (Some(owner), Some(list)) = (self.owner_spec(), touched) {
            commands.push(format!(
                "(cd {} && xargs -0 -r chown {} < {})",
                shell_quote(&self.to),
                shell_quote(&owner),
                shell_quote(list)
            ));
        }
        commands
    }

    /// Add a full archive of the latest commit to `spec`.
    pub fn prepare_archive(&self, work_dir: &Path, spec: &mut ImageSpec) -> Result<()> {
        let commit = self.latest_commit()?;
        let dir = git_work_dir(work_dir)?;
        let file = format!("{}-{}.tar", self.paramshash(), commit);
        let count = self.build_archive(&commit, &dir.join(&file))?;
        info!(artifact = %self.name, commit = %commit, entries = count, "prepared git archive");

        spec.add_volume(dir, CONTAINER_GIT_DIR, true);
        spec.add_run_commands(self.apply_archive_commands(&format!("{CONTAINER_GIT_DIR}/{file}")));
        spec.add_label(self.commit_label(), commit);
        Ok(())
    }

    /// Bring the layer synced on `prev` up to the latest commit. Falls back
    /// to a full archive when `prev` has no usable synced commit.
    pub fn prepare_patch(&self, work_dir: &Path, prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        let Some(synced) = self.usable_synced_commit(prev)? else {
            info!(artifact = %self.name, "no usable synced commit, falling back to archive");
            return self.prepare_archive(work_dir, spec);
        };
        let latest = self.latest_commit()?;
        if synced == latest {
            return Ok(());
        }

        let dir = git_work_dir(work_dir)?;
        let file = format!("{}-{}-{}.patch", self.paramshash(), synced, latest);
        let path = dir.join(&file);
        let mut out = BufWriter::new(File::create(&path)?);
        let summary = self.build_patch(&synced, &latest, &mut out)?;
        out.flush()?;
        info!(
            artifact = %self.name,
            from = %synced,
            to = %latest,
            files = summary.paths.len(),
            bytes = summary.bytes_written,
            "prepared git patch"
        );

        if !summary.paths.is_empty() {
            let touched = match self.owner_spec() {
                Some(_) => write_touched_list(&dir, &file, &summary)?,
                None => None,
            };
            let touched = touched.map(|list| format!("{CONTAINER_GIT_DIR}/{list}"));
            spec.add_volume(dir, CONTAINER_GIT_DIR, true);
            spec.add_run_commands(
                self.apply_patch_commands(&format!("{CONTAINER_GIT_DIR}/{file}"), touched.as_deref()),
            );
        }
        spec.add_label(self.commit_label(), latest);
        Ok(())
    }
}

fn git_work_dir(work_dir: &Path) -> Result<PathBuf> {
    let dir = work_dir.join("git");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write the paths a patch creates or modifies next to it, NUL-separated.
/// Returns the list's file name, or `None` when the patch only deletes.
fn write_touched_list(dir: &Path, patch: &str, summary: &DiffSummary) -> Result<Option<String>> {
    let mut list = Vec::new();
    for path in summary.paths.iter().filter(|p| p.kind != ChangeKind::Deleted) {
        list.extend_from_slice(&path.path);
        list.push(0);
    }
    if list.is_empty() {
        return Ok(None);
    }
    let name = format!("{patch}.paths");
    std::fs::write(dir.join(&name), list)?;
    Ok(Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::{commit_file, make_git_repo, run_git};
    use crate::error::DimgError;
    use crate::git::LocalGitRepo;

    fn export(add: &str, to: &str, include: &[&str]) -> GitExport {
        GitExport {
            add: add.to_string(),
            to: to.to_string(),
            include_paths: include.iter().map(|s| s.to_string()).collect(),
            exclude_paths: vec![],
            owner: None,
            group: None,
            stage_dependencies: None,
        }
    }

    /// Raw `git diff` the artifact parses, for byte comparisons.
    fn repo_diff(repo: &Path, from: &str, to: &str) -> Vec<u8> {
        LocalGitRepo::open(repo).unwrap().diff(from, to, "").unwrap()
    }

    fn local_artifact(repo: &Path, export: GitExport) -> GitArtifact {
        let own: Arc<dyn GitRepo> = Arc::new(LocalGitRepo::open(repo).unwrap());
        GitArtifact::local(
            own,
            &GitLocal {
                export,
                as_name: None,
            },
        )
    }

    #[test]
    fn test_empty_when_filters_match_nothing() {
        let repo = make_git_repo();
        commit_file(repo.path(), "docs/readme.md", "hello", "docs");
        let artifact = local_artifact(repo.path(), export("/", "/app", &["app"]));
        assert!(artifact.is_empty().unwrap());

        commit_file(repo.path(), "app/x.txt", "x", "app");
        let artifact = local_artifact(repo.path(), export("/", "/app", &["app"]));
        assert!(!artifact.is_empty().unwrap());
    }

    #[test]
    fn test_paramshash_ignores_commits_but_tracks_params() {
        let repo = make_git_repo();
        let a = local_artifact(repo.path(), export("/", "/app", &[]));
        let before = a.paramshash();
        commit_file(repo.path(), "x", "x", "x");
        let b = local_artifact(repo.path(), export("/", "/app", &[]));
        assert_eq!(before, b.paramshash());

        let c = local_artifact(repo.path(), export("/", "/srv", &[]));
        assert_ne!(before, c.paramshash());
        assert!(c.commit_label().starts_with("dimg-git-"));
        assert!(c.commit_label().ends_with("-commit"));
    }

    #[test]
    fn test_synced_commit_from_labels() {
        let repo = make_git_repo();
        let artifact = local_artifact(repo.path(), export("/", "/app", &[]));
        let mut image = BuiltImage::external("layer");
        assert_eq!(artifact.get_synced_commit(&image), None);

        image.labels.insert(artifact.commit_label(), "abc".to_string());
        assert_eq!(artifact.get_synced_commit(&image), Some("abc".to_string()));
        // Recorded but unknown to the repository.
        assert_eq!(artifact.usable_synced_commit(&image).unwrap(), None);
    }

    #[test]
    fn test_patch_is_filtered_and_rebased() {
        let repo = make_git_repo();
        let c1 = commit_file(repo.path(), "app/x.txt", "one\n", "c1");
        commit_file(repo.path(), "docs/readme.md", "docs\n", "docs");
        let c3 = commit_file(repo.path(), "app/x.txt", "two\n", "c3");

        let artifact = local_artifact(repo.path(), export("/app", "/srv/app", &[]));
        let mut out = Vec::new();
        let summary = artifact.build_patch(&c1, &c3, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("diff --git a/x.txt b/x.txt\n"));
        assert!(!text.contains("readme"));
        assert_eq!(summary.paths.len(), 1);
        assert_eq!(summary.paths[0].kind, ChangeKind::Modified);
        assert_eq!(artifact.patch_byte_size(&c1).unwrap(), text.len() as u64);
        assert_eq!(artifact.patch_byte_size(&c3).unwrap(), 0);
    }

    #[test]
    fn test_unrelated_commit_leaves_patch_digest_empty() {
        let repo = make_git_repo();
        let c1 = commit_file(repo.path(), "app/x.txt", "one\n", "c1");
        commit_file(repo.path(), "docs/readme.md", "docs\n", "docs");
        let artifact = local_artifact(repo.path(), export("/", "/app", &["app"]));
        assert_eq!(artifact.patch_digest(&c1).unwrap(), None);
    }

    #[test]
    fn test_stage_dependencies_checksum_follows_watched_paths() {
        let repo = make_git_repo();
        commit_file(repo.path(), "Gemfile", "gem 'a'\n", "gemfile");
        let mut exp = export("/", "/app", &[]);
        exp.stage_dependencies = Some(StageDependencies {
            install: vec!["Gemfile".to_string()],
            ..Default::default()
        });

        let first = local_artifact(repo.path(), exp.clone());
        let install = first.stage_dependencies_checksum(StageName::Install).unwrap();
        assert!(!install.is_empty());
        assert_eq!(first.stage_dependencies_checksum(StageName::Setup).unwrap(), "");

        commit_file(repo.path(), "main.rb", "puts 1\n", "unrelated");
        let second = local_artifact(repo.path(), exp.clone());
        assert_eq!(second.stage_dependencies_checksum(StageName::Install).unwrap(), install);

        commit_file(repo.path(), "Gemfile", "gem 'b'\n", "bump");
        let third = local_artifact(repo.path(), exp);
        assert_ne!(third.stage_dependencies_checksum(StageName::Install).unwrap(), install);
    }

    #[test]
    fn test_prepare_patch_falls_back_to_archive() {
        let repo = make_git_repo();
        commit_file(repo.path(), "app/x.txt", "x\n", "c1");
        let artifact = local_artifact(repo.path(), export("/", "/app", &[]));
        let work = tempfile::tempdir().unwrap();

        let mut spec = ImageSpec::new();
        artifact
            .prepare_patch(work.path(), &BuiltImage::external("alpine"), &mut spec)
            .unwrap();
        assert!(spec.run_commands.iter().any(|c| c.starts_with("tar -xf")));
        assert_eq!(
            spec.labels.get(&artifact.commit_label()),
            Some(&artifact.latest_commit().unwrap())
        );
    }

    #[test]
    fn test_prepare_patch_applies_difference() {
        let repo = make_git_repo();
        let c1 = commit_file(repo.path(), "app/x.txt", "x\n", "c1");
        commit_file(repo.path(), "app/x.txt", "y\n", "c2");
        let mut exp = export("/", "/app", &[]);
        exp.owner = Some("www".to_string());
        let artifact = local_artifact(repo.path(), exp);
        let work = tempfile::tempdir().unwrap();

        let mut prev = BuiltImage::external("layer");
        prev.labels.insert(artifact.commit_label(), c1);
        let mut spec = ImageSpec::new();
        artifact.prepare_patch(work.path(), &prev, &mut spec).unwrap();

        assert_eq!(spec.run_commands[1], REQUIRE_GIT);
        assert!(spec.run_commands[2].starts_with("git -C / apply"));
        assert!(spec.run_commands[2].contains("--directory=app"));
        assert!(spec.run_commands[3].starts_with("(cd /app && xargs -0 -r chown www < /.dimg/git/"));
        assert!(spec.run_commands[3].ends_with(".patch.paths)"));
        assert_eq!(spec.volumes[0].container, CONTAINER_GIT_DIR);

        let list = std::fs::read_dir(work.path().join("git"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|e| e == "paths"))
            .unwrap();
        assert_eq!(std::fs::read(list).unwrap(), b"app/x.txt\0");
    }

    #[test]
    fn test_remote_artifact_follows_tag() {
        let upstream = make_git_repo();
        let v1 = commit_file(upstream.path(), "lib.rs", "v1", "v1");
        run_git(upstream.path(), &["tag", "v1"]);
        commit_file(upstream.path(), "lib.rs", "v2", "v2");

        let build = tempfile::tempdir().unwrap();
        let url = upstream.path().to_string_lossy().into_owned();
        let repo = crate::git::RemoteGitRepo::new("lib", &url, build.path()).unwrap();
        repo.clone_and_fetch().unwrap();
        let config = GitRemote {
            name: "lib".to_string(),
            url,
            branch: Some("main".to_string()),
            tag: Some("v1".to_string()),
            commit: None,
            export: export("/", "/lib", &[]),
        };
        let artifact = GitArtifact::remote(Arc::new(repo), &config);
        assert_eq!(artifact.latest_commit().unwrap(), v1);
        assert_eq!(artifact.name(), "lib");
    }

    #[test]
    fn test_patch_keeps_control_character_names() {
        let repo = make_git_repo();
        let c1 = commit_file(repo.path(), "app/bell\u{7}.txt", "one\n", "c1");
        let c2 = commit_file(repo.path(), "app/bell\u{7}.txt", "two\n", "c2");
        let raw = repo_diff(repo.path(), &c1, &c2);
        assert!(raw.starts_with(b"diff --git \"a/app/bell\\a.txt\""));

        let artifact = local_artifact(repo.path(), export("/", "/srv", &[]));
        let mut out = Vec::new();
        let summary = artifact.build_patch(&c1, &c2, &mut out).unwrap();
        assert_eq!(out, raw);
        assert_eq!(summary.paths[0].path, b"app/bell\x07.txt");

        let rebased = local_artifact(repo.path(), export("/app", "/srv", &[]));
        let mut out = Vec::new();
        rebased.build_patch(&c1, &c2, &mut out).unwrap();
        assert!(out.starts_with(b"diff --git \"a/bell\\a.txt\" \"b/bell\\a.txt\"\n"));
        assert!(out.windows(18).any(|w| w == b"--- \"a/bell\\a.txt\"".as_slice()));
    }

    #[cfg(unix)]
    #[test]
    fn test_patch_keeps_non_utf8_names() {
        use std::os::unix::ffi::OsStrExt;

        let repo = make_git_repo();
        let file = repo.path().join(std::ffi::OsStr::from_bytes(b"f\xffx.txt"));
        let commit = |content: &str| {
            std::fs::write(&file, content).unwrap();
            run_git(repo.path(), &["add", "-A"]);
            run_git(repo.path(), &["commit", "-m", content]);
            run_git(repo.path(), &["rev-parse", "HEAD"])
        };
        let c1 = commit("one\n");
        let c2 = commit("two\n");

        let artifact = local_artifact(repo.path(), export("/", "/srv", &[]));
        let mut out = Vec::new();
        let summary = artifact.build_patch(&c1, &c2, &mut out).unwrap();
        assert_eq!(out, repo_diff(repo.path(), &c1, &c2));
        assert_eq!(summary.paths[0].path, b"f\xffx.txt");
    }

    #[test]
    fn test_missing_remote_branch_names_the_repository() {
        let upstream = make_git_repo();
        commit_file(upstream.path(), "lib.rs", "v1", "v1");
        let build = tempfile::tempdir().unwrap();
        let url = upstream.path().to_string_lossy().into_owned();
        let repo = crate::git::RemoteGitRepo::new("lib", &url, build.path()).unwrap();
        repo.clone_and_fetch().unwrap();

        let config = GitRemote {
            name: "lib".to_string(),
            url: url.clone(),
            branch: Some("no-such-branch".to_string()),
            tag: None,
            commit: None,
            export: export("/", "/lib", &[]),
        };
        let artifact = GitArtifact::remote(Arc::new(repo), &config);
        match artifact.latest_commit().unwrap_err() {
            DimgError::GitOperation { repo, message } => {
                assert!(repo.contains("lib"));
                assert!(repo.contains(&url));
                assert!(message.contains("no-such-branch"));
            }
            other => panic!("expected GitOperation, got {other:?}"),
        }
    }
}
