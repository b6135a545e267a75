//! Resolved image definitions consumed by the build pipeline.
//!
//! These structures are produced by an external loader that has already
//! validated the schema. Nothing here re-checks user input beyond what the
//! pipeline needs to resolve references.

pub mod tree;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::stage::{StageName, UserStageName};

pub use tree::DimgConfig;

/// All images declared by a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dappfile {
    #[serde(default)]
    pub dimgs: Vec<Dimg>,

    #[serde(default)]
    pub artifacts: Vec<DimgArtifact>,
}

impl Dappfile {
    /// Shippable image by name.
    pub fn dimg(&self, name: &str) -> Option<&Dimg> {
        self.dimgs.iter().find(|d| d.base.name == name)
    }

    /// Artifact image by name.
    pub fn artifact(&self, name: &str) -> Option<&DimgArtifact> {
        self.artifacts.iter().find(|a| a.base.name == name)
    }
}

/// Where an image starts from. Exactly one kind of base per image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseImage {
    /// External image reference, e.g. `ubuntu:22.04`.
    Image(String),
    /// Another shippable image of this project.
    Dimg(String),
    /// An artifact image of this project.
    Artifact(String),
}

/// Fields shared by shippable and artifact images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimgBase {
    pub name: String,

    pub from: BaseImage,

    #[serde(default)]
    pub from_cache_version: String,

    #[serde(default)]
    pub mounts: Vec<Mount>,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub builder: Option<BuilderConfig>,

    #[serde(default)]
    pub imports: Vec<ArtifactImport>,
}

/// Shippable image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimg {
    #[serde(flatten)]
    pub base: DimgBase,

    #[serde(default)]
    pub docker: Option<DockerInstructions>,
}

/// Intermediate image, consumed only through imports or as a base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimgArtifact {
    #[serde(flatten)]
    pub base: DimgBase,
}

/// Host side of a build-time mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountSource {
    /// Per-image temporary directory, discarded after the run.
    TmpDir,
    /// Project build directory, persisted between runs.
    BuildDir,
    /// Arbitrary host path.
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub from: MountSource,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default)]
    pub local: Vec<GitLocal>,

    #[serde(default)]
    pub remote: Vec<GitRemote>,
}

fn default_add() -> String {
    "/".to_string()
}

/// Export parameters shared by local and remote git declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitExport {
    /// Source path inside the repository.
    #[serde(default = "default_add")]
    pub add: String,

    /// Destination path inside the image.
    pub to: String,

    #[serde(default)]
    pub include_paths: Vec<String>,

    #[serde(default)]
    pub exclude_paths: Vec<String>,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub stage_dependencies: Option<StageDependencies>,
}

/// Paths whose changes re-run a user stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDependencies {
    #[serde(default)]
    pub install: Vec<String>,

    #[serde(default)]
    pub before_setup: Vec<String>,

    #[serde(default)]
    pub setup: Vec<String>,
}

impl StageDependencies {
    /// Watched paths for `stage`. `beforeInstall` never watches git paths.
    pub fn paths(&self, stage: StageName) -> &[String] {
        match stage {
            StageName::Install => &self.install,
            StageName::BeforeSetup => &self.before_setup,
            StageName::Setup => &self.setup,
            _ => &[],
        }
    }
}

/// Git artifact from the project's own checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLocal {
    #[serde(flatten)]
    pub export: GitExport,

    #[serde(default, rename = "as")]
    pub as_name: Option<String>,
}

/// Git artifact from a named remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRemote {
    pub name: String,

    pub url: String,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub commit: Option<String>,

    #[serde(flatten)]
    pub export: GitExport,
}

/// User stage commands, one backend per image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderConfig {
    Shell(ShellConfig),
    Ansible(AnsibleConfig),
}

/// Items and cache version declared for one user stage.
#[derive(Debug, Clone, Copy)]
pub struct StageDirective<'a, T> {
    pub items: &'a [T],
    pub stage_cache_version: &'a str,
    pub cache_version: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default)]
    pub before_install: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub before_setup: Vec<String>,
    #[serde(default)]
    pub setup: Vec<String>,

    #[serde(default)]
    pub cache_version: String,
    #[serde(default)]
    pub before_install_cache_version: String,
    #[serde(default)]
    pub install_cache_version: String,
    #[serde(default)]
    pub before_setup_cache_version: String,
    #[serde(default)]
    pub setup_cache_version: String,
}

impl ShellConfig {
    pub fn stage(&self, stage: UserStageName) -> StageDirective<'_, String> {
        let (items, stage_cache_version) = match stage {
            UserStageName::BeforeInstall => {
                (&self.before_install, &self.before_install_cache_version)
            }
            UserStageName::Install => (&self.install, &self.install_cache_version),
            UserStageName::BeforeSetup => (&self.before_setup, &self.before_setup_cache_version),
            UserStageName::Setup => (&self.setup, &self.setup_cache_version),
        };
        StageDirective {
            items,
            stage_cache_version,
            cache_version: &self.cache_version,
        }
    }
}

/// Ansible tasks are opaque JSON documents; only their content matters here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnsibleConfig {
    #[serde(default)]
    pub before_install: Vec<serde_json::Value>,
    #[serde(default)]
    pub install: Vec<serde_json::Value>,
    #[serde(default)]
    pub before_setup: Vec<serde_json::Value>,
    #[serde(default)]
    pub setup: Vec<serde_json::Value>,

    #[serde(default)]
    pub cache_version: String,
    #[serde(default)]
    pub before_install_cache_version: String,
    #[serde(default)]
    pub install_cache_version: String,
    #[serde(default)]
    pub before_setup_cache_version: String,
    #[serde(default)]
    pub setup_cache_version: String,
}

impl AnsibleConfig {
    pub fn stage(&self, stage: UserStageName) -> StageDirective<'_, serde_json::Value> {
        let (items, stage_cache_version) = match stage {
            UserStageName::BeforeInstall => {
                (&self.before_install, &self.before_install_cache_version)
            }
            UserStageName::Install => (&self.install, &self.install_cache_version),
            UserStageName::BeforeSetup => (&self.before_setup, &self.before_setup_cache_version),
            UserStageName::Setup => (&self.setup, &self.setup_cache_version),
        };
        StageDirective {
            items,
            stage_cache_version,
            cache_version: &self.cache_version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPoint {
    Install,
    Setup,
}

/// Files copied out of an artifact image into this image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactImport {
    pub artifact: String,

    #[serde(default)]
    pub before: Option<ImportPoint>,

    #[serde(default)]
    pub after: Option<ImportPoint>,

    pub add: String,

    #[serde(default)]
    pub to: Option<String>,

    #[serde(default)]
    pub include_paths: Vec<String>,

    #[serde(default)]
    pub exclude_paths: Vec<String>,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub group: Option<String>,
}

impl ArtifactImport {
    /// Destination path, defaulting to the source path.
    pub fn destination(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.add)
    }

    /// Import stage this declaration belongs to.
    pub fn stage(&self) -> Option<StageName> {
        match (self.before, self.after) {
            (Some(ImportPoint::Install), _) => Some(StageName::BeforeInstallArtifactImport),
            (Some(ImportPoint::Setup), _) => Some(StageName::BeforeSetupArtifactImport),
            (None, Some(ImportPoint::Install)) => Some(StageName::AfterInstallArtifactImport),
            (None, Some(ImportPoint::Setup)) => Some(StageName::AfterSetupArtifactImport),
            (None, None) => None,
        }
    }
}

/// Dockerfile-style instructions applied to the final image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerInstructions {
    #[serde(default)]
    pub volume: Vec<String>,
    #[serde(default)]
    pub expose: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub onbuild: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
}

impl DockerInstructions {
    /// Render as `docker commit --change` values.
    pub fn change_options(&self) -> Vec<String> {
        let mut changes = Vec::new();
        if !self.volume.is_empty() {
            changes.push(format!("VOLUME {}", json_array(&self.volume)));
        }
        if !self.expose.is_empty() {
            changes.push(format!("EXPOSE {}", self.expose.join(" ")));
        }
        for (k, v) in &self.env {
            changes.push(format!("ENV {}={}", k, quote(v)));
        }
        for (k, v) in &self.label {
            changes.push(format!("LABEL {}={}", k, quote(v)));
        }
        if !self.cmd.is_empty() {
            changes.push(format!("CMD {}", json_array(&self.cmd)));
        }
        for instruction in &self.onbuild {
            changes.push(format!("ONBUILD {}", instruction));
        }
        if let Some(workdir) = &self.workdir {
            changes.push(format!("WORKDIR {}", workdir));
        }
        if let Some(user) = &self.user {
            changes.push(format!("USER {}", user));
        }
        if !self.entrypoint.is_empty() {
            changes.push(format!("ENTRYPOINT {}", json_array(&self.entrypoint)));
        }
        changes
    }
}

fn json_array(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dappfile_deserializes_resolved_document() {
        let doc = serde_json::json!({
            "dimgs": [{
                "name": "app",
                "from": { "image": "ubuntu:22.04" },
                "mounts": [
                    { "from": "tmp_dir", "to": "/var/cache/apt" },
                    { "from": { "path": "/opt/cache" }, "to": "/cache" }
                ],
                "git": {
                    "local": [{ "add": "/", "to": "/app", "include_paths": ["app"] }],
                    "remote": [{
                        "name": "lib",
                        "url": "https://example.com/lib.git",
                        "branch": "main",
                        "to": "/lib",
                        "stage_dependencies": { "install": ["Gemfile"] }
                    }]
                },
                "builder": { "shell": { "install": ["make"], "cache_version": "1" } },
                "docker": { "expose": ["80"] }
            }],
            "artifacts": [{
                "name": "assets",
                "from": { "dimg": "app" }
            }]
        });

        let dappfile: Dappfile = serde_json::from_value(doc).unwrap();
        let app = dappfile.dimg("app").unwrap();
        assert_eq!(app.base.from, BaseImage::Image("ubuntu:22.04".to_string()));
        assert_eq!(app.base.mounts[0].from, MountSource::TmpDir);
        assert_eq!(
            app.base.mounts[1].from,
            MountSource::Path(PathBuf::from("/opt/cache"))
        );
        assert_eq!(app.base.git.local[0].export.add, "/");
        assert_eq!(
            app.base.git.remote[0]
                .export
                .stage_dependencies
                .as_ref()
                .unwrap()
                .paths(StageName::Install),
            ["Gemfile".to_string()]
        );
        assert!(dappfile.artifact("assets").is_some());
        assert!(dappfile.artifact("app").is_none());
    }

    #[test]
    fn test_shell_stage_accessor() {
        let shell = ShellConfig {
            install: vec!["make".to_string()],
            install_cache_version: "2".to_string(),
            cache_version: "1".to_string(),
            ..Default::default()
        };
        let install = shell.stage(UserStageName::Install);
        assert_eq!(install.items, ["make".to_string()]);
        assert_eq!(install.stage_cache_version, "2");
        assert_eq!(install.cache_version, "1");
        assert!(shell.stage(UserStageName::Setup).items.is_empty());
    }

    #[test]
    fn test_import_stage_selection() {
        let mut import = ArtifactImport {
            artifact: "assets".to_string(),
            before: Some(ImportPoint::Setup),
            after: None,
            add: "/build".to_string(),
            to: None,
            include_paths: vec![],
            exclude_paths: vec![],
            owner: None,
            group: None,
        };
        assert_eq!(import.stage(), Some(StageName::BeforeSetupArtifactImport));
        assert_eq!(import.destination(), "/build");

        import.before = None;
        import.after = Some(ImportPoint::Install);
        assert_eq!(import.stage(), Some(StageName::AfterInstallArtifactImport));
    }

    #[test]
    fn test_docker_change_options() {
        let docker = DockerInstructions {
            expose: vec!["80".to_string(), "443/tcp".to_string()],
            cmd: vec!["nginx".to_string(), "-g".to_string()],
            workdir: Some("/app".to_string()),
            ..Default::default()
        };
        let changes = docker.change_options();
        assert_eq!(
            changes,
            vec![
                "EXPOSE 80 443/tcp".to_string(),
                r#"CMD ["nginx","-g"]"#.to_string(),
                "WORKDIR /app".to_string(),
            ]
        );
    }
}
