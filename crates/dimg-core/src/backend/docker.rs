//! Docker CLI image store.
//!
//! A stage layer is produced by running the image spec's commands in a throwaway
//! container started from the parent layer and committing that container
//! as `dimgstage-<project>:<signature>`.
//!
//! Stage scripts run with the parent's `/bin/sh`. Git patch stages also call
//! `git apply` inside the container, so images that receive patches need
//! `git` installed (for example `apk add git` in `beforeInstall`).

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::{stage_repository, ImageBackend};
use crate::error::{DimgError, Result};
use crate::git::PathFilter;
use crate::image::{shell_quote, BuiltImage, ImageImport, ImageSpec};

/// Container directory where imported artifact files are mounted.
const CONTAINER_IMPORT_DIR: &str = "/.dimg/import";

#[derive(Debug, Clone)]
pub struct DockerBackend {
    repository: String,
}

impl DockerBackend {
    pub fn new(project: &str) -> Self {
        Self {
            repository: stage_repository(project),
        }
    }

    async fn docker(&self, args: &[String]) -> Result<Output> {
        debug!(args = ?args, "docker");
        Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DimgError::Backend(format!("failed to run docker: {e}")))
    }

    async fn docker_ok(&self, args: &[String]) -> Result<String> {
        let output = self.docker(args).await?;
        if !output.status.success() {
            return Err(DimgError::Backend(format!(
                "docker {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn inspect(&self, image: &str, format: &str) -> Result<Option<String>> {
        let output = self
            .docker(&strings(&["image", "inspect", "--format", format, image]))
            .await?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("no such") {
            return Ok(None);
        }
        Err(DimgError::Backend(format!(
            "docker image inspect {image} failed: {}",
            stderr.trim()
        )))
    }

    /// `ENTRYPOINT`/`CMD` of `parent`, pulling it first when missing.
    async fn restore_changes(&self, parent: &str) -> Result<Vec<String>> {
        let format = "{{json .Config.Entrypoint}}\t{{json .Config.Cmd}}";
        let config = match self.inspect(parent, format).await? {
            Some(config) => config,
            None => {
                info!(image = %parent, "pulling base image");
                self.docker_ok(&strings(&["pull", parent])).await?;
                self.inspect(parent, format).await?.ok_or_else(|| {
                    DimgError::Backend(format!("image {parent} missing after pull"))
                })?
            }
        };
        let (entrypoint, cmd) = config.split_once('\t').unwrap_or((config.as_str(), "null"));
        Ok(vec![
            format!("ENTRYPOINT {}", json_or_empty(entrypoint)),
            format!("CMD {}", json_or_empty(cmd)),
        ])
    }

    /// Copy each import's source directory out of its image into `staging`
    /// and return the mounts and commands that install it.
    async fn stage_imports(
        &self,
        imports: &[ImageImport],
        staging: &Path,
    ) -> Result<(Vec<(std::path::PathBuf, String)>, Vec<String>)> {
        let mut volumes = Vec::new();
        let mut commands = Vec::new();
        for (i, import) in imports.iter().enumerate() {
            let host = staging.join(format!("import-{i}"));
            std::fs::create_dir_all(&host)?;

            let container = format!("dimg-import-{}", uuid::Uuid::new_v4());
            self.docker_ok(&strings(&[
                "create",
                "--name",
                &container,
                "--entrypoint",
                "/bin/true",
                &import.image,
            ]))
            .await?;
            let source = format!("{container}:{}/.", import.add.trim_end_matches('/'));
            let copied = self
                .docker_ok(&[
                    "cp".to_string(),
                    source,
                    host.to_string_lossy().into_owned(),
                ])
                .await;
            self.docker(&strings(&["rm", "-f", &container])).await?;
            copied?;

            let filter = PathFilter::new("/", &import.include_paths, &import.exclude_paths);
            filter_tree(&host, &host, &filter)?;

            let mount = format!("{CONTAINER_IMPORT_DIR}/{i}");
            commands.extend(import_commands(import, &mount));
            volumes.push((host, mount));
        }
        Ok((volumes, commands))
    }
}

#[async_trait]
impl ImageBackend for DockerBackend {
    fn image_name(&self, signature: &str) -> String {
        format!("{}:{}", self.repository, signature)
    }

    async fn lookup(&self, signature: &str) -> Result<Option<BuiltImage>> {
        let name = self.image_name(signature);
        let Some(raw) = self.inspect(&name, "{{json .Config.Labels}}").await? else {
            return Ok(None);
        };
        let labels: Option<BTreeMap<String, String>> = serde_json::from_str(&raw)?;
        Ok(Some(BuiltImage {
            name,
            labels: labels.unwrap_or_default(),
        }))
    }

    async fn commit(&self, parent: &BuiltImage, spec: &ImageSpec, signature: &str) -> Result<BuiltImage> {
        let name = self.image_name(signature);
        let container = format!("dimg-{}", uuid::Uuid::new_v4());
        let restore = self.restore_changes(&parent.name).await?;

        let staging = tempfile::Builder::new().prefix("dimg-import-").tempdir()?;
        let (import_volumes, import_commands) = self.stage_imports(&spec.imports, staging.path()).await?;

        let mut script: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("export {}={}", k, shell_quote(v)))
            .collect();
        script.extend(import_commands);
        script.extend(spec.run_commands.iter().cloned());

        let mut args = strings(&["run", "--name", &container, "--entrypoint", "/bin/sh"]);
        for volume in &spec.volumes {
            args.push("--volume".to_string());
            args.push(volume_arg(&volume.host, &volume.container, volume.read_only));
        }
        for (host, mount) in &import_volumes {
            args.push("--volume".to_string());
            args.push(volume_arg(host, mount, true));
        }
        args.push(parent.name.clone());
        args.push("-ec".to_string());
        args.push(if script.is_empty() { "true".to_string() } else { script.join("\n") });

        info!(image = %name, parent = %parent.name, commands = script.len(), "building stage layer");
        let run = self.docker_ok(&args).await;
        let committed = match run {
            Ok(_) => {
                let mut commit = vec!["commit".to_string()];
                for change in commit_changes(&restore, spec) {
                    commit.push("--change".to_string());
                    commit.push(change);
                }
                commit.push(container.clone());
                commit.push(name.clone());
                self.docker_ok(&commit).await.map(|_| ())
            }
            Err(e) => Err(e),
        };
        self.docker(&strings(&["rm", "-f", &container])).await?;
        committed?;

        Ok(parent.child(name, spec))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn json_or_empty(raw: &str) -> &str {
    match raw.trim() {
        "" | "null" => "[]",
        other => other,
    }
}

fn volume_arg(host: &Path, container: &str, read_only: bool) -> String {
    let mut arg = format!("{}:{}", host.display(), container);
    if read_only {
        arg.push_str(":ro");
    }
    arg
}

/// `docker commit --change` values: restored entrypoint and command first,
/// then the image spec's own instructions, then labels.
fn commit_changes(restore: &[String], spec: &ImageSpec) -> Vec<String> {
    let mut changes = restore.to_vec();
    changes.extend(spec.change_options.iter().cloned());
    for (key, value) in &spec.labels {
        changes.push(format!("LABEL {}={}", key, serde_json::Value::from(value.as_str())));
    }
    changes
}

fn import_commands(import: &ImageImport, mount: &str) -> Vec<String> {
    let to = shell_quote(&import.to);
    let mut commands = vec![
        format!("mkdir -p {to}"),
        format!("cp -a {}/. {to}", shell_quote(mount)),
    ];
    let owner = match (&import.owner, &import.group) {
        (None, None) => None,
        (Some(o), None) => Some(o.clone()),
        (None, Some(g)) => Some(format!(":{g}")),
        (Some(o), Some(g)) => Some(format!("{o}:{g}")),
    };
    if let Some(owner) = owner {
        commands.push(format!("chown -R {} {to}", shell_quote(&owner)));
    }
    commands
}

/// Remove every file below `dir` whose path relative to `root` fails
/// `filter`.
fn filter_tree(root: &Path, dir: &Path, filter: &PathFilter) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            filter_tree(root, &path, filter)?;
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .map_err(|e| DimgError::InternalInvariant(format!("import path outside staging dir: {e}")))?
            .to_string_lossy()
            .replace('\\', "/");
        if !filter.is_path_valid(&rel) {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
