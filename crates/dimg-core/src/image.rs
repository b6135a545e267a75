//! In-memory description of one build step and of built layers.
//!
//! Stages only ever mutate an [`ImageSpec`]; turning it into a layer is the
//! job of an [`crate::backend::ImageBackend`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Label holding the stage signature of a built layer.
pub const SIGNATURE_LABEL: &str = "dimg-stage-signature";

/// Host directory mounted into the build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

/// Files to copy out of another built image into this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageImport {
    /// Built image to copy from.
    pub image: String,
    pub add: String,
    pub to: String,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// Build-container specification for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub imports: Vec<ImageImport>,
    pub run_commands: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub change_options: Vec<String>,
}

impl ImageSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Mount `host` at `container`; repeated identical mounts are kept once.
    pub fn add_volume(&mut self, host: impl Into<PathBuf>, container: impl Into<String>, read_only: bool) {
        let volume = Volume {
            host: host.into(),
            container: container.into(),
            read_only,
        };
        if !self.volumes.contains(&volume) {
            self.volumes.push(volume);
        }
    }

    pub fn add_import(&mut self, import: ImageImport) {
        self.imports.push(import);
    }

    pub fn add_run_commands<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_commands.extend(commands.into_iter().map(Into::into));
    }

    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }

    pub fn add_change_options<I, S>(&mut self, changes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.change_options.extend(changes.into_iter().map(Into::into));
    }
}

/// A layer that exists (or, while planning, would exist) in the image store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl BuiltImage {
    /// External base image; it carries no labels of ours.
    pub fn external(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn signature(&self) -> Option<&str> {
        self.label(SIGNATURE_LABEL)
    }

    /// Layer produced by committing `spec` on top of `self`: labels are
    /// inherited and then overridden by the image spec's.
    pub fn child(&self, name: impl Into<String>, spec: &ImageSpec) -> Self {
        let mut labels = self.labels.clone();
        labels.extend(spec.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            name: name.into(),
            labels,
        }
    }
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
