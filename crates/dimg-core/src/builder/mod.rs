//! User-stage backends.
//!
//! A builder turns the commands or tasks declared for a user stage into a
//! checksum (for the signature) and into run commands on an [`ImageSpec`].

pub mod ansible;
pub mod shell;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::BuilderConfig;
use crate::error::Result;
use crate::image::ImageSpec;
use crate::stage::UserStageName;

pub use ansible::Ansible;
pub use shell::Shell;

pub trait Builder: Send + Sync + fmt::Debug {
    /// True when nothing is declared for `stage`.
    fn is_empty(&self, stage: UserStageName) -> bool;

    /// Deterministic digest of what is declared for `stage`.
    fn checksum(&self, stage: UserStageName) -> Result<String>;

    /// Add the commands for `stage` to `spec`. `work_dir` is a host scratch
    /// directory private to this image.
    fn apply(&self, stage: UserStageName, spec: &mut ImageSpec, work_dir: &Path) -> Result<()>;
}

/// Builder for a declared configuration.
pub fn from_config(config: &BuilderConfig) -> Arc<dyn Builder> {
    match config {
        BuilderConfig::Shell(shell) => Arc::new(Shell::new(shell.clone())),
        BuilderConfig::Ansible(ansible) => Arc::new(Ansible::new(ansible.clone())),
    }
}
