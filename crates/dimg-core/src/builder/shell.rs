use std::path::Path;

use crate::builder::Builder;
use crate::config::ShellConfig;
use crate::digest::sha256_hash;
use crate::error::Result;
use crate::image::ImageSpec;
use crate::stage::UserStageName;

/// Runs declared shell commands verbatim.
#[derive(Debug, Clone)]
pub struct Shell {
    config: ShellConfig,
}

impl Shell {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }
}

impl Builder for Shell {
    fn is_empty(&self, stage: UserStageName) -> bool {
        self.config.stage(stage).items.is_empty()
    }

    fn checksum(&self, stage: UserStageName) -> Result<String> {
        let directive = self.config.stage(stage);
        let mut parts: Vec<&str> = directive.items.iter().map(String::as_str).collect();
        parts.push(directive.stage_cache_version);
        parts.push(directive.cache_version);
        Ok(sha256_hash(&parts))
    }

    fn apply(&self, stage: UserStageName, spec: &mut ImageSpec, _work_dir: &Path) -> Result<()> {
        spec.add_run_commands(self.config.stage(stage).items.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> Shell {
        Shell::new(ShellConfig {
            install: vec!["apt-get update".to_string(), "apt-get install -y curl".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_stages() {
        let shell = shell();
        assert!(!shell.is_empty(UserStageName::Install));
        assert!(shell.is_empty(UserStageName::Setup));
    }

    #[test]
    fn test_checksum_tracks_commands_and_cache_versions() {
        let base = shell().checksum(UserStageName::Install).unwrap();
        assert_eq!(base, shell().checksum(UserStageName::Install).unwrap());

        let mut bumped = shell();
        bumped.config.install_cache_version = "2".to_string();
        assert_ne!(base, bumped.checksum(UserStageName::Install).unwrap());

        let mut global = shell();
        global.config.cache_version = "2".to_string();
        assert_ne!(base, global.checksum(UserStageName::Install).unwrap());

        let mut reordered = shell();
        reordered.config.install.reverse();
        assert_ne!(base, reordered.checksum(UserStageName::Install).unwrap());
    }

    #[test]
    fn test_apply_adds_run_commands() {
        let mut spec = ImageSpec::new();
        shell()
            .apply(UserStageName::Install, &mut spec, Path::new("/unused"))
            .unwrap();
        assert_eq!(spec.run_commands.len(), 2);
        assert_eq!(spec.run_commands[0], "apt-get update");
    }
}
