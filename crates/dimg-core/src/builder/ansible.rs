//! Ansible-backed user stages.
//!
//! Tasks are written into a playbook inside a per-stage host directory that
//! is mounted read-only into the build container, where `ansible-playbook`
//! runs against localhost.

use std::path::Path;

use serde_json::json;

use crate::builder::Builder;
use crate::config::AnsibleConfig;
use crate::digest::{canonical_json, sha256_hash};
use crate::error::Result;
use crate::image::ImageSpec;
use crate::stage::UserStageName;

/// Extra `ansible-playbook` arguments taken from the environment at apply time.
pub const ANSIBLE_ARGS_ENV: &str = "ANSIBLE_ARGS";

const CONTAINER_WORK_DIR: &str = "/.dimg/ansible-workdir";

const HOSTS: &str = "localhost ansible_connection=local ansible_python_interpreter=/usr/bin/python3\n";

#[derive(Debug, Clone)]
pub struct Ansible {
    config: AnsibleConfig,
}

impl Ansible {
    pub fn new(config: AnsibleConfig) -> Self {
        Self { config }
    }

    fn playbook(&self, stage: UserStageName) -> serde_json::Value {
        json!([{
            "hosts": "all",
            "gather_facts": "no",
            "tasks": self.config.stage(stage).items,
        }])
    }

    fn ansible_cfg() -> String {
        format!(
            "[defaults]\n\
             inventory = {CONTAINER_WORK_DIR}/hosts\n\
             retry_files_enabled = False\n\
             nocows = 1\n\
             \n\
             [privilege_escalation]\n\
             become = False\n"
        )
    }
}

impl Builder for Ansible {
    fn is_empty(&self, stage: UserStageName) -> bool {
        self.config.stage(stage).items.is_empty()
    }

    fn checksum(&self, stage: UserStageName) -> Result<String> {
        let directive = self.config.stage(stage);
        let mut parts = directive
            .items
            .iter()
            .map(canonical_json)
            .collect::<Result<Vec<_>>>()?;
        parts.push(directive.stage_cache_version.to_string());
        parts.push(directive.cache_version.to_string());
        Ok(sha256_hash(&parts))
    }

    fn apply(&self, stage: UserStageName, spec: &mut ImageSpec, work_dir: &Path) -> Result<()> {
        let dir = work_dir.join("ansible").join(stage.as_str());
        std::fs::create_dir_all(&dir)?;
        // JSON is valid YAML.
        std::fs::write(
            dir.join("playbook.yml"),
            serde_json::to_string_pretty(&self.playbook(stage))?,
        )?;
        std::fs::write(dir.join("hosts"), HOSTS)?;
        std::fs::write(dir.join("ansible.cfg"), Self::ansible_cfg())?;

        spec.add_volume(dir, CONTAINER_WORK_DIR, true);
        spec.add_env("ANSIBLE_CONFIG", format!("{CONTAINER_WORK_DIR}/ansible.cfg"));
        spec.add_env("PYTHONIOENCODING", "utf-8");

        let mut command = format!("ansible-playbook {CONTAINER_WORK_DIR}/playbook.yml");
        if let Ok(extra) = std::env::var(ANSIBLE_ARGS_ENV) {
            let extra = extra.trim();
            if !extra.is_empty() {
                command.push(' ');
                command.push_str(extra);
            }
        }
        spec.add_run_commands([command]);
        Ok(())
    }
}
