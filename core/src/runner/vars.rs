use std::collections::BTreeMap;
use std::path::Path;

use chainscan_common::targets::sanitize_dir_name;

pub const TARGETS_FILE: &str = "{{targets_file}}";
pub const BASE_TARGETS_FILE: &str = "{{base_targets_file}}";
pub const OUTPUT_DIR: &str = "{{output_dir}}";

pub fn targets_file_token(stage: &str) -> String {
    format!("{{{{targets_file_{}}}}}", sanitize_dir_name(stage))
}

pub fn stdout_file_token(stage: &str) -> String {
    format!("{{{{stdout_file_{}}}}}", sanitize_dir_name(stage))
}

pub fn stderr_file_token(stage: &str) -> String {
    format!("{{{{stderr_file_{}}}}}", sanitize_dir_name(stage))
}

/// Placeholder token to path mapping for one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarEnv {
    vars: BTreeMap<String, String>,
}

impl VarEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment at the start of a group: both targets tokens on the base
    /// file, the group directory, and every stage's tokens seeded empty.
    pub fn for_group<'a, I>(base_targets: &Path, output_dir: &Path, stages: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut env = Self::new();
        env.set_path(TARGETS_FILE, base_targets);
        env.set_path(BASE_TARGETS_FILE, base_targets);
        env.set_path(OUTPUT_DIR, output_dir);
        for stage in stages {
            env.set(targets_file_token(stage), "");
            env.set(stdout_file_token(stage), "");
            env.set(stderr_file_token(stage), "");
        }
        env
    }

    pub fn set(&mut self, token: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(token.into(), value.into());
    }

    pub fn set_path(&mut self, token: impl Into<String>, path: &Path) {
        self.set(token, path.to_string_lossy().into_owned());
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.vars.get(token).map(String::as_str)
    }

    /// Replaces every known token in every argument. Pure; the environment
    /// is not touched.
    pub fn substitute(&self, template: &[String]) -> Vec<String> {
        template
            .iter()
            .map(|arg| {
                self.vars
                    .iter()
                    .fold(arg.clone(), |acc, (token, value)| {
                        if acc.contains(token.as_str()) {
                            acc.replace(token.as_str(), value)
                        } else {
                            acc
                        }
                    })
            })
            .collect()
    }
}
