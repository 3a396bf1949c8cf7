//! Run configuration.
//!
//! Loaded from YAML, adjusted by CLI overrides and then [`Config::validate`]d
//! before anything is executed.

use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const APP_DIR: &str = "chainscan";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("creating output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not resolve the user's home directory")]
    NoHome,
}

/// One external tool invocation in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub binary: String,
    /// `None` means enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Harvest stdout as new targets for later stages.
    #[serde(default)]
    pub produces_targets: bool,
    /// Overrides [`Config::tool_timeout_sec`]; `0` disables the deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
    /// Argument template, may contain `{{...}}` placeholders.
    #[serde(default)]
    pub flags: Vec<String>,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, binary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            enabled: None,
            produces_targets: false,
            timeout_sec: None,
            flags: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn producing_targets(mut self) -> Self {
        self.produces_targets = true;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_sec = Some(seconds);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = Some(false);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output_dir: PathBuf,
    /// Reserved capacity for stage execution. Stages of one group still run
    /// strictly one after another.
    #[serde(default)]
    pub concurrency: usize,
    /// Run-wide per-stage deadline in seconds, `0` disables it.
    #[serde(default)]
    pub tool_timeout_sec: u64,
    #[serde(default)]
    pub debug: bool,
    /// Stream tool output as prefixed event lines instead of drawing a table.
    #[serde(default)]
    pub verbose: bool,
    /// Abort every group on the first error.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default, alias = "plugins")]
    pub stages: Vec<StageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::new(),
            concurrency: 1,
            tool_timeout_sec: 0,
            debug: false,
            verbose: false,
            fail_fast: false,
            stages: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_yaml(path: &Path) -> Result<Self, ConfigError> {
        let content: String = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Expands paths, checks invariants and creates the output directory.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let output_dir: String = expand_user_path(&self.output_dir.to_string_lossy());
        if output_dir.trim().is_empty() {
            return Err(ConfigError::Invalid("output_dir empty".into()));
        }
        self.output_dir = PathBuf::from(output_dir);

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be >= 1".into()));
        }

        let mut names: HashSet<&str> = HashSet::with_capacity(self.stages.len());
        for (idx, stage) in self.stages.iter_mut().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("stages[{idx}].name empty")));
            }
            if stage.binary.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("stages[{idx}].binary empty")));
            }

            stage.binary = expand_user_path(&stage.binary);
            if cfg!(unix) && stage.is_enabled() && !Path::new(&stage.binary).is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "stages[{idx}].binary must be an absolute path"
                )));
            }
        }

        for stage in &self.stages {
            if !names.insert(stage.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stage name: {}",
                    stage.name
                )));
            }
        }

        fs::create_dir_all(&self.output_dir).map_err(|source| ConfigError::OutputDir {
            path: self.output_dir.clone(),
            source,
        })?;
        if let Ok(abs) = std::path::absolute(&self.output_dir) {
            self.output_dir = abs;
        }
        Ok(())
    }

    pub fn enabled_stages(&self) -> impl Iterator<Item = &StageConfig> {
        self.stages.iter().filter(|stage| stage.is_enabled())
    }
}

/// `$XDG_CONFIG_HOME/chainscan/conf/default.yaml`, falling back to
/// `~/.config/chainscan/conf/default.yaml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base: PathBuf = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".config"),
    };
    Ok(base.join(APP_DIR).join("conf").join("default.yaml"))
}

/// Writes `contents` to `path` when the file is missing, or always when
/// `overwrite` is set.
pub fn ensure_config_file(path: &Path, contents: &str, overwrite: bool) -> io::Result<()> {
    if !overwrite {
        match fs::metadata(path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
            Err(_) => {}
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

/// Expands `$VAR`, `${VAR}` and a leading `~` using the process environment.
pub fn expand_user_path(path: &str) -> String {
    expand_user_path_with(path, |key| std::env::var(key).ok(), dirs::home_dir())
}

/// Same as [`expand_user_path`] with an injectable environment.
///
/// Unknown or empty variables are kept literally (`$NAME`). `HOME` and
/// `USERPROFILE` fall back to `home` when unset.
pub fn expand_user_path_with<F>(path: &str, lookup: F, home: Option<PathBuf>) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if path.is_empty() {
        return String::new();
    }

    let home_str: Option<String> = home.map(|h| h.to_string_lossy().into_owned());
    let expanded: String = expand_env(path, |key| {
        lookup(key)
            .filter(|value| !value.is_empty())
            .or_else(|| match key {
                "HOME" | "USERPROFILE" => home_str.clone(),
                _ => None,
            })
    });

    let Some(home) = home_str else {
        return expanded;
    };
    if expanded == "~" {
        return home;
    }
    for prefix in ["~/", "~\\"] {
        if let Some(rest) = expanded.strip_prefix(prefix) {
            return Path::new(&home).join(rest).to_string_lossy().into_owned();
        }
    }
    expanded
}

fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out: String = String::with_capacity(input.len());
    let mut rest: &str = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after: &str = &rest[pos + 1..];

        let (key, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end: usize = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if key.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }

        match lookup(key) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('$');
                out.push_str(key);
            }
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}
