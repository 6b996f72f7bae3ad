use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::WikirenderConfig;
use crate::filesystem::display_path;

pub const STATE_DIR_NAME: &str = ".wikirender";
pub const TEMPLATES_DIR_NAME: &str = "templates";
pub const DB_FILENAME: &str = "templates.db";
pub const CONFIG_FILENAME: &str = "config.toml";

pub const ENV_PROJECT_ROOT: &str = "WIKIRENDER_PROJECT_ROOT";
pub const ENV_DATA_DIR: &str = "WIKIRENDER_DATA_DIR";
pub const ENV_CONFIG: &str = "WIKIRENDER_CONFIG";

/// Where a resolved path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    /// Nearest ancestor of the working directory holding `.wikirender/`.
    Ancestor,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Ancestor => "ancestor",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub source: ValueSource,
}

/// Path flags passed on the command line.
#[derive(Debug, Clone, Default)]
pub struct PathFlags {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Project layout:
///
/// ```text
/// <root>/templates/              template sources
/// <root>/.wikirender/config.toml
/// <root>/.wikirender/data/templates.db
/// ```
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: Resolved,
    pub data_dir: Resolved,
    pub config_path: Resolved,
}

impl ProjectPaths {
    /// Resolve from `cwd` and the process environment.
    pub fn resolve(cwd: &Path, flags: &PathFlags) -> Self {
        Self::resolve_with(cwd, flags, |key| env::var(key).ok())
    }

    /// Resolve the layout: flag > env > default for every path. The root
    /// default is the nearest initialized ancestor of `cwd`, else `cwd`.
    pub fn resolve_with<F>(cwd: &Path, flags: &PathFlags, lookup_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_path = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };

        let root = match (&flags.project_root, env_path(ENV_PROJECT_ROOT)) {
            (Some(path), _) => Resolved {
                path: cwd.join(path),
                source: ValueSource::Flag,
            },
            (None, Some(path)) => Resolved {
                path: cwd.join(path),
                source: ValueSource::Env,
            },
            (None, None) => match cwd
                .ancestors()
                .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
            {
                Some(found) => Resolved {
                    path: found.to_path_buf(),
                    source: ValueSource::Ancestor,
                },
                None => Resolved {
                    path: cwd.to_path_buf(),
                    source: ValueSource::Default,
                },
            },
        };

        let state_dir = root.path.join(STATE_DIR_NAME);
        let under_root = |flag: &Option<PathBuf>, key: &str, default: PathBuf| match (
            flag,
            env_path(key),
        ) {
            (Some(path), _) => Resolved {
                path: root.path.join(path),
                source: ValueSource::Flag,
            },
            (None, Some(path)) => Resolved {
                path: root.path.join(path),
                source: ValueSource::Env,
            },
            (None, None) => Resolved {
                path: default,
                source: ValueSource::Default,
            },
        };
        let data_dir = under_root(&flags.data_dir, ENV_DATA_DIR, state_dir.join("data"));
        let config_path = under_root(&flags.config, ENV_CONFIG, state_dir.join(CONFIG_FILENAME));

        Self {
            root,
            data_dir,
            config_path,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.path.join(STATE_DIR_NAME)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.path.join(TEMPLATES_DIR_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.path.join(DB_FILENAME)
    }

    pub fn diagnostics(&self) -> String {
        let entry = |label: &str, resolved: &Resolved| {
            format!(
                "{label}: {} ({})",
                display_path(&resolved.path),
                resolved.source.as_str()
            )
        };
        [
            entry("project_root", &self.root),
            entry("data_dir", &self.data_dir),
            entry("config_path", &self.config_path),
            format!("templates_dir: {}", display_path(&self.templates_dir())),
            format!("db_path: {}", display_path(&self.db_path())),
        ]
        .join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

/// Create the state, data and templates directories and write the default
/// config. An existing config is kept unless `force` is set.
pub fn init_project(paths: &ProjectPaths, force: bool) -> Result<InitReport> {
    let mut report = InitReport::default();
    for dir in [paths.state_dir(), paths.data_dir.path.clone(), paths.templates_dir()] {
        if dir.is_dir() {
            continue;
        }
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        tracing::debug!(dir = %display_path(&dir), "created directory");
        report.created_dirs.push(dir);
    }

    let config_path = &paths.config_path.path;
    if force || !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(&WikirenderConfig::materialized())
            .context("failed to serialize default config")?;
        fs::write(config_path, format!("# wikirender configuration\n\n{content}"))
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        report.wrote_config = true;
    }
    Ok(report)
}
