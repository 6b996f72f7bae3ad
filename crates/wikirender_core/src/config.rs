use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::expander::ExpansionLimits;
use crate::parser::ParserConfig;
use crate::render::{DEFAULT_ARTICLE_PATH, DEFAULT_FILE_PATH, RenderOptions};

pub const ENV_MAX_DEPTH: &str = "WIKIRENDER_MAX_DEPTH";
pub const ENV_MAX_EXPANSIONS: &str = "WIKIRENDER_MAX_EXPANSIONS";
pub const ENV_ARTICLE_PATH: &str = "WIKIRENDER_ARTICLE_PATH";
pub const ENV_FILE_PATH: &str = "WIKIRENDER_FILE_PATH";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikirenderConfig {
    #[serde(default)]
    pub parser: ParserSection,
    #[serde(default)]
    pub render: RenderSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ParserSection {
    pub max_depth: Option<usize>,
    pub max_expansions: Option<usize>,
    pub max_argument_nesting: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RenderSection {
    pub article_path: Option<String>,
    pub file_path: Option<String>,
}

impl WikirenderConfig {
    /// Config with every value spelled out at its default, as written by
    /// `wikirender init`.
    pub fn materialized() -> Self {
        let limits = ExpansionLimits::default();
        Self {
            parser: ParserSection {
                max_depth: Some(limits.max_depth),
                max_expansions: Some(limits.max_expansions),
                max_argument_nesting: Some(limits.max_argument_nesting),
            },
            render: RenderSection {
                article_path: Some(DEFAULT_ARTICLE_PATH.to_string()),
                file_path: Some(DEFAULT_FILE_PATH.to_string()),
            },
        }
    }

    /// Effective parser settings: env > config > default.
    pub fn parser_config(&self) -> Result<ParserConfig> {
        self.parser_config_with_lookup(|key| env::var(key).ok())
    }

    pub fn parser_config_with_lookup<F>(&self, lookup_env: F) -> Result<ParserConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ExpansionLimits::default();
        let limits = ExpansionLimits {
            max_depth: resolve_limit(
                &lookup_env,
                ENV_MAX_DEPTH,
                self.parser.max_depth,
                defaults.max_depth,
            )?,
            max_expansions: resolve_limit(
                &lookup_env,
                ENV_MAX_EXPANSIONS,
                self.parser.max_expansions,
                defaults.max_expansions,
            )?,
            max_argument_nesting: positive(
                "max_argument_nesting",
                self.parser
                    .max_argument_nesting
                    .unwrap_or(defaults.max_argument_nesting),
            )?,
        };

        let render = RenderOptions {
            article_path: resolve_text(
                &lookup_env,
                ENV_ARTICLE_PATH,
                self.render.article_path.as_deref(),
                DEFAULT_ARTICLE_PATH,
            ),
            file_path: resolve_text(
                &lookup_env,
                ENV_FILE_PATH,
                self.render.file_path.as_deref(),
                DEFAULT_FILE_PATH,
            ),
        };
        Ok(ParserConfig { limits, render })
    }
}

fn resolve_limit<F>(
    lookup_env: &F,
    key: &str,
    configured: Option<usize>,
    default: usize,
) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup_env(key) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            let parsed = trimmed
                .parse::<usize>()
                .with_context(|| format!("invalid {key} value: {trimmed}"))?;
            return positive(key, parsed);
        }
    }
    positive(key, configured.unwrap_or(default))
}

fn positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        bail!("{name} must be at least 1");
    }
    Ok(value)
}

fn resolve_text<F>(lookup_env: &F, key: &str, configured: Option<&str>, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup_env(key) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Load and parse a config file. Returns the default config if the file
/// doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikirenderConfig> {
    if !config_path.exists() {
        return Ok(WikirenderConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikirenderConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
