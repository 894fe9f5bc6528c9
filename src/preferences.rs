use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

const FILENAME: &str = "gitscribe.toml";

/// User-facing preferences stored in `.gitscribe/gitscribe.toml`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Preferences {
    /// Notes ref the conversation store writes to.
    #[serde(default = "default_notes_ref")]
    pub notes_ref: String,

    /// How recently a session must have been active for the post-commit
    /// trigger to attach it to a manual commit.
    #[serde(default = "default_discovery_window_minutes")]
    pub discovery_window_minutes: u64,

    /// Characters of surrounding context shown in search snippets.
    #[serde(default = "default_snippet_context")]
    pub snippet_context: usize,
}

fn default_notes_ref() -> String {
    crate::store::DEFAULT_NOTES_REF.into()
}

fn default_discovery_window_minutes() -> u64 {
    30
}

fn default_snippet_context() -> usize {
    60
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            notes_ref: default_notes_ref(),
            discovery_window_minutes: default_discovery_window_minutes(),
            snippet_context: default_snippet_context(),
        }
    }
}

impl Preferences {
    /// Load preferences from `.gitscribe/gitscribe.toml`.
    ///
    /// If the file doesn't exist it is created with defaults. Missing keys
    /// in an existing file are filled in with defaults via serde.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(FILENAME);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let prefs: Preferences = toml::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(prefs)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let prefs = Preferences::default();
                let toml_str = toml::to_string_pretty(&prefs)
                    .context("serializing default preferences")?;
                fs::write(&path, &toml_str)
                    .with_context(|| format!("writing default {}", path.display()))?;
                Ok(prefs)
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn discovery_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.discovery_window_minutes * 60)
    }
}
