//! Runtime settings, read from an optional `squall.toml` and `SQUALL_*`
//! environment variables (nested keys use `__`, e.g. `SQUALL_COMPILE__JOIN`).

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};

use crate::compile::{Compile, CompileOptions};
use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "squall.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Used when `RUST_LOG` isn't set.
    pub log_filter: String,
    pub compile: CompileSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompileSettings {
    pub join: String,
    pub reserved_words: Vec<String>,
    pub unreserved_words: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "info".to_owned(),
            compile: CompileSettings::default(),
        }
    }
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            join: ", ".to_owned(),
            reserved_words: Vec::new(),
            unreserved_words: Vec::new(),
        }
    }
}

impl Settings {
    /// A missing file is not an error; environment variables win over the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("SQUALL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// A child of `parent` with the configured reserved word edits applied.
    pub fn dialect(&self, parent: &Compile) -> Compile {
        let dialect = parent.create_child();
        dialect.add_reserved_words(&self.compile.reserved_words);
        dialect.remove_reserved_words(&self.compile.unreserved_words);
        dialect
    }

    pub fn options(&self) -> CompileOptions<'_> {
        CompileOptions::join(&self.compile.join)
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` overrides the configured
/// filter. Does nothing if a subscriber is already installed.
pub fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
