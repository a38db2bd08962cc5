//! Service configuration, layered from an optional TOML file and `FINPACK_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use finpack_core::config::PipelineConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// SQLite database file. A leading `~/` is expanded.
  pub store_path: PathBuf,
  pub host:       String,
  pub port:       u16,
  pub pipeline:   PipelineConfig,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("finpack.db"),
      host:       "127.0.0.1".into(),
      port:       8080,
      pipeline:   PipelineConfig::default(),
    }
  }
}

impl ServiceConfig {
  /// Read `path` (if it exists) and overlay the environment, e.g.
  /// `FINPACK_PORT=9000` or `FINPACK_PIPELINE__PERIODS__FISCAL_YEAR_START_MONTH=4`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("FINPACK")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config from {}", path.display()))?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServiceConfig")
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
