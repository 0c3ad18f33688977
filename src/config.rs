use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

use crate::errors::SeriesError;

/// Environment variable naming the API key shared by all three providers.
pub const ENV_API_KEY: &str = "ATELIER_API_KEY";
/// Environment variable overriding the data root directory.
pub const ENV_DATA_DIR: &str = "ATELIER_DATA_DIR";
/// Environment variable bypassing prompt enhancement entirely.
pub const ENV_SKIP_ENHANCE: &str = "ATELIER_SKIP_ENHANCE";
/// Environment variable enabling local side effects (opening finished files).
pub const ENV_LOCAL_COMMANDS: &str = "ATELIER_LOCAL_COMMANDS";
/// Environment variable overriding the provider base URL.
pub const ENV_API_BASE: &str = "ATELIER_API_BASE";

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Runtime configuration for the atelier pipeline.
///
/// Bridges environment settings with the on-disk layout. Everything under
/// `data_root` is owned by this application:
///
/// ```text
/// series/<suffix>.json       series definitions
/// cache/databases_v<N>.bin   binary word-pack cache
/// output/<series>/...        prompt sidecars, images, snapshots, audio
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub data_root: PathBuf,
    pub api_key: Option<String>,
    pub api_base: String,
    pub skip_enhance: bool,
    pub local_commands: bool,
}

impl Config {
    /// Build a Config from the process environment.
    pub fn from_env() -> Result<Self> {
        let data_root = match std::env::var(ENV_DATA_DIR) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .context("No platform data directory available; set ATELIER_DATA_DIR")?
                .join("atelier"),
        };
        Ok(Self::with_data_root(data_root))
    }

    /// Build a Config rooted at an explicit directory.
    ///
    /// Environment flags are still honoured; tests point this at a temp dir.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        let api_key = std::env::var(ENV_API_KEY).ok().filter(|k| !k.is_empty());
        let api_base = std::env::var(ENV_API_BASE)
            .ok()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            data_root: data_root.into(),
            api_key,
            api_base,
            skip_enhance: env_flag(ENV_SKIP_ENHANCE),
            local_commands: env_flag(ENV_LOCAL_COMMANDS),
        }
    }

    pub fn series_dir(&self) -> PathBuf {
        self.data_root.join("series")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_root.join("cache")
    }

    pub fn output_dir(&self, series: &str) -> PathBuf {
        self.data_root.join("output").join(series)
    }

    /// The sibling directory a soft-deleted series' output tree is moved to.
    pub fn deleted_output_dir(&self, series: &str) -> PathBuf {
        self.data_root.join("output").join(format!("{series}.deleted"))
    }

    pub fn sidecar_path(&self, series: &str, kind: &str, file: &str) -> PathBuf {
        self.output_dir(series).join(kind).join(format!("{file}.txt"))
    }

    pub fn generated_path(&self, series: &str, file: &str) -> PathBuf {
        self.output_dir(series).join("generated").join(format!("{file}.png"))
    }

    pub fn annotated_path(&self, series: &str, file: &str) -> PathBuf {
        self.output_dir(series).join("annotated").join(format!("{file}.png"))
    }

    pub fn selector_path(&self, series: &str, file: &str) -> PathBuf {
        self.output_dir(series).join("selector").join(format!("{file}.json"))
    }

    pub fn audio_path(&self, series: &str, file: &str) -> PathBuf {
        self.output_dir(series).join("audio").join(format!("{file}.mp3"))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.series_dir())
            .context("Failed to create series directory")?;
        std::fs::create_dir_all(self.cache_dir()).context("Failed to create cache directory")?;
        std::fs::create_dir_all(self.data_root.join("output"))
            .context("Failed to create output directory")?;
        Ok(())
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !matches!(v.as_str(), "" | "0" | "false" | "no"))
        .unwrap_or(false)
}

/// Validate that `name` is a single, normal path component.
///
/// Rejects separators, parent references and anything else that would let a
/// series suffix or file name resolve outside its base directory. Returns the
/// component unchanged so call sites can use it inline.
pub fn safe_component(name: &str) -> Result<&str, SeriesError> {
    let reject = || SeriesError::PathEscape {
        component: name.to_string(),
    };
    if name.is_empty() || name == "." || name == ".." {
        return Err(reject());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(reject()),
    }
}

/// Confirm a resolved path still lives under `base`.
///
/// A lexical check: callers build paths from validated components, this is
/// the final gate before any filesystem mutation.
pub fn ensure_within(base: &Path, candidate: &Path) -> Result<(), SeriesError> {
    if candidate.starts_with(base)
        && !candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        Ok(())
    } else {
        Err(SeriesError::PathEscape {
            component: candidate.display().to_string(),
        })
    }
}
