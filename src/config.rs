//! YAML configuration.
//!
//! Every key is optional; missing keys take the defaults below. Paths may
//! start with `~`, which is expanded to the user's home directory when the
//! file is loaded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use directories::BaseDirs;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
}

/// Settings for the cache, the synchronizer and the playlist.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Root of the picture library.
    pub pic_dir: PathBuf,
    /// Shown when nothing in the library can be displayed.
    pub no_files_img: PathBuf,
    pub follow_links: bool,
    /// Directory name below `pic_dir` to restrict the playlist to.
    pub subdirectory: String,
    /// Files modified within this many days play first. 0 disables.
    pub recent_n: u32,
    /// Full run-throughs between reshuffles.
    pub reshuffle_num: u32,
    /// Seconds each slide stays up.
    pub time_delay: f64,
    pub shuffle: bool,
    /// Comma list of `column [ASC|DESC]` used when not shuffling.
    pub sort_cols: String,
    pub load_geoloc: bool,
    /// Cache database. Defaults to the per-user data directory.
    pub db_file: Option<PathBuf>,
    pub portrait_pairs: bool,
    /// Where deleted pictures are moved to.
    pub deleted_pictures: PathBuf,
    /// Fallback log filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Seconds between synchronizer cycles.
    pub update_interval: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            pic_dir: PathBuf::from("~/Pictures"),
            no_files_img: PathBuf::from("~/picdeck_data/no_pictures.jpg"),
            follow_links: false,
            subdirectory: String::new(),
            recent_n: 7,
            reshuffle_num: 1,
            time_delay: 200.0,
            shuffle: true,
            sort_cols: "fname ASC".to_string(),
            load_geoloc: false,
            db_file: None,
            portrait_pairs: false,
            deleted_pictures: PathBuf::from("~/DeletedPictures"),
            log_level: "info".to_string(),
            update_interval: 2.0,
        }
    }
}

impl Config {
    /// Reads, validates and tilde-expands a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_yaml(&data)
            .with_context(|| format!("failed to load config at {}", path.display()))
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let mut cfg: Config = serde_yaml::from_slice(data).context("failed to parse YAML")?;
        cfg.model.validate()?;
        cfg.model.expand_paths();
        Ok(cfg)
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        ensure!(self.reshuffle_num > 0, "reshuffle_num must be greater than zero");
        ensure!(
            self.time_delay.is_finite() && self.time_delay > 0.0,
            "time_delay must be positive"
        );
        ensure!(
            self.update_interval.is_finite() && self.update_interval > 0.0,
            "update_interval must be positive"
        );
        Ok(())
    }

    fn expand_paths(&mut self) {
        self.pic_dir = expand_tilde(&self.pic_dir);
        self.no_files_img = expand_tilde(&self.no_files_img);
        self.deleted_pictures = expand_tilde(&self.deleted_pictures);
        self.db_file = self.db_file.as_deref().map(expand_tilde);
    }
}

/// Replaces a leading `~` with the home directory. Paths are returned
/// unchanged when there is no `~` or no home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
