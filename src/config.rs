use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::entity::{ChannelId, UserId};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Bot settings, layered from defaults, an optional TOML file and `TANUKI_*`
/// environment variables, in that order.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Channel commands are accepted from. Private messages are always accepted.
    pub text_channel: ChannelId,
    /// Bypasses every permission check.
    pub owner: Option<UserId>,
    pub prefix: String,
    pub delete_after_secs: u64,
    pub permissions_path: PathBuf,
    /// How many items `playlist` prints.
    pub queue_preview: usize,
    /// Command line used to fetch YouTube audio; the video id is appended.
    pub downloader: Vec<String>,
    /// Directory searched by `search`.
    pub library: Option<PathBuf>,
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub user: UserId,
    /// Voice output is written here.
    pub output: PathBuf,
    /// Write frames at playback speed instead of as fast as possible.
    pub realtime: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            text_channel: "general".to_string(),
            owner: None,
            prefix: "!".to_string(),
            delete_after_secs: 5,
            permissions_path: PathBuf::from("permissions.json"),
            queue_preview: 10,
            downloader: ["yt-dlp", "-q", "-f", "bestaudio", "-o", "-"]
                .map(String::from)
                .to_vec(),
            library: None,
            console: ConsoleConfig::default(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            user: "local".to_string(),
            output: PathBuf::from("tanuki.pcm"),
            realtime: true,
        }
    }
}

impl BotConfig {
    /// Loads the layered config. A missing file is only an error when the
    /// path was given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("tanuki").required(false),
        };

        let cfg: BotConfig = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("TANUKI")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("downloader"),
            )
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() || self.prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "prefix must be non-empty without whitespace, got {:?}",
                self.prefix
            )));
        }
        if self.text_channel.is_empty() {
            return Err(ConfigError::Invalid("text_channel is required".to_string()));
        }
        if self.queue_preview == 0 {
            return Err(ConfigError::Invalid("queue_preview must be positive".to_string()));
        }
        Ok(())
    }

    pub fn delete_after(&self) -> Duration {
        Duration::from_secs(self.delete_after_secs)
    }

    pub fn is_owner(&self, user: &str) -> bool {
        self.owner.as_deref() == Some(user)
    }
}
