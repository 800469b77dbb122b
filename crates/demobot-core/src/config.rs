use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{errors::Error, i18n::Lang, Result};

/// Which config file to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Production,
    Development,
}

impl RunMode {
    pub fn file_name(self) -> &'static str {
        match self {
            RunMode::Production => "config.json",
            RunMode::Development => "devconfig.json",
        }
    }
}

/// Typed bot configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    /// Always starts with `@`.
    pub bot_username: String,
    pub api_url: String,

    pub long_poll_timeout: Duration,
    pub sweep_interval: Duration,

    pub data_dir: PathBuf,
    pub default_lang: Lang,
}

/// On-disk shape of `config.json` / `devconfig.json`.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    bot_username: Option<String>,
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    long_poll_timeout_secs: Option<u64>,
    #[serde(default)]
    sweep_interval_secs: Option<u64>,
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    default_lang: Option<String>,
}

impl Config {
    /// Read the config file for `mode` from `DEMOBOT_CONFIG_DIR` (default: the
    /// current directory). `TELEGRAM_BOT_TOKEN` overrides the file's token.
    pub fn load(mode: RunMode) -> Result<Self> {
        let dir = env_path("DEMOBOT_CONFIG_DIR").unwrap_or_else(|| PathBuf::from("."));
        Self::load_from(&dir.join(mode.file_name()))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let raw: RawConfig = serde_json::from_str(&body)
            .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))?;
        Self::from_raw(raw, env_str("TELEGRAM_BOT_TOKEN"))
    }

    fn from_raw(raw: RawConfig, token_override: Option<String>) -> Result<Self> {
        let telegram_bot_token = token_override
            .and_then(non_empty)
            .or_else(|| raw.token.and_then(non_empty))
            .ok_or_else(|| {
                Error::Config(
                    "bot token is required (config `token` or TELEGRAM_BOT_TOKEN)".to_string(),
                )
            })?;

        let bot_username = raw
            .bot_username
            .and_then(non_empty)
            .map(|u| format!("@{}", u.trim().trim_start_matches('@')))
            .ok_or_else(|| Error::Config("config `bot_username` is required".to_string()))?;

        let api_url = raw
            .api_url
            .and_then(non_empty)
            .unwrap_or_else(|| "https://api.telegram.org".to_string())
            .trim_end_matches('/')
            .to_string();

        let long_poll_timeout = Duration::from_secs(raw.long_poll_timeout_secs.unwrap_or(30));
        let sweep_interval = Duration::from_secs(raw.sweep_interval_secs.unwrap_or(60).max(1));
        let data_dir = raw.data_dir.unwrap_or_else(|| PathBuf::from("."));
        let default_lang = match raw.default_lang.and_then(non_empty) {
            Some(code) => code.parse()?,
            None => Lang::En,
        };

        Ok(Self {
            telegram_bot_token,
            bot_username,
            api_url,
            long_poll_timeout,
            sweep_interval,
            data_dir,
            default_lang,
        })
    }

    // Persisted state lives under `data_dir`.

    pub fn polls_file(&self) -> PathBuf {
        self.data_dir.join("pollsinfo.json")
    }

    pub fn chats_file(&self) -> PathBuf {
        self.data_dir.join("chats.json")
    }

    pub fn langs_file(&self) -> PathBuf {
        self.data_dir.join("langs.json")
    }

    pub fn reports_file(&self) -> PathBuf {
        self.data_dir.join("reports.jsonl")
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(v: serde_json::Value) -> RawConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg = Config::from_raw(
            raw(serde_json::json!({"token": "123:abc", "bot_username": "DemoBot"})),
            None,
        )
        .unwrap();
        assert_eq!(cfg.bot_username, "@DemoBot");
        assert_eq!(cfg.api_url, "https://api.telegram.org");
        assert_eq!(cfg.long_poll_timeout, Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.default_lang, Lang::En);
        assert_eq!(cfg.polls_file(), PathBuf::from("./pollsinfo.json"));
    }

    #[test]
    fn env_token_wins_over_the_file() {
        let cfg = Config::from_raw(
            raw(serde_json::json!({"token": "file", "bot_username": "@DemoBot"})),
            Some("env".to_string()),
        )
        .unwrap();
        assert_eq!(cfg.telegram_bot_token, "env");
        assert_eq!(cfg.bot_username, "@DemoBot");

        let blank_env = Config::from_raw(
            raw(serde_json::json!({"token": "file", "bot_username": "DemoBot"})),
            Some("  ".to_string()),
        )
        .unwrap();
        assert_eq!(blank_env.telegram_bot_token, "file");
    }

    #[test]
    fn missing_token_or_username_is_a_config_error() {
        let no_token = Config::from_raw(raw(serde_json::json!({"bot_username": "b"})), None);
        assert!(matches!(no_token, Err(Error::Config(_))));
        let no_name = Config::from_raw(raw(serde_json::json!({"token": "t"})), None);
        assert!(matches!(no_name, Err(Error::Config(_))));
        let bad_lang = Config::from_raw(
            raw(serde_json::json!({"token": "t", "bot_username": "b", "default_lang": "xx"})),
            None,
        );
        assert!(bad_lang.is_err());
    }

    #[test]
    fn mode_selects_the_file() {
        let dir = std::env::temp_dir().join(format!("demobot-config-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("devconfig.json"),
            r#"{"token": "dev", "bot_username": "DevBot", "api_url": "http://localhost:8081/", "data_dir": "/var/lib/demobot"}"#,
        )
        .unwrap();

        assert_eq!(RunMode::Production.file_name(), "config.json");
        let cfg = Config::load_from(&dir.join(RunMode::Development.file_name())).unwrap();
        assert_eq!(cfg.bot_username, "@DevBot");
        assert_eq!(cfg.api_url, "http://localhost:8081");
        assert_eq!(cfg.chats_file(), PathBuf::from("/var/lib/demobot/chats.json"));
        assert!(Config::load_from(&dir.join("config.json")).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
