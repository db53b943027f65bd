use std::fs;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub persist_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            persist_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    persist_timeout_secs: Option<u64>,
}

/// Defaults, overridden by an optional `board.toml`, overridden by
/// environment variables.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("board.toml") {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            if let Some(v) = file_cfg.server_url {
                settings.server_url = v;
            }
            if let Some(v) = file_cfg.persist_timeout_secs {
                settings.persist_timeout_secs = v;
            }
        }
    }

    if let Ok(v) = std::env::var("BOARD_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("BOARD_PERSIST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.persist_timeout_secs = parsed;
        }
    }

    settings
}
