use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub api: ApiSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiSettings {
    /// Settings for `base_url` with every other field at its default
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: default_refresh_path(),
            token_path: default_token_path(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session persistence and routing
#[derive(serde::Deserialize, Clone, Debug)]
pub struct SessionSettings {
    #[serde(default = "default_login_route")]
    pub login_route: String,
    /// Session file; credentials are kept in memory only when unset
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            login_route: default_login_route(),
            storage_path: None,
        }
    }
}

fn default_refresh_path() -> String {
    "/auth/token/refresh/".to_string()
}

fn default_token_path() -> String {
    "/auth/token/".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_login_route() -> String {
    "/login".to_string()
}

/// Load settings from an optional `configuration.{yaml,toml,json}` file,
/// overridden by `APP__`-prefixed environment variables
/// (e.g. `APP__API__BASE_URL`).
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(source: &str) -> Result<Settings, ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<Settings>()
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings = from_yaml("api:\n  base_url: http://127.0.0.1:8000/api\n").unwrap();

        assert_eq!(settings.api.refresh_path, "/auth/token/refresh/");
        assert_eq!(settings.api.token_path, "/auth/token/");
        assert_eq!(settings.api.timeout(), Duration::from_secs(10));
        assert_eq!(settings.session.login_route, "/login");
        assert!(settings.session.storage_path.is_none());
    }

    #[test]
    fn test_explicit_values() {
        let settings = from_yaml(
            "api:\n  base_url: https://novels.example.com/api\n  refresh_path: /token/refresh/\n  timeout_secs: 3\nsession:\n  login_route: /sign-in\n  storage_path: /tmp/session.json\n",
        )
        .unwrap();

        assert_eq!(settings.api.refresh_path, "/token/refresh/");
        assert_eq!(settings.api.timeout_secs, 3);
        assert_eq!(settings.session.login_route, "/sign-in");
        assert_eq!(
            settings.session.storage_path,
            Some(PathBuf::from("/tmp/session.json"))
        );
    }

    #[test]
    fn test_base_url_is_required() {
        assert!(from_yaml("session:\n  login_route: /login\n").is_err());
    }

    #[test]
    fn test_api_settings_new() {
        let api = ApiSettings::new("http://localhost:9000");
        assert_eq!(api.base_url, "http://localhost:9000");
        assert_eq!(api.refresh_path, "/auth/token/refresh/");
    }
}
