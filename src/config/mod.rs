use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124 Safari/537.36";

/// Process-wide settings, loaded once at startup and handed to the resolver by
/// reference. Every section has working defaults so the file is optional.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub fetch: FetchConfig,
    pub youtube: YouTubeConfig,
    pub tiktok: TikTokConfig,
    pub x: XConfig,
    pub instagram: InstagramConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    /// Longer budget for third-party lookup APIs.
    pub api_timeout_secs: u64,
    /// Read-only rendering proxy used for the single mirror retry.
    pub mirror_base: String,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 8,
            api_timeout_secs: 10,
            mirror_base: "https://r.jina.ai".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct YouTubeConfig {
    pub ytdlp_path: String,
    pub timeout_secs: u64,
    /// External resolve service consulted when direct extraction fails.
    pub fallback_resolver: Option<String>,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            timeout_secs: 30,
            fallback_resolver: Some("https://api.massdatagh.com/api/resolve".to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TikTokConfig {
    pub lookup_api: String,
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            lookup_api: "https://www.tikwm.com/api/".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct XConfig {
    pub syndication_api: String,
    pub mirror_api: String,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            syndication_api: "https://cdn.syndication.twimg.com/tweet-result".to_string(),
            mirror_api: "https://api.vxtwitter.com/Tweet/status".to_string(),
        }
    }
}

/// Version-pinned Instagram web protocol parameters. These rotate upstream and
/// can be overridden from the environment without a rebuild.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InstagramConfig {
    pub app_id: String,
    pub web_app_id: String,
    pub lsd: String,
    pub asbd_id: String,
    pub bloks_version: String,
    pub doc_id: String,
    pub csrf_token: Option<String>,
    pub cookie: Option<String>,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            app_id: "936619743392459".to_string(),
            web_app_id: "1217981644879628".to_string(),
            lsd: "AVrqPT0gJDo".to_string(),
            asbd_id: "359341".to_string(),
            bloks_version: "0d99de0d13662a50e0958bcb112dd651f70dea02e1859073ab25f8f2a477de96"
                .to_string(),
            doc_id: "8845758582119845".to_string(),
            csrf_token: None,
            cookie: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path))?;
        Ok(config)
    }

    /// Loads the optional file, then applies environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let ig = &mut self.instagram;

        if let Some(v) = lookup("IG_WEB_APP_ID") {
            ig.web_app_id = v;
        }
        if let Some(v) = lookup("IG_LSD") {
            ig.lsd = v;
        }
        if let Some(v) = lookup("IG_ASBD_ID") {
            ig.asbd_id = v;
        }
        if let Some(v) = lookup("IG_BLOKS_VERSION") {
            ig.bloks_version = v;
        }
        if let Some(v) = lookup("IG_DOC_ID") {
            ig.doc_id = v;
        }
        if let Some(v) = lookup("IG_CSRF") {
            ig.csrf_token = Some(v);
        }
        if let Some(v) = lookup("INSTAGRAM_COOKIE") {
            ig.cookie = Some(v);
        }
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.get_logging_format(), "json");
        assert_eq!(config.fetch.timeout(), Duration::from_secs(8));
        assert_eq!(config.fetch.api_timeout(), Duration::from_secs(10));
        assert_eq!(config.fetch.mirror_base, "https://r.jina.ai");
        assert_eq!(config.instagram.doc_id, "8845758582119845");
        assert!(config.instagram.cookie.is_none());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
format = "pretty"

[fetch]
timeout_secs = 3

[youtube]
ytdlp_path = "/opt/bin/yt-dlp"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.get_logging_format(), "pretty");
        assert_eq!(config.fetch.timeout_secs, 3);
        assert_eq!(config.fetch.api_timeout_secs, 10);
        assert_eq!(config.youtube.ytdlp_path, "/opt/bin/yt-dlp");
        assert_eq!(config.youtube.timeout_secs, 30);
        assert_eq!(config.tiktok.lookup_api, "https://www.tikwm.com/api/");
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/viddown/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[fetch\ntimeout_secs = ").unwrap();
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("IG_LSD", "lsd-token"),
            ("IG_DOC_ID", "42"),
            ("IG_CSRF", "csrf"),
            ("INSTAGRAM_COOKIE", "sessionid=abc"),
            ("IG_BLOKS_VERSION", "  "),
        ]);

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.instagram.lsd, "lsd-token");
        assert_eq!(config.instagram.doc_id, "42");
        assert_eq!(config.instagram.csrf_token.as_deref(), Some("csrf"));
        assert_eq!(config.instagram.cookie.as_deref(), Some("sessionid=abc"));
        // blank values keep the default
        assert_eq!(
            config.instagram.bloks_version,
            InstagramConfig::default().bloks_version
        );
        assert_eq!(config.instagram.web_app_id, "1217981644879628");
    }
}
