use super::youtube::{FormatProvider, VideoInfo, YouTubeFormat};
use crate::config::YouTubeConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct YtDlpFormatProvider {
    binary: String,
    timeout: Duration,
}

impl YtDlpFormatProvider {
    pub fn new(config: &YouTubeConfig) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl FormatProvider for YtDlpFormatProvider {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    /// Test if yt-dlp is available on the system
    async fn test_availability(&self) -> bool {
        match Command::new(&self.binary).arg("--version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!("✅ yt-dlp is available, version: {}", version.trim());
                    true
                } else {
                    warn!("❌ yt-dlp command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }

    async fn video_info(&self, url: &str) -> Result<VideoInfo> {
        debug!("Extracting formats with yt-dlp for: {}", url);

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .arg("--dump-json")
                .arg("--no-download")
                .arg("--no-warnings")
                .arg("--no-playlist")
                .arg("--add-header")
                .arg("Accept-Language:en-US,en;q=0.9")
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("Media metadata extraction timed out")?
        .context("Failed to extract media metadata")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "Media metadata extraction failed: {}",
                error.trim()
            ));
        }

        let json: Value =
            serde_json::from_slice(&output.stdout).context("Failed to parse media metadata")?;

        let info = parse_dump(&json);
        debug!(
            "yt-dlp listed {} formats for {}",
            info.formats.len(),
            info.title
        );
        Ok(info)
    }
}

/// Maps a `--dump-json` document onto `VideoInfo`. Formats without a URL or
/// without any audio or video stream (storyboards) are dropped.
pub fn parse_dump(json: &Value) -> VideoInfo {
    let thumbnails = match json["thumbnails"].as_array() {
        Some(list) => list
            .iter()
            .filter_map(|t| t["url"].as_str())
            .map(String::from)
            .collect(),
        None => json["thumbnail"]
            .as_str()
            .map(|t| vec![t.to_string()])
            .unwrap_or_default(),
    };

    let formats = json["formats"]
        .as_array()
        .map(|list| list.iter().filter_map(parse_format).collect())
        .unwrap_or_default();

    VideoInfo {
        title: json["title"]
            .as_str()
            .unwrap_or("Unknown Title")
            .to_string(),
        thumbnails,
        formats,
    }
}

fn parse_format(format: &Value) -> Option<YouTubeFormat> {
    let url = format["url"].as_str()?;
    let itag = match &format["format_id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let vcodec = codec(&format["vcodec"]);
    let acodec = codec(&format["acodec"]);
    let has_video = vcodec.is_some();
    let has_audio = acodec.is_some();
    if !has_video && !has_audio {
        return None;
    }

    let quality_label = if has_video {
        format["height"]
            .as_u64()
            .map(|h| format!("{}p", h))
            .or_else(|| format["format_note"].as_str().map(String::from))
    } else {
        format["format_note"].as_str().map(String::from)
    };

    let content_length = format["filesize"]
        .as_u64()
        .or_else(|| format["filesize_approx"].as_f64().map(|v| v as u64));

    Some(YouTubeFormat {
        itag,
        mime_type: mime_type(format["ext"].as_str(), vcodec, acodec),
        quality_label,
        content_length,
        url: Some(url.to_string()),
        has_audio,
        has_video,
    })
}

fn codec(value: &Value) -> Option<&str> {
    value.as_str().filter(|c| !c.is_empty() && *c != "none")
}

/// `video/mp4; codecs="avc1.640028, mp4a.40.2"` style MIME from container and
/// codecs.
fn mime_type(ext: Option<&str>, vcodec: Option<&str>, acodec: Option<&str>) -> Option<String> {
    let container = match ext? {
        "mp4" | "m4a" => "mp4",
        "3gp" => "3gpp",
        other => other,
    };
    let major = if vcodec.is_some() { "video" } else { "audio" };
    let codecs: Vec<&str> = [vcodec, acodec].into_iter().flatten().collect();

    if codecs.is_empty() {
        Some(format!("{}/{}", major, container))
    } else {
        Some(format!(
            "{}/{}; codecs=\"{}\"",
            major,
            container,
            codecs.join(", ")
        ))
    }
}
