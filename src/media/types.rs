use serde::{Deserialize, Serialize};
use std::fmt;

pub const MP4_MIME: &str = "video/mp4";
pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    TikTok,
    YouTube,
    X,
    /// Never produced by detection; only selected through an explicit hint.
    Instagram,
    Unknown,
}

impl ProviderKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::TikTok => "TikTok",
            ProviderKind::YouTube => "YouTube",
            ProviderKind::X => "X",
            ProviderKind::Instagram => "Instagram",
            ProviderKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One retrievable media variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
}

impl MediaSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
            quality: None,
            bitrate: None,
        }
    }

    pub fn with_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_url(&self.url)
    }

    pub fn is_mp4(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|t| t.contains("mp4"))
            || self.kind() == MediaKind::Mp4
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<String>,
    pub provider: String,
    pub sources: Vec<MediaSource>,
}

/// What one resolver (or one strategy) found for a post.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub title: Option<String>,
    pub sources: Vec<MediaSource>,
}

impl Extraction {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn titled(title: Option<String>) -> Self {
        Self {
            title,
            sources: Vec::new(),
        }
    }

    pub fn new(title: Option<String>, sources: Vec<MediaSource>) -> Self {
        Self { title, sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Container family guessed from the path of a media URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Mp4,
    Hls,
    Other,
}

impl MediaKind {
    pub fn from_url(url: &str) -> Self {
        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_ascii_lowercase(),
            Err(_) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };

        if path.ends_with(".m3u8") {
            MediaKind::Hls
        } else if path.ends_with(".mp4") {
            MediaKind::Mp4
        } else {
            MediaKind::Other
        }
    }

    /// MIME type implied by the URL suffix; anything that is not HLS is
    /// treated as MP4.
    pub fn default_mime(url: &str) -> &'static str {
        match Self::from_url(url) {
            MediaKind::Hls => HLS_MIME,
            _ => MP4_MIME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_url() {
        assert_eq!(
            MediaKind::from_url("https://video.twimg.com/a/b.mp4?tag=12"),
            MediaKind::Mp4
        );
        assert_eq!(
            MediaKind::from_url("https://video.twimg.com/a/pl.m3u8"),
            MediaKind::Hls
        );
        assert_eq!(
            MediaKind::from_url("https://example.com/watch"),
            MediaKind::Other
        );
        assert_eq!(MediaKind::default_mime("https://a.b/c.M3U8"), HLS_MIME);
        assert_eq!(MediaKind::default_mime("https://a.b/c"), MP4_MIME);
    }

    #[test]
    fn test_media_source_wire_shape() {
        let source = MediaSource::new("https://a.b/c.mp4")
            .with_type(MP4_MIME)
            .with_quality("HD");
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["url"], "https://a.b/c.mp4");
        assert_eq!(json["type"], "video/mp4");
        assert_eq!(json["quality"], "HD");
        assert!(json.get("bitrate").is_none());

        let media = ResolvedMedia {
            title: None,
            thumbnails: vec![],
            provider: "X".to_string(),
            sources: vec![source],
        };
        let json = serde_json::to_value(&media).unwrap();
        assert!(json.get("title").is_none());
        assert_eq!(json["provider"], "X");
        assert_eq!(json["thumbnails"], serde_json::json!([]));
    }
}
