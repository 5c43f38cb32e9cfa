//! YouTube resolution: format enumeration is delegated to a `FormatProvider`
//! (yt-dlp in production), this module only validates URLs and applies the
//! quality selection policy.

use super::error::ResolveError;
use super::fetch::Upstream;
use super::types::{MediaSource, ResolvedMedia};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};
use url::Url;

const PROVIDER: &str = "YouTube";

static HEIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{3,4})p").expect("Invalid height regex"));

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("Invalid video id regex"));

const QUERY_HOSTS: &[&str] = &[
    "youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

const PATH_PREFIXES: &[&str] = &["embed", "v", "shorts", "live"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct YouTubeFormat {
    pub itag: String,
    pub mime_type: Option<String>,
    pub quality_label: Option<String>,
    pub content_length: Option<u64>,
    pub url: Option<String>,
    pub has_audio: bool,
    pub has_video: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub thumbnails: Vec<String>,
    pub formats: Vec<YouTubeFormat>,
}

/// Streaming-metadata capability that enumerates a video's formats.
#[async_trait]
pub trait FormatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn video_info(&self, url: &str) -> Result<VideoInfo>;

    /// Whether the provider can run at all on this host.
    async fn test_availability(&self) -> bool {
        true
    }
}

/// The 11-character video ID of a canonical watch, short-link, embed,
/// shorts, or live URL.
pub fn video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let bare = host.strip_prefix("www.").unwrap_or(&host);
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let candidate = if bare == "youtu.be" {
        segments.first().map(|s| s.to_string())
    } else if QUERY_HOSTS.contains(&bare) || bare == "youtube-nocookie.com" {
        let from_query = parsed
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned());
        from_query.or_else(|| match segments.as_slice() {
            [prefix, id, ..] if PATH_PREFIXES.contains(prefix) => Some(id.to_string()),
            _ => None,
        })
    } else {
        None
    };

    candidate.filter(|id| VIDEO_ID_RE.is_match(id))
}

/// Same URL with `hl=en` so titles come back in English.
fn with_english(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "hl")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("hl", "en");
    parsed.to_string()
}

fn height(label: Option<&str>) -> u32 {
    label
        .and_then(|l| HEIGHT_RE.captures(l))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

/// Coarse audio bitrate proxy from the codec named in the MIME type.
fn audio_rank(mime: Option<&str>) -> u8 {
    match mime {
        None => 0,
        Some(m) if m.contains("opus") => 3,
        Some(m) if m.contains("mp4a") => 2,
        Some(_) => 1,
    }
}

/// Tallest progressive MP4 (audio and video in one stream). With a cap, the
/// tallest one at or under it, falling back to the overall tallest. A cap of 0
/// means no cap.
pub fn select_best_mp4(formats: &[YouTubeFormat], max_height: Option<u32>) -> Option<&YouTubeFormat> {
    let mut mp4: Vec<&YouTubeFormat> = formats
        .iter()
        .filter(|f| {
            f.mime_type
                .as_deref()
                .is_some_and(|m| m.contains("video/mp4"))
                && f.has_video
                && f.has_audio
        })
        .collect();
    mp4.sort_by_key(|f| std::cmp::Reverse(height(f.quality_label.as_deref())));

    if let Some(cap) = max_height.filter(|&cap| cap > 0) {
        if let Some(found) = mp4
            .iter()
            .copied()
            .find(|f| height(f.quality_label.as_deref()) <= cap)
        {
            return Some(found);
        }
    }
    mp4.first().copied()
}

/// Best audio-only format: Opus over AAC over anything else.
pub fn select_best_audio(formats: &[YouTubeFormat]) -> Option<&YouTubeFormat> {
    let mut audio: Vec<&YouTubeFormat> = formats
        .iter()
        .filter(|f| f.has_audio && !f.has_video)
        .collect();
    audio.sort_by_key(|f| std::cmp::Reverse(audio_rank(f.mime_type.as_deref())));
    audio.first().copied()
}

/// Format a download should use: best MP4 up to 1080p, then up to 720p, then
/// any format with video, then the best audio-only format.
pub fn select_download_format(formats: &[YouTubeFormat]) -> Result<&YouTubeFormat, ResolveError> {
    select_best_mp4(formats, Some(1080))
        .or_else(|| select_best_mp4(formats, Some(720)))
        .or_else(|| formats.iter().find(|f| f.has_video))
        .or_else(|| select_best_audio(formats))
        .ok_or(ResolveError::NoDownloadableFormat)
}

fn to_source(format: &YouTubeFormat, quality: String) -> Option<MediaSource> {
    let url = format.url.as_ref()?;
    Some(MediaSource {
        url: url.clone(),
        mime_type: format.mime_type.clone(),
        quality: Some(quality),
        bitrate: None,
    })
}

/// Sources offered for a video: best audio, best up to 1080p, and best up to
/// 720p when that is a different format.
pub fn sources_from_formats(formats: &[YouTubeFormat]) -> Vec<MediaSource> {
    let best_1080 = select_best_mp4(formats, Some(1080));
    let best_720 = select_best_mp4(formats, Some(720));
    let audio = select_best_audio(formats);

    let mut sources = Vec::new();
    if let Some(a) = audio.and_then(|a| to_source(a, "Audio".to_string())) {
        sources.push(a);
    }
    if let Some(f) = best_1080 {
        let label = f.quality_label.clone().unwrap_or_else(|| "1080p".to_string());
        sources.extend(to_source(f, label));
    }
    if let Some(f) = best_720 {
        if best_1080.map(|b| &b.itag) != Some(&f.itag) {
            let label = f.quality_label.clone().unwrap_or_else(|| "720p".to_string());
            sources.extend(to_source(f, label));
        }
    }
    sources
}

pub struct YouTubeResolver {
    formats: Arc<dyn FormatProvider>,
    upstream: Arc<Upstream>,
    fallback_resolver: Option<String>,
}

impl YouTubeResolver {
    pub fn new(
        formats: Arc<dyn FormatProvider>,
        upstream: Arc<Upstream>,
        fallback_resolver: Option<String>,
    ) -> Self {
        Self {
            formats,
            upstream,
            fallback_resolver,
        }
    }

    pub async fn test_availability(&self) -> bool {
        self.formats.test_availability().await
    }

    /// Title, thumbnails, and formats of a video. Extraction failures are
    /// classified as upstream-unavailable (sign-in wall, bot check) or
    /// internal.
    pub async fn get_info(&self, url: &str) -> Result<VideoInfo, ResolveError> {
        if video_id(url).is_none() {
            return Err(ResolveError::InvalidUrl { provider: PROVIDER });
        }

        self.formats
            .video_info(&with_english(url))
            .await
            .map_err(|e| {
                warn!("{} failed for {}: {:#}", self.formats.name(), url, e);
                ResolveError::from_extraction(&e)
            })
    }

    pub async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        let info = match self.get_info(url).await {
            Ok(info) => info,
            Err(e @ ResolveError::InvalidUrl { .. }) => return Err(e),
            Err(e) => {
                return match self.resolve_with_fallback(url).await {
                    Some(media) => Ok(media),
                    None => Err(e),
                };
            }
        };

        let sources = sources_from_formats(&info.formats);
        if sources.is_empty() {
            return Err(ResolveError::NoDownloadableFormat);
        }

        Ok(ResolvedMedia {
            title: Some(info.title),
            thumbnails: info.thumbnails,
            provider: PROVIDER.to_string(),
            sources,
        })
    }

    /// The single format a download should stream, as a source.
    pub async fn best_source(&self, url: &str) -> Result<MediaSource, ResolveError> {
        let info = self.get_info(url).await?;
        let format = select_download_format(&info.formats)?;
        let quality = format
            .quality_label
            .clone()
            .unwrap_or_else(|| if format.has_video { "MP4" } else { "Audio" }.to_string());
        to_source(format, quality).ok_or(ResolveError::NoDownloadableFormat)
    }

    /// Asks the external resolve service. Only a response with at least one
    /// usable source counts.
    async fn resolve_with_fallback(&self, url: &str) -> Option<ResolvedMedia> {
        let base = self.fallback_resolver.as_deref()?;
        let endpoint = Url::parse_with_params(base, &[("url", url)]).ok()?;
        info!("Trying fallback resolver for {}", url);

        let value = self
            .upstream
            .fetch_json_with_timeout(endpoint.as_str(), &[], self.upstream.api_timeout())
            .await?;
        let media = parse_fallback(&endpoint, &value);
        if media.sources.is_empty() {
            warn!("Fallback resolver returned no sources for {}", url);
            return None;
        }
        Some(media)
    }
}

fn parse_fallback(endpoint: &Url, value: &Value) -> ResolvedMedia {
    let thumbnails = value["thumbnails"]
        .as_array()
        .map(|a| a.iter().filter_map(|t| t.as_str()).map(String::from).collect())
        .unwrap_or_default();

    let sources = value["sources"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|s| {
                    let url = endpoint.join(s["url"].as_str()?).ok()?;
                    Some(MediaSource {
                        url: url.to_string(),
                        mime_type: s["type"].as_str().map(String::from),
                        quality: s["quality"].as_str().map(String::from),
                        bitrate: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ResolvedMedia {
        title: value["title"].as_str().map(String::from),
        thumbnails,
        provider: PROVIDER.to_string(),
        sources,
    }
}
