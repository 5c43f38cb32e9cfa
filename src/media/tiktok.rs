use super::fetch::{Header, Upstream};
use super::normalize::dedup_by_url;
use super::scan::{self, is_media_url, json_after_marker};
use super::strategy::{run_chain, Strategy};
use super::types::{Extraction, MediaKind, MediaSource, HLS_MIME, MP4_MIME};
use crate::config::Config;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use url::Url;

const PROVIDER: &str = "TikTok";

const SIGI_SCRIPT: &str = r#"<script id="SIGI_STATE" type="application/json">"#;
const SIGI_ASSIGNMENT: &str = "window['SIGI_STATE']";
const NEXT_DATA_SCRIPT: &str = r#"<script id="__NEXT_DATA__" type="application/json">"#;
const UNIVERSAL_DATA_SCRIPT: &str =
    r#"<script id="__UNIVERSAL_DATA_FOR_REHYDRATION__" type="application/json">"#;

static CDN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https://[^\s"']+\.(?:mp4|m3u8)(?:\?[^\s"'<]*)?"#)
        .expect("Invalid CDN link regex")
});

/// Path markers of TikTok's higher-bitrate video CDNs.
static PREFERRED_CDN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v1(6|9)").expect("Invalid CDN marker regex"));

/// Per-request state shared by the TikTok strategies.
pub struct TikTokPost {
    pub url: String,
    upstream: Arc<Upstream>,
    user_agent: String,
    lookup_api: String,
}

impl TikTokPost {
    fn page_headers(&self) -> [Header<'_>; 3] {
        [
            ("user-agent", self.user_agent.as_str()),
            ("accept-language", "en"),
            ("referer", "https://www.tiktok.com/"),
        ]
    }

    fn api_headers(&self) -> [Header<'_>; 2] {
        [
            ("user-agent", self.user_agent.as_str()),
            ("accept-language", "en"),
        ]
    }

    /// The post on the main web host, as handed to the mirror.
    fn canonical_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(parsed) => {
                let query = parsed.query().map(|q| format!("?{}", q)).unwrap_or_default();
                format!("https://www.tiktok.com{}{}", parsed.path(), query)
            }
            Err(_) => self.url.clone(),
        }
    }

    fn lookup_url(&self) -> Option<Url> {
        Url::parse_with_params(&self.lookup_api, &[("url", self.url.as_str()), ("hd", "1")]).ok()
    }
}

struct PageScrape;

#[async_trait]
impl Strategy<TikTokPost> for PageScrape {
    fn name(&self) -> &'static str {
        "page scrape"
    }

    async fn extract(&self, post: &TikTokPost) -> Extraction {
        let headers = post.page_headers();
        let upstream = &post.upstream;

        let mut html = upstream.fetch_text(&post.url, &headers).await;
        if html.is_empty() {
            html = upstream
                .fetch_mirror_text(&post.canonical_url(), &headers, upstream.timeout())
                .await;
        }
        if html.is_empty() {
            return Extraction::empty();
        }

        Extraction::new(scan::meta_content(&html, "og:title"), page_sources(&html))
    }
}

struct LookupApi;

#[async_trait]
impl Strategy<TikTokPost> for LookupApi {
    fn name(&self) -> &'static str {
        "lookup api"
    }

    async fn extract(&self, post: &TikTokPost) -> Extraction {
        let Some(api) = post.lookup_url() else {
            return Extraction::empty();
        };
        let upstream = &post.upstream;
        upstream
            .fetch_json_with_timeout(api.as_str(), &post.api_headers(), upstream.api_timeout())
            .await
            .map(|value| parse_lookup(&value, &api))
            .unwrap_or_default()
    }
}

struct LookupApiMirror;

#[async_trait]
impl Strategy<TikTokPost> for LookupApiMirror {
    fn name(&self) -> &'static str {
        "lookup api via mirror"
    }

    async fn extract(&self, post: &TikTokPost) -> Extraction {
        let Some(api) = post.lookup_url() else {
            return Extraction::empty();
        };
        let upstream = &post.upstream;
        upstream
            .fetch_mirror_json(api.as_str(), &post.api_headers(), upstream.api_timeout())
            .await
            .map(|value| parse_lookup(&value, &api))
            .unwrap_or_default()
    }
}

pub struct TikTokResolver {
    upstream: Arc<Upstream>,
    user_agent: String,
    lookup_api: String,
    strategies: Vec<Box<dyn Strategy<TikTokPost>>>,
}

impl TikTokResolver {
    pub fn new(upstream: Arc<Upstream>, config: &Config) -> Self {
        Self {
            upstream,
            user_agent: config.fetch.user_agent.clone(),
            lookup_api: config.tiktok.lookup_api.clone(),
            strategies: vec![
                Box::new(PageScrape),
                Box::new(LookupApi),
                Box::new(LookupApiMirror),
            ],
        }
    }

    /// Title and sources of a post. An empty source list is a normal outcome
    /// (private, region-locked, or removed posts).
    pub async fn get_info(&self, url: &str) -> Extraction {
        let post = TikTokPost {
            url: url.to_string(),
            upstream: self.upstream.clone(),
            user_agent: self.user_agent.clone(),
            lookup_api: self.lookup_api.clone(),
        };
        let found = run_chain(PROVIDER, &post, &self.strategies).await;
        Extraction::new(found.title, dedup_by_url(found.sources))
    }
}

/// Sources embedded in a post page: state blobs, ld+json blocks, then any
/// literal CDN link, deduplicated, preferred CDNs first.
pub fn page_sources(html: &str) -> Vec<MediaSource> {
    let mut sources = Vec::new();

    let sigi =
        json_after_marker(html, SIGI_SCRIPT).or_else(|| json_after_marker(html, SIGI_ASSIGNMENT));
    for blob in [
        sigi,
        json_after_marker(html, NEXT_DATA_SCRIPT),
        json_after_marker(html, UNIVERSAL_DATA_SCRIPT),
    ]
    .into_iter()
    .flatten()
    {
        sources.extend(sources_from_json(&blob));
    }

    for block in scan::ld_json_blocks(html) {
        sources.extend(sources_from_json(&block));
    }

    for link in scan::find_links(html, &CDN_LINK_RE) {
        if Url::parse(&link).is_ok() {
            let mime = MediaKind::default_mime(&link);
            sources.push(MediaSource::new(link).with_type(mime));
        }
    }

    debug!("TikTok page yielded {} candidate source(s)", sources.len());
    let mut unique = dedup_by_url(sources);
    // stable: preferred CDNs move up, everything else keeps its order
    unique.sort_by_key(|s| !PREFERRED_CDN_RE.is_match(&s.url));
    unique
}

struct Collector {
    out: Vec<MediaSource>,
}

impl Collector {
    fn push(&mut self, url: Option<&str>, mime: Option<&str>, quality: Option<String>) {
        let Some(url) = url.filter(|u| Url::parse(u).is_ok()) else {
            return;
        };
        let mime = mime.unwrap_or_else(|| MediaKind::default_mime(url));
        self.out.push(MediaSource {
            url: url.to_string(),
            mime_type: Some(mime.to_string()),
            quality,
            bitrate: None,
        });
    }
}

fn video_candidates(value: &Value) -> Vec<&Value> {
    let mut candidates = Vec::new();

    if let Some(items) = value["ItemModule"].as_object() {
        candidates.extend(items.values().map(|item| &item["video"]));
    }
    candidates.push(&value["props"]["pageProps"]["itemInfo"]["itemStruct"]["video"]);
    candidates.push(&value["detail"]["video"]);
    candidates.push(
        &value["__DEFAULT_SCOPE__"]["webapp.video-detail"]["itemInfo"]["itemStruct"]["video"],
    );

    candidates.retain(|v| v.is_object());
    candidates
}

fn label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Sources from one parsed JSON document: the known video shapes first, then
/// a walk of the whole tree for media URLs and `UrlList`-style arrays.
pub fn sources_from_json(value: &Value) -> Vec<MediaSource> {
    let mut collector = Collector { out: Vec::new() };

    for video in video_candidates(value) {
        collector.push(video["playAddr"].as_str(), None, None);
        collector.push(video["playAddrH264"].as_str(), None, None);
        collector.push(
            video["downloadAddr"].as_str(),
            Some(MP4_MIME),
            Some("watermark".to_string()),
        );
        collector.push(video["h264"].as_str(), None, None);
        collector.push(video["playApi"].as_str(), None, None);

        for rate in video["bitrateInfo"].as_array().into_iter().flatten() {
            let url = rate["PlayAddr"]["UrlList"][0]
                .as_str()
                .or_else(|| rate["PlayAddr"]["Url"].as_str())
                .or_else(|| rate["playAddr"].as_str())
                .or_else(|| rate["Url"].as_str());
            let quality = [&rate["QualityType"], &rate["Bitrate"], &rate["QualityLabel"]]
                .into_iter()
                .find_map(label);
            collector.push(url, None, quality);
        }

        for format in video["formats"].as_array().into_iter().flatten() {
            let quality = format["qualityLabel"]
                .as_str()
                .or_else(|| format["quality"].as_str())
                .map(String::from);
            collector.push(format["url"].as_str(), format["mimeType"].as_str(), quality);
        }
    }

    let walked = scan::scan_strings(
        value,
        |key| key.to_ascii_lowercase().contains("urllist"),
        is_media_url,
    );
    for url in &walked {
        collector.push(Some(url.as_str()), None, None);
    }

    dedup_by_url(collector.out)
}

/// Reads the lookup API envelope (`code == 0`, `data.{hdplay,play,wmplay,hls_url}`).
/// Relative play paths are resolved against the API address.
pub fn parse_lookup(value: &Value, api: &Url) -> Extraction {
    if value["code"].as_i64() != Some(0) || !value["data"].is_object() {
        return Extraction::empty();
    }
    let data = &value["data"];

    let absolute = |field: &str| -> Option<String> {
        let raw = data[field].as_str().filter(|s| !s.is_empty())?;
        api.join(raw).ok().map(|u| u.to_string())
    };

    let mut sources = Vec::new();
    if let Some(url) = absolute("hdplay") {
        sources.push(MediaSource::new(url).with_type(MP4_MIME).with_quality("HD"));
    }
    if let Some(url) = absolute("play") {
        sources.push(MediaSource::new(url).with_type(MP4_MIME));
    }
    if let Some(url) = absolute("wmplay") {
        sources.push(
            MediaSource::new(url)
                .with_type(MP4_MIME)
                .with_quality("watermark"),
        );
    }
    if let Some(url) = absolute("hls_url") {
        sources.push(MediaSource::new(url).with_type(HLS_MIME));
    }

    let title = data["title"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(String::from);
    Extraction::new(title, dedup_by_url(sources))
}
