//! Instagram reels and video posts. Only reachable through an explicit
//! provider hint: detection never classifies instagram.com.

use super::fetch::{Header, Upstream};
use super::normalize::dedup_by_url;
use super::scan::{self, is_media_url, json_after_marker, unescape_url};
use super::strategy::{run_chain, Strategy};
use super::types::{Extraction, MediaKind, MediaSource, HLS_MIME, MP4_MIME};
use crate::config::{Config, InstagramConfig};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use url::Url;

const PROVIDER: &str = "Instagram";

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 11; SAMSUNG SM-G973U) AppleWebKit/537.36 (KHTML, like Gecko) SamsungBrowser/14.2 Chrome/87.0.4280.141 Mobile Safari/537.36";
const GRAPHQL_ENDPOINT: &str = "https://www.instagram.com/graphql/query";
const DDINSTAGRAM: &str = "https://ddinstagram.com";
const ADDITIONAL_DATA_MARKER: &str = "window.__additionalDataLoaded(";

static VIDEO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"video_url"\s*:\s*"([^"]+\.mp4[^"]*)""#).expect("Invalid video_url regex")
});

static VIDEO_VERSIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)"video_versions"\s*:\s*\[(\{.*?\})\]"#)
        .expect("Invalid video_versions regex")
});

static URL_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""url"\s*:\s*"([^"]+\.mp4[^"]*)""#).expect("Invalid url field regex")
});

static HLS_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^"\\]+\.m3u8[^"\\]*"#).expect("Invalid HLS link regex")
});

static MP4_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s"']+\.mp4(?:\?[^\s"'<]*)?"#).expect("Invalid MP4 link regex")
});

/// Post shortcode from the segment after `p`, `reel`, or `tv`.
pub fn parse_shortcode(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let index = segments
        .iter()
        .position(|s| matches!(*s, "p" | "reel" | "tv"))?;
    segments.get(index + 1).map(|code| code.to_string())
}

/// Per-request state shared by the Instagram strategies.
pub struct InstagramPost {
    pub url: String,
    pub shortcode: Option<String>,
    upstream: Arc<Upstream>,
    settings: Arc<InstagramConfig>,
    user_agent: String,
}

impl InstagramPost {
    /// `extra` plus the session cookie when one is configured.
    fn headers<'a>(&'a self, extra: &[Header<'a>]) -> Vec<Header<'a>> {
        let mut headers = extra.to_vec();
        if let Some(cookie) = self.settings.cookie.as_deref() {
            headers.push(("cookie", cookie));
        }
        headers
    }

    fn browser_headers(&self) -> Vec<Header<'_>> {
        self.headers(&[
            ("user-agent", self.user_agent.as_str()),
            ("accept-language", "en"),
            ("referer", "https://www.instagram.com/"),
        ])
    }

    fn app_headers(&self) -> Vec<Header<'_>> {
        self.headers(&[
            ("user-agent", self.user_agent.as_str()),
            ("accept-language", "en"),
            ("referer", "https://www.instagram.com/"),
            ("x-ig-app-id", self.settings.app_id.as_str()),
        ])
    }

    /// Post URL without query or fragment.
    fn clean_url(&self) -> &str {
        match self.url.find(['?', '#']) {
            Some(end) => &self.url[..end],
            None => &self.url,
        }
    }

    /// The post on the main web host, query included.
    fn canonical_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(parsed) => {
                let query = parsed.query().map(|q| format!("?{}", q)).unwrap_or_default();
                format!("https://www.instagram.com{}{}", parsed.path(), query)
            }
            Err(_) => self.url.clone(),
        }
    }
}

/// Form fields of the post-by-shortcode GraphQL query.
pub fn graphql_form(shortcode: &str, settings: &InstagramConfig, now: u64) -> Vec<(String, String)> {
    let variables = json!({
        "shortcode": shortcode,
        "fetch_tagged_user_count": null,
        "hoisted_comment_id": null,
        "hoisted_reply_id": null,
    });

    [
        ("av", "0".to_string()),
        ("__d", "www".to_string()),
        ("__user", "0".to_string()),
        ("__a", "1".to_string()),
        ("__req", "g".to_string()),
        ("__hs", "20183.HYP:instagram_web_pkg.2.1".to_string()),
        ("dpr", "2".to_string()),
        ("__ccg", "GOOD".to_string()),
        ("__rev", "1021613311".to_string()),
        ("__s", "x0losd:ztapmw:hm5eih".to_string()),
        ("__hsi", "7489787314313612244".to_string()),
        ("__comet_req", "7".to_string()),
        ("lsd", settings.lsd.clone()),
        ("jazoest", "2952".to_string()),
        ("__spin_r", "1021613311".to_string()),
        ("__spin_b", "trunk".to_string()),
        ("__spin_t", now.to_string()),
        ("__crn", "comet.igweb.PolarisPostRoute".to_string()),
        ("fb_api_caller_class", "RelayModern".to_string()),
        (
            "fb_api_req_friendly_name",
            "PolarisPostActionLoadPostQueryQuery".to_string(),
        ),
        ("variables", variables.to_string()),
        ("server_timestamps", "true".to_string()),
        ("doc_id", settings.doc_id.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

struct GraphQl;

#[async_trait]
impl Strategy<InstagramPost> for GraphQl {
    fn name(&self) -> &'static str {
        "graphql"
    }

    async fn extract(&self, post: &InstagramPost) -> Extraction {
        let Some(code) = post.shortcode.as_deref() else {
            return Extraction::empty();
        };
        let settings = &post.settings;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let form = graphql_form(code, settings, now);
        let referer = format!("https://www.instagram.com/p/{}/", code);

        let mut base: Vec<Header<'_>> = vec![
            ("user-agent", MOBILE_USER_AGENT),
            ("accept", "*/*"),
            ("accept-language", "en-US,en;q=0.5"),
            ("x-ig-app-id", settings.web_app_id.as_str()),
            ("x-asbd-id", settings.asbd_id.as_str()),
            ("x-fb-lsd", settings.lsd.as_str()),
            ("x-bloks-version-id", settings.bloks_version.as_str()),
            ("pragma", "no-cache"),
            ("cache-control", "no-cache"),
            ("referer", referer.as_str()),
        ];
        if let Some(csrf) = settings.csrf_token.as_deref() {
            base.push(("x-csrftoken", csrf));
        }
        let headers = post.headers(&base);

        let upstream = &post.upstream;
        let Some(response) = upstream
            .post_form(GRAPHQL_ENDPOINT, &form, &headers, upstream.api_timeout())
            .await
        else {
            return Extraction::empty();
        };
        if matches!(response.status, 401 | 404 | 429) {
            debug!("Instagram GraphQL answered HTTP {}", response.status);
            return Extraction::empty();
        }
        if !response.is_success() {
            return Extraction::empty();
        }

        serde_json::from_str::<Value>(&response.body)
            .map(|value| parse_graphql(&value))
            .unwrap_or_default()
    }
}

/// Reads `data.xdt_shortcode_media` of a GraphQL post response.
pub fn parse_graphql(value: &Value) -> Extraction {
    let media = &value["data"]["xdt_shortcode_media"];
    if !media.is_object() {
        return Extraction::empty();
    }

    if media["is_video"].as_bool() == Some(true) {
        if let Some(url) = media["video_url"].as_str() {
            let title = media["title"]
                .as_str()
                .filter(|t| !t.is_empty())
                .or_else(|| media["edge_media_to_caption"]["edges"][0]["node"]["text"].as_str())
                .map(String::from);
            return Extraction::new(title, vec![MediaSource::new(url).with_type(MP4_MIME)]);
        }
    }

    let sources = media["video_versions"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| v["url"].as_str())
        .map(|url| MediaSource::new(url).with_type(MP4_MIME))
        .collect();
    Extraction::new(media["title"].as_str().map(String::from), sources)
}

struct PageScrape;

#[async_trait]
impl Strategy<InstagramPost> for PageScrape {
    fn name(&self) -> &'static str {
        "page scrape"
    }

    async fn extract(&self, post: &InstagramPost) -> Extraction {
        let upstream = &post.upstream;
        let mut html = upstream.fetch_text(&post.url, &post.browser_headers()).await;
        if html.is_empty() {
            let headers = post.headers(&[
                ("user-agent", post.user_agent.as_str()),
                ("accept-language", "en"),
            ]);
            html = upstream
                .fetch_mirror_text(&post.canonical_url(), &headers, upstream.timeout())
                .await;
        }
        if html.is_empty() {
            return Extraction::empty();
        }

        let title = scan::first_meta(&html, &["og:title", "twitter:title"]);
        Extraction::new(title, page_sources(&html))
    }
}

fn push_valid(sources: &mut Vec<MediaSource>, url: String, mime: &str) {
    if Url::parse(&url).is_ok() {
        sources.push(MediaSource::new(url).with_type(mime));
    }
}

/// Video URLs embedded in a post page, in the order they are looked for:
/// the `video_url` field, the first `video_versions` block, HLS manifests,
/// bare MP4 links, then `__additionalDataLoaded` payloads.
pub fn page_sources(html: &str) -> Vec<MediaSource> {
    let mut sources = Vec::new();

    if let Some(c) = VIDEO_URL_RE.captures(html) {
        push_valid(&mut sources, unescape_url(&c[1]), MP4_MIME);
    }

    if let Some(block) = VIDEO_VERSIONS_RE.find(html) {
        for c in URL_FIELD_RE.captures_iter(block.as_str()) {
            push_valid(&mut sources, unescape_url(&c[1]), MP4_MIME);
        }
    }

    for link in scan::find_links(html, &HLS_LINK_RE) {
        push_valid(&mut sources, unescape_url(&link), HLS_MIME);
    }

    for link in scan::find_links(html, &MP4_LINK_RE) {
        push_valid(&mut sources, link, MP4_MIME);
    }

    for (index, _) in html.match_indices(ADDITIONAL_DATA_MARKER) {
        // the payload is the second argument; the first is a quoted path
        if let Some(payload) = json_after_marker(&html[index..], ADDITIONAL_DATA_MARKER) {
            sources.extend(collect_from_json(&payload));
        }
    }

    dedup_by_url(sources)
}

/// Shared walk over any Instagram JSON document: `video_url` fields,
/// `video_versions[].url`, and any string that is itself a media URL.
pub fn collect_from_json(value: &Value) -> Vec<MediaSource> {
    let mut out = Vec::new();
    visit(value, &mut out);
    dedup_by_url(out)
}

fn visit(value: &Value, out: &mut Vec<MediaSource>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| visit(item, out)),
        Value::Object(map) => {
            if let Some(url) = map.get("video_url").and_then(Value::as_str) {
                push_valid(out, url.to_string(), MP4_MIME);
            }
            if let Some(versions) = map.get("video_versions").and_then(Value::as_array) {
                for url in versions.iter().filter_map(|v| v["url"].as_str()) {
                    push_valid(out, url.to_string(), MP4_MIME);
                }
            }
            for child in map.values() {
                match child {
                    Value::String(s) if is_media_url(s) => {
                        push_valid(out, s.clone(), MediaKind::default_mime(s));
                    }
                    Value::Array(_) | Value::Object(_) => visit(child, out),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// `?__a=1` document in its GraphQL (`graphql.shortcode_media`) or items
/// (`items[0].video_versions`) shape.
pub fn parse_legacy_json(value: &Value) -> Extraction {
    let mut sources = Vec::new();

    let media = &value["graphql"]["shortcode_media"];
    if let Some(url) = media["video_url"].as_str() {
        push_valid(&mut sources, url.to_string(), MediaKind::default_mime(url));
    }
    let versions = media["video_versions"]
        .as_array()
        .into_iter()
        .chain(value["items"][0]["video_versions"].as_array())
        .flatten();
    for url in versions.filter_map(|v| v["url"].as_str()) {
        push_valid(&mut sources, url.to_string(), MediaKind::default_mime(url));
    }

    let title = value["seo"]["title"]
        .as_str()
        .or_else(|| value["title"].as_str())
        .map(String::from);
    Extraction::new(title, dedup_by_url(sources))
}

struct LegacyJson;

#[async_trait]
impl Strategy<InstagramPost> for LegacyJson {
    fn name(&self) -> &'static str {
        "legacy json endpoint"
    }

    async fn extract(&self, post: &InstagramPost) -> Extraction {
        let upstream = &post.upstream;
        let endpoint = format!("{}?__a=1&__d=dis", post.clean_url());
        let direct = upstream
            .fetch_json_with_timeout(&endpoint, &post.app_headers(), upstream.api_timeout())
            .await
            .map(|value| parse_legacy_json(&value))
            .unwrap_or_default();
        if !direct.is_empty() {
            return direct;
        }

        let path = Url::parse(post.clean_url())
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        let target = format!("https://www.instagram.com{}?__a=1&__d=dis", path);
        let headers = post.headers(&[
            ("user-agent", post.user_agent.as_str()),
            ("accept-language", "en"),
            ("x-ig-app-id", post.settings.app_id.as_str()),
        ]);
        let proxied = upstream
            .fetch_mirror_json(&target, &headers, upstream.api_timeout())
            .await
            .map(|value| parse_legacy_json(&value))
            .unwrap_or_default();
        // a page title found earlier wins over the mirrored document's
        Extraction::new(None, proxied.sources)
    }
}

struct DdReel;

#[async_trait]
impl Strategy<InstagramPost> for DdReel {
    fn name(&self) -> &'static str {
        "ddinstagram reel page"
    }

    async fn extract(&self, post: &InstagramPost) -> Extraction {
        let Some(code) = post.shortcode.as_deref() else {
            return Extraction::empty();
        };
        let upstream = &post.upstream;
        let page = format!("{}/reel/{}/", DDINSTAGRAM, code);
        let headers = post.headers(&[
            ("user-agent", post.user_agent.as_str()),
            ("accept-language", "en"),
        ]);
        let html = upstream
            .fetch_text_or_mirror(&page, &headers, upstream.api_timeout())
            .await;
        if html.is_empty() {
            return Extraction::empty();
        }

        let mut sources = Vec::new();
        if let Some(video) = scan::first_meta(&html, &["og:video", "og:video:secure_url"]) {
            push_valid(&mut sources, video, MP4_MIME);
        }
        for link in scan::find_links(&html, &MP4_LINK_RE) {
            push_valid(&mut sources, link, MP4_MIME);
        }
        Extraction::new(None, dedup_by_url(sources))
    }
}

struct ShortcodeApi;

#[async_trait]
impl Strategy<InstagramPost> for ShortcodeApi {
    fn name(&self) -> &'static str {
        "shortcode media api"
    }

    async fn extract(&self, post: &InstagramPost) -> Extraction {
        let Some(code) = post.shortcode.as_deref() else {
            return Extraction::empty();
        };
        let upstream = &post.upstream;
        let timeout = upstream.api_timeout();

        let mobile = format!("https://i.instagram.com/api/v1/media/shortcode/{}/", code);
        let mobile_headers = post.headers(&[
            ("user-agent", MOBILE_USER_AGENT),
            ("accept-language", "en"),
            ("x-ig-app-id", post.settings.app_id.as_str()),
        ]);
        if let Some(value) = upstream
            .fetch_json_with_timeout(&mobile, &mobile_headers, timeout)
            .await
        {
            let sources = collect_from_json(&value);
            if !sources.is_empty() {
                return Extraction::new(None, sources);
            }
        }

        let web = format!(
            "https://www.instagram.com/api/v1/media/shortcode/{}/?__a=1&__d=dis",
            code
        );
        let value = upstream
            .fetch_json_or_mirror(&web, &post.app_headers(), timeout)
            .await;
        Extraction::new(None, value.map(|v| collect_from_json(&v)).unwrap_or_default())
    }
}

struct DdApi;

#[async_trait]
impl Strategy<InstagramPost> for DdApi {
    fn name(&self) -> &'static str {
        "ddinstagram api"
    }

    async fn extract(&self, post: &InstagramPost) -> Extraction {
        let Ok(api) = Url::parse_with_params(&format!("{}/api", DDINSTAGRAM), &[("url", &post.url)])
        else {
            return Extraction::empty();
        };
        let upstream = &post.upstream;
        let headers = post.headers(&[
            ("user-agent", post.user_agent.as_str()),
            ("accept-language", "en"),
        ]);
        let sources = upstream
            .fetch_json_or_mirror(api.as_str(), &headers, upstream.api_timeout())
            .await
            .map(|value| {
                scan::media_urls_in(&value)
                    .into_iter()
                    .map(|url| {
                        let mime = MediaKind::default_mime(&url);
                        MediaSource::new(url).with_type(mime)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Extraction::new(None, dedup_by_url(sources))
    }
}

pub struct InstagramResolver {
    upstream: Arc<Upstream>,
    settings: Arc<InstagramConfig>,
    user_agent: String,
    strategies: Vec<Box<dyn Strategy<InstagramPost>>>,
}

impl InstagramResolver {
    pub fn new(upstream: Arc<Upstream>, config: &Config) -> Self {
        Self {
            upstream,
            settings: Arc::new(config.instagram.clone()),
            user_agent: config.fetch.user_agent.clone(),
            strategies: vec![
                Box::new(GraphQl),
                Box::new(PageScrape),
                Box::new(LegacyJson),
                Box::new(DdReel),
                Box::new(ShortcodeApi),
                Box::new(DdApi),
            ],
        }
    }

    pub async fn get_info(&self, url: &str) -> Extraction {
        let post = InstagramPost {
            url: url.to_string(),
            shortcode: parse_shortcode(url),
            upstream: self.upstream.clone(),
            settings: self.settings.clone(),
            user_agent: self.user_agent.clone(),
        };
        let found = run_chain(PROVIDER, &post, &self.strategies).await;
        Extraction::new(found.title, dedup_by_url(found.sources))
    }
}
