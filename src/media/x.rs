use super::fetch::{Header, Upstream};
use super::normalize::{dedup_by_url, prefer_mp4, sort_by_bitrate_desc};
use super::scan::{self, is_media_url};
use super::strategy::{run_chain, Strategy};
use super::types::{Extraction, MediaKind, MediaSource, MP4_MIME};
use crate::config::Config;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use url::Url;

const PROVIDER: &str = "X";

const API_HEADERS: [Header<'static>; 2] = [("user-agent", "Mozilla/5.0"), ("accept-language", "en")];

static TWIMG_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://video\.twimg\.com/[^"\s<]+\.(?:mp4|m3u8)[^"<\s)]*"#)
        .expect("Invalid twimg link regex")
});

static VID_SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/vid/(?:[^/]+/)?(\d+)x(\d+)/").expect("Invalid video size regex")
});

/// Numeric ID from the path segment following `status` or `statuses`.
pub fn parse_tweet_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let index = segments
        .iter()
        .position(|s| *s == "status" || *s == "statuses")?;
    segments
        .get(index + 1)
        .filter(|id| id.bytes().all(|b| b.is_ascii_digit()))
        .map(|id| id.to_string())
}

/// Resolution label for a variant bitrate.
pub fn bitrate_label(bitrate: Option<u64>) -> Option<&'static str> {
    match bitrate? {
        b if b >= 5_000_000 => Some("1080p"),
        b if b >= 2_500_000 => Some("720p"),
        b if b >= 1_000_000 => Some("480p"),
        _ => None,
    }
}

/// `{height}p` from a `/vid/{w}x{h}/` path segment.
pub fn quality_from_path(url: &str) -> Option<String> {
    let path = Url::parse(url).ok()?.path().to_string();
    VID_SIZE_RE.captures(&path).map(|c| format!("{}p", &c[2]))
}

/// Per-request state shared by the X strategies.
pub struct Tweet {
    pub url: String,
    pub id: Option<String>,
    upstream: Arc<Upstream>,
    syndication_api: String,
    mirror_api: String,
    user_agent: String,
}

impl Tweet {
    fn mirror_api_url(&self, id: &str) -> String {
        format!("{}/{}", self.mirror_api.trim_end_matches('/'), id)
    }

    fn alternate_pages(&self, id: &str) -> Vec<String> {
        let direct = [
            format!("https://x.com/i/status/{}", id),
            format!("https://x.com/status/{}", id),
            format!("https://mobile.twitter.com/i/status/{}", id),
            format!("https://mobile.twitter.com/status/{}", id),
        ];
        let mirrored: Vec<String> = direct
            .iter()
            .map(|page| self.upstream.mirror_url(page))
            .collect();
        direct.into_iter().chain(mirrored).collect()
    }
}

struct Syndication;

#[async_trait]
impl Strategy<Tweet> for Syndication {
    fn name(&self) -> &'static str {
        "syndication api"
    }

    async fn extract(&self, tweet: &Tweet) -> Extraction {
        let Some(id) = tweet.id.as_deref() else {
            return Extraction::empty();
        };
        let Ok(api) =
            Url::parse_with_params(&tweet.syndication_api, &[("id", id), ("lang", "en")])
        else {
            return Extraction::empty();
        };

        tweet
            .upstream
            .fetch_json(api.as_str(), &API_HEADERS)
            .await
            .map(|value| parse_syndication(&value))
            .unwrap_or_default()
    }
}

struct MirrorApi;

#[async_trait]
impl Strategy<Tweet> for MirrorApi {
    fn name(&self) -> &'static str {
        "mirror api"
    }

    async fn extract(&self, tweet: &Tweet) -> Extraction {
        let Some(id) = tweet.id.as_deref() else {
            return Extraction::empty();
        };
        tweet
            .upstream
            .fetch_json(&tweet.mirror_api_url(id), &API_HEADERS)
            .await
            .map(|value| parse_mirror_api(&value))
            .unwrap_or_default()
    }
}

struct MirrorApiProxied;

#[async_trait]
impl Strategy<Tweet> for MirrorApiProxied {
    fn name(&self) -> &'static str {
        "mirror api via proxy"
    }

    async fn extract(&self, tweet: &Tweet) -> Extraction {
        let Some(id) = tweet.id.as_deref() else {
            return Extraction::empty();
        };
        let upstream = &tweet.upstream;
        let text = upstream
            .fetch_mirror_text(&tweet.mirror_api_url(id), &API_HEADERS, upstream.timeout())
            .await;
        if text.is_empty() {
            return Extraction::empty();
        }

        let mut candidates = scan::parse_json_loose(&text)
            .map(|value| mirror_api_candidates(&value))
            .unwrap_or_default();
        if candidates.is_empty() {
            candidates = scan::find_links(&text, &TWIMG_LINK_RE);
        }

        let sources = candidate_sources(candidates, false);
        Extraction::new(None, sources)
    }
}

struct PageScrape;

#[async_trait]
impl Strategy<Tweet> for PageScrape {
    fn name(&self) -> &'static str {
        "page scrape"
    }

    async fn extract(&self, tweet: &Tweet) -> Extraction {
        let headers = [
            ("user-agent", tweet.user_agent.as_str()),
            ("accept-language", "en,en-US;q=0.9"),
        ];
        let html = tweet.upstream.fetch_text(&tweet.url, &headers).await;
        let title = scan::first_meta(&html, &["og:title", "twitter:title"]);

        let mut candidates = Vec::new();
        if let Some(video) = scan::first_meta(
            &html,
            &["og:video", "og:video:url", "og:video:secure_url"],
        ) {
            if video.contains("video.twimg.com") {
                candidates.push(video);
            }
        }
        candidates.extend(scan::find_links(&html, &TWIMG_LINK_RE));

        match tweet.id.as_deref() {
            Some(id) if candidates.is_empty() => {
                for page in tweet.alternate_pages(id) {
                    let text = tweet.upstream.fetch_text(&page, &API_HEADERS).await;
                    candidates.extend(scan::find_links(&text, &TWIMG_LINK_RE));
                    if !candidates.is_empty() {
                        break;
                    }
                }
            }
            _ => {}
        }

        Extraction::new(title, candidate_sources(candidates, true))
    }
}

pub struct XResolver {
    upstream: Arc<Upstream>,
    syndication_api: String,
    mirror_api: String,
    user_agent: String,
    strategies: Vec<Box<dyn Strategy<Tweet>>>,
}

impl XResolver {
    pub fn new(upstream: Arc<Upstream>, config: &Config) -> Self {
        Self {
            upstream,
            syndication_api: config.x.syndication_api.clone(),
            mirror_api: config.x.mirror_api.clone(),
            user_agent: config.fetch.user_agent.clone(),
            strategies: vec![
                Box::new(Syndication),
                Box::new(MirrorApi),
                Box::new(MirrorApiProxied),
                Box::new(PageScrape),
            ],
        }
    }

    /// Title and sources of a post, highest bitrate first when bitrates are
    /// known. Posts without video yield an empty source list.
    pub async fn get_info(&self, url: &str) -> Extraction {
        let tweet = Tweet {
            url: url.to_string(),
            id: parse_tweet_id(url),
            upstream: self.upstream.clone(),
            syndication_api: self.syndication_api.clone(),
            mirror_api: self.mirror_api.clone(),
            user_agent: self.user_agent.clone(),
        };
        let found = run_chain(PROVIDER, &tweet, &self.strategies).await;
        Extraction::new(found.title, dedup_by_url(found.sources))
    }
}

fn variant(url: &str, mime: Option<&str>, bitrate: Option<u64>) -> MediaSource {
    MediaSource {
        url: url.to_string(),
        mime_type: Some(
            mime.unwrap_or_else(|| MediaKind::default_mime(url))
                .to_string(),
        ),
        quality: bitrate_label(bitrate).map(String::from),
        bitrate,
    }
}

/// Syndication payload: `video.variants[]` (`src`/`type`) and
/// `mediaDetails[].video_info.variants[]` (`url`/`content_type`). Only MP4
/// and HLS variants are kept.
pub fn parse_syndication(value: &Value) -> Extraction {
    let title = value["text"].as_str().map(String::from);

    let details = value["mediaDetails"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|m| m["video_info"]["variants"].as_array().into_iter().flatten());
    let listed = value["video"]["variants"].as_array().into_iter().flatten();

    let mut sources: Vec<MediaSource> = listed
        .chain(details)
        .filter_map(|v| {
            let url = v["src"].as_str().or_else(|| v["url"].as_str())?;
            let mime = v["type"].as_str().or_else(|| v["content_type"].as_str())?;
            let lower = mime.to_ascii_lowercase();
            if !(lower.contains("mp4") || lower.contains("m3u8")) {
                return None;
            }
            Some(variant(url, Some(mime), v["bitrate"].as_u64()))
        })
        .collect();

    sort_by_bitrate_desc(&mut sources);
    Extraction::new(title, dedup_by_url(sources))
}

/// Mirror API payload in any of its known shapes. Falls back to a walk of the
/// whole document for media URLs.
pub fn parse_mirror_api(value: &Value) -> Extraction {
    let title = value["text"]
        .as_str()
        .or_else(|| value["tweet"]["text"].as_str())
        .map(String::from);

    let mut sources = Vec::new();
    for media in value["media_extended"].as_array().into_iter().flatten() {
        push_variants(&mut sources, &media["variants"]);
        if let Some(url) = media["url"].as_str().filter(|u| is_media_url(u)) {
            let mime = media["type"].as_str().filter(|t| t.contains('/'));
            sources.push(variant(url, mime, None));
        }
    }
    push_variants(&mut sources, &value["variants"]);

    if let Some(url) = value["video_url"].as_str() {
        sources.push(variant(url, Some(MP4_MIME), None));
    }
    if sources.is_empty() {
        for url in value["mediaURLs"].as_array().into_iter().flatten() {
            if let Some(url) = url.as_str().filter(|u| is_media_url(u)) {
                sources.push(variant(url, None, None));
            }
        }
    }
    if sources.is_empty() {
        for url in scan::media_urls_in(value) {
            sources.push(variant(&url, None, None));
        }
    }

    let mut unique = dedup_by_url(sources);
    sort_by_bitrate_desc(&mut unique);
    Extraction::new(title, unique)
}

fn push_variants(sources: &mut Vec<MediaSource>, variants: &Value) {
    for v in variants.as_array().into_iter().flatten() {
        let Some(url) = v["src"].as_str().or_else(|| v["url"].as_str()) else {
            continue;
        };
        let mime = v["type"].as_str().or_else(|| v["content_type"].as_str());
        let bitrate = v["bitrate"].as_u64().or_else(|| v["bit_rate"].as_u64());
        sources.push(variant(url, mime, bitrate));
    }
}

/// Bare candidate URLs from a mirror API document, as the proxy path reads it.
fn mirror_api_candidates(value: &Value) -> Vec<String> {
    let mut candidates = Vec::new();
    let variants = value["media_extended"]
        .as_array()
        .into_iter()
        .flatten()
        .chain(std::iter::once(value));

    for media in variants {
        for v in media["variants"].as_array().into_iter().flatten() {
            if let Some(url) = v["src"].as_str().or_else(|| v["url"].as_str()) {
                candidates.push(url.to_string());
            }
        }
        if let Some(url) = media["url"].as_str() {
            candidates.push(url.to_string());
        }
    }
    if let Some(url) = value["video_url"].as_str() {
        candidates.push(url.to_string());
    }
    for url in value["mediaURLs"].as_array().into_iter().flatten() {
        if let Some(url) = url.as_str() {
            candidates.push(url.to_string());
        }
    }
    candidates
}

/// Valid, unique candidates as typed sources, MP4 only when any exist,
/// otherwise HLS.
fn candidate_sources(candidates: Vec<String>, with_quality: bool) -> Vec<MediaSource> {
    let sources = candidates
        .into_iter()
        .map(|raw| scan::unescape_url(&raw))
        .filter(|u| Url::parse(u).is_ok())
        .map(|u| {
            let quality = if with_quality {
                quality_from_path(&u)
            } else {
                None
            };
            MediaSource {
                mime_type: Some(MediaKind::default_mime(&u).to_string()),
                quality,
                bitrate: None,
                url: u,
            }
        })
        .collect();

    prefer_mp4(dedup_by_url(sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fetch::mock::{upstream, MockFetcher};
    use crate::media::types::{HLS_MIME, MP4_MIME};
    use serde_json::json;

    const POST: &str = "https://x.com/someone/status/1790000000000000001?s=20";
    const ID: &str = "1790000000000000001";
    const SYNDICATION: &str =
        "https://cdn.syndication.twimg.com/tweet-result?id=1790000000000000001&lang=en";
    const VX: &str = "https://api.vxtwitter.com/Tweet/status/1790000000000000001";
    const VX_PROXIED: &str =
        "https://r.jina.ai/http://api.vxtwitter.com/Tweet/status/1790000000000000001";

    fn resolver(fetcher: Arc<MockFetcher>) -> XResolver {
        XResolver::new(Arc::new(upstream(fetcher)), &Config::default())
    }

    #[test]
    fn test_parse_tweet_id() {
        assert_eq!(parse_tweet_id(POST).as_deref(), Some(ID));
        assert_eq!(
            parse_tweet_id("https://twitter.com/i/web/statuses/42/").as_deref(),
            Some("42")
        );
        assert_eq!(
            parse_tweet_id("https://mobile.twitter.com/a/status/7/video/1").as_deref(),
            Some("7")
        );
        assert!(parse_tweet_id("https://x.com/someone").is_none());
        assert!(parse_tweet_id("https://x.com/someone/status/").is_none());
        assert!(parse_tweet_id("https://x.com/someone/status/abc").is_none());
        assert!(parse_tweet_id("not a url").is_none());
    }

    #[test]
    fn test_bitrate_label() {
        assert_eq!(bitrate_label(Some(6_000_000)), Some("1080p"));
        assert_eq!(bitrate_label(Some(3_000_000)), Some("720p"));
        assert_eq!(bitrate_label(Some(1_200_000)), Some("480p"));
        assert_eq!(bitrate_label(Some(500_000)), None);
        assert_eq!(bitrate_label(Some(0)), None);
        assert_eq!(bitrate_label(None), None);
    }

    #[test]
    fn test_quality_from_path() {
        assert_eq!(
            quality_from_path("https://video.twimg.com/ext_tw_video/1/pu/vid/1280x720/a.mp4?tag=12")
                .as_deref(),
            Some("720p")
        );
        assert_eq!(
            quality_from_path("https://video.twimg.com/amplify_video/1/vid/avc1/1920x1080/b.mp4")
                .as_deref(),
            Some("1080p")
        );
        assert!(quality_from_path("https://video.twimg.com/tweet_video/c.mp4").is_none());
    }

    #[test]
    fn test_parse_syndication_filters_and_sorts() {
        let value = json!({
            "text": "look at this",
            "video": {"variants": [
                {"type": "application/x-mpegURL", "src": "https://video.twimg.com/pl.m3u8"},
                {"type": "video/mp4", "src": "https://video.twimg.com/vid/640x360/low.mp4", "bitrate": 832000},
                {"type": "video/mp4", "src": "https://video.twimg.com/vid/1920x1080/high.mp4", "bitrate": 5500000},
                {"type": "image/jpeg", "src": "https://pbs.twimg.com/thumb.jpg"}
            ]}
        });

        let found = parse_syndication(&value);
        assert_eq!(found.title.as_deref(), Some("look at this"));
        let urls: Vec<_> = found.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://video.twimg.com/vid/1920x1080/high.mp4",
                "https://video.twimg.com/vid/640x360/low.mp4",
            ]
        );
        // syndication types its HLS playlist application/x-mpegURL
        assert!(!urls.contains(&"https://video.twimg.com/pl.m3u8"));
        assert_eq!(found.sources[0].quality.as_deref(), Some("1080p"));
        assert_eq!(found.sources[0].bitrate, Some(5_500_000));
        assert!(found.sources[1].quality.is_none());
    }

    #[test]
    fn test_parse_syndication_media_details() {
        let value = json!({
            "mediaDetails": [{"video_info": {"variants": [
                {"content_type": "video/mp4", "url": "https://video.twimg.com/a.mp4", "bitrate": 2176000}
            ]}}]
        });
        let found = parse_syndication(&value);
        assert_eq!(found.sources.len(), 1);
        assert_eq!(found.sources[0].quality.as_deref(), Some("480p"));
        assert!(found.title.is_none());
    }

    #[test]
    fn test_parse_mirror_api_shapes() {
        let value = json!({
            "tweet": {"text": "nested title"},
            "media_extended": [{
                "type": "video",
                "url": "https://video.twimg.com/ext/1/a.mp4",
                "variants": [
                    {"url": "https://video.twimg.com/ext/1/b.mp4", "content_type": "video/mp4", "bit_rate": 2_600_000},
                    {"src": "https://video.twimg.com/ext/1/pl.m3u8"}
                ]
            }],
            "mediaURLs": ["https://video.twimg.com/ext/1/ignored.mp4"]
        });

        let found = parse_mirror_api(&value);
        assert_eq!(found.title.as_deref(), Some("nested title"));
        let urls: Vec<_> = found.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://video.twimg.com/ext/1/b.mp4",
                "https://video.twimg.com/ext/1/pl.m3u8",
                "https://video.twimg.com/ext/1/a.mp4",
            ]
        );
        assert_eq!(found.sources[0].quality.as_deref(), Some("720p"));
        assert_eq!(found.sources[1].mime_type.as_deref(), Some(HLS_MIME));
        // "video" is a media kind, not a MIME type
        assert_eq!(found.sources[2].mime_type.as_deref(), Some(MP4_MIME));
    }

    #[test]
    fn test_parse_mirror_api_keeps_media_item_order() {
        let value = json!({
            "media_extended": [{"url": "https://video.twimg.com/ext/1/a.mp4", "variants": []}],
            "variants": [{"url": "https://video.twimg.com/ext/1/b.mp4"}]
        });
        let found = parse_mirror_api(&value);
        let urls: Vec<_> = found.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://video.twimg.com/ext/1/a.mp4", "https://video.twimg.com/ext/1/b.mp4"]
        );
    }

    #[test]
    fn test_parse_mirror_api_media_urls_only() {
        let value = json!({
            "text": "t",
            "mediaURLs": ["https://pbs.twimg.com/media/p.jpg", "https://video.twimg.com/v.mp4"]
        });
        let found = parse_mirror_api(&value);
        assert_eq!(found.sources.len(), 1);
        assert_eq!(found.sources[0].url, "https://video.twimg.com/v.mp4");
    }

    #[tokio::test]
    async fn test_get_info_syndication_first() {
        let fetcher = Arc::new(MockFetcher::new().ok(
            SYNDICATION,
            r#"{"text":"hi","video":{"variants":[{"type":"video/mp4","src":"https://video.twimg.com/a.mp4","bitrate":2176000}]}}"#,
        ));
        let x = resolver(fetcher.clone());

        let info = x.get_info(POST).await;

        assert_eq!(info.title.as_deref(), Some("hi"));
        assert_eq!(info.sources.len(), 1);
        assert_eq!(fetcher.calls(), vec![SYNDICATION.to_string()]);
    }

    #[tokio::test]
    async fn test_get_info_mirror_api_after_syndication_miss() {
        let fetcher = Arc::new(MockFetcher::new().ok(
            VX,
            r#"{"text":"vx","video_url":"https://video.twimg.com/v.mp4"}"#,
        ));
        let x = resolver(fetcher.clone());

        let info = x.get_info(POST).await;

        assert_eq!(info.title.as_deref(), Some("vx"));
        assert_eq!(info.sources[0].url, "https://video.twimg.com/v.mp4");
        assert_eq!(fetcher.calls(), vec![SYNDICATION.to_string(), VX.to_string()]);
    }

    #[tokio::test]
    async fn test_get_info_proxied_text_prefers_mp4() {
        let text = "Title: post\n\nMarkdown Content:\n[video](https://video.twimg.com/ext/pl.m3u8) \
                    [mp4](https://video.twimg.com/ext/vid/720x1280/clip.mp4?tag=12)";
        let fetcher = Arc::new(MockFetcher::new().ok(VX_PROXIED, text));
        let x = resolver(fetcher.clone());

        let info = x.get_info(POST).await;

        assert_eq!(info.sources.len(), 1);
        assert_eq!(
            info.sources[0].url,
            "https://video.twimg.com/ext/vid/720x1280/clip.mp4?tag=12"
        );
        assert_eq!(info.sources[0].mime_type.as_deref(), Some(MP4_MIME));
        assert!(info.title.is_none());
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_get_info_page_scrape_probes_alternates_in_order() {
        let mobile = format!("https://mobile.twitter.com/i/status/{}", ID);
        let fetcher = Arc::new(
            MockFetcher::new()
                .ok(POST, r#"<meta property="og:title" content="On X">"#)
                .ok(
                    &mobile,
                    r#"<video src="https://video.twimg.com/ext/vid/480x852/pl.m3u8"></video>"#,
                )
                .ok(
                    "https://mobile.twitter.com/status/1790000000000000001",
                    r#""https://video.twimg.com/never.mp4""#,
                ),
        );
        let x = resolver(fetcher.clone());

        let info = x.get_info(POST).await;

        assert_eq!(info.title.as_deref(), Some("On X"));
        assert_eq!(info.sources.len(), 1);
        assert_eq!(info.sources[0].mime_type.as_deref(), Some(HLS_MIME));
        assert_eq!(info.sources[0].quality.as_deref(), Some("852p"));

        let calls = fetcher.calls();
        assert_eq!(calls.last(), Some(&mobile));
        assert_eq!(fetcher.count_matching("never"), 0);
        assert_eq!(calls.len(), 7);
    }

    #[tokio::test]
    async fn test_get_info_without_id_only_scrapes_page() {
        let url = "https://x.com/someone";
        let fetcher = Arc::new(MockFetcher::new().ok(
            url,
            r#"<meta property="og:video:url" content="https://video.twimg.com/og.mp4">"#,
        ));
        let x = resolver(fetcher.clone());

        let info = x.get_info(url).await;

        assert_eq!(info.sources.len(), 1);
        assert_eq!(info.sources[0].url, "https://video.twimg.com/og.mp4");
        assert_eq!(fetcher.calls(), vec![url.to_string()]);
    }

    #[tokio::test]
    async fn test_get_info_nothing_found() {
        let fetcher = Arc::new(MockFetcher::new());
        let x = resolver(fetcher.clone());

        let info = x.get_info(POST).await;

        assert!(info.sources.is_empty());
        // syndication, mirror api, proxied mirror api, page, eight alternates
        assert_eq!(fetcher.calls().len(), 12);
    }
}
