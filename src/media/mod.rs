pub mod detect;
pub mod error;
pub mod fetch;
pub mod instagram;
pub mod normalize;
pub mod scan;
pub mod strategy;
pub mod tiktok;
pub mod types;
pub mod x;
pub mod youtube;
pub mod ytdlp;

pub use detect::detect;
pub use error::{ErrorKind, ResolveError};
pub use types::{MediaSource, ProviderKind, ResolvedMedia};

use crate::config::Config;
use anyhow::Result;
use fetch::{Fetcher, HttpFetcher, Upstream};
use instagram::InstagramResolver;
use normalize::normalize_sources;
use std::sync::Arc;
use tiktok::TikTokResolver;
use tracing::{info, warn};
use x::XResolver;
use youtube::{FormatProvider, YouTubeResolver};
use ytdlp::YtDlpFormatProvider;

/// Entry point for turning a post URL into downloadable sources. Holds one
/// resolver per provider; nothing is cached between calls.
pub struct Resolver {
    youtube: YouTubeResolver,
    tiktok: TikTokResolver,
    x: XResolver,
    instagram: InstagramResolver,
}

impl Resolver {
    pub fn new(config: &Config) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new()?);
        let formats = Arc::new(YtDlpFormatProvider::new(&config.youtube));

        info!("Resolver initialized - YouTube formats via yt-dlp, TikTok/X/Instagram via HTTP");

        Ok(Self::with_parts(config, fetcher, formats))
    }

    /// Builds a resolver over an arbitrary transport and format provider.
    pub fn with_parts(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        formats: Arc<dyn FormatProvider>,
    ) -> Self {
        let upstream = Arc::new(Upstream::new(fetcher, &config.fetch));

        Self {
            youtube: YouTubeResolver::new(
                formats,
                upstream.clone(),
                config.youtube.fallback_resolver.clone(),
            ),
            tiktok: TikTokResolver::new(upstream.clone(), config),
            x: XResolver::new(upstream.clone(), config),
            instagram: InstagramResolver::new(upstream, config),
        }
    }

    /// Resolves `url` to a title, thumbnails, and sources. `hint` overrides
    /// hostname detection and is the only way to reach Instagram.
    pub async fn resolve(
        &self,
        hint: Option<ProviderKind>,
        url: &str,
    ) -> Result<ResolvedMedia, ResolveError> {
        let (provider, url) = target(hint, url)?;
        info!("Resolving {} URL: {}", provider, url);

        let found = match provider {
            ProviderKind::YouTube => {
                let mut media = self.youtube.resolve(url).await?;
                media.sources = normalize_sources(provider, media.sources);
                return Ok(media);
            }
            ProviderKind::TikTok => self.tiktok.get_info(url).await,
            ProviderKind::X => self.x.get_info(url).await,
            ProviderKind::Instagram => self.instagram.get_info(url).await,
            ProviderKind::Unknown => return Err(ResolveError::UnsupportedUrl),
        };

        let sources = normalize_sources(provider, found.sources);
        if sources.is_empty() {
            warn!("{} returned no sources for {}", provider, url);
            return Err(ResolveError::NoSourcesFound {
                provider: shouted(provider),
            });
        }

        Ok(ResolvedMedia {
            title: found.title,
            thumbnails: Vec::new(),
            provider: provider.display_name().to_string(),
            sources,
        })
    }

    /// The one source a download should stream.
    pub async fn best_source(
        &self,
        hint: Option<ProviderKind>,
        url: &str,
    ) -> Result<MediaSource, ResolveError> {
        let (provider, url) = target(hint, url)?;
        if provider == ProviderKind::YouTube {
            return self.youtube.best_source(url).await;
        }

        let media = self.resolve(Some(provider), url).await?;
        let best = match provider {
            ProviderKind::X => media.sources.into_iter().next(),
            _ => {
                let mp4 = media.sources.iter().position(|s| s.is_mp4()).unwrap_or(0);
                media.sources.into_iter().nth(mp4)
            }
        };
        best.ok_or(ResolveError::NoSourcesFound {
            provider: shouted(provider),
        })
    }

    pub async fn test_setup(&self) -> bool {
        info!("Testing resolver setup...");

        if self.youtube.test_availability().await {
            info!("✅ YouTube format extraction is available");
            true
        } else {
            warn!("YouTube resolution will rely on the fallback resolver only");
            false
        }
    }
}

/// Provider that `resolve` would dispatch `url` to.
pub fn provider_for(hint: Option<ProviderKind>, url: &str) -> Result<ProviderKind, ResolveError> {
    target(hint, url).map(|(provider, _)| provider)
}

/// Trimmed URL and the provider that should handle it.
fn target(hint: Option<ProviderKind>, url: &str) -> Result<(ProviderKind, &str), ResolveError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ResolveError::MissingUrl);
    }

    let provider = match hint {
        Some(kind) if kind != ProviderKind::Unknown => kind,
        _ => detect(url),
    };
    if provider == ProviderKind::Unknown {
        return Err(ResolveError::UnsupportedUrl);
    }
    Ok((provider, url))
}

fn shouted(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::TikTok => "TIKTOK",
        ProviderKind::YouTube => "YOUTUBE",
        ProviderKind::X => "X",
        ProviderKind::Instagram => "INSTAGRAM",
        ProviderKind::Unknown => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fetch::mock::MockFetcher;
    use crate::media::types::{HLS_MIME, MP4_MIME};
    use crate::media::youtube::tests::{fmt, StubProvider};
    use crate::media::youtube::VideoInfo;

    const TIKTOK_POST: &str = "https://www.tiktok.com/@creator/video/7234567890123456789";
    const X_POST: &str = "https://x.com/someone/status/1790000000000000001";
    const X_SYNDICATION: &str =
        "https://cdn.syndication.twimg.com/tweet-result?id=1790000000000000001&lang=en";
    const YOUTUBE_VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn resolver(fetcher: Arc<MockFetcher>, formats: Arc<StubProvider>) -> Resolver {
        Resolver::with_parts(&Config::default(), fetcher, formats)
    }

    fn no_youtube() -> Arc<StubProvider> {
        StubProvider::failing("not used")
    }

    fn video() -> VideoInfo {
        VideoInfo {
            title: "Never Gonna Give You Up".to_string(),
            thumbnails: vec!["https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg".to_string()],
            formats: vec![
                fmt("140", "audio/mp4; codecs=\"mp4a.40.2\"", None, true, false),
                fmt("22", "video/mp4; codecs=\"avc1.64001F, mp4a.40.2\"", Some("720p"), true, true),
                fmt("37", "video/mp4; codecs=\"avc1.640028, mp4a.40.2\"", Some("1080p"), true, true),
            ],
        }
    }

    #[tokio::test]
    async fn test_missing_and_unsupported_urls() {
        let fetcher = Arc::new(MockFetcher::new());
        let resolver = resolver(fetcher.clone(), no_youtube());

        let err = resolver.resolve(None, "   ").await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingUrl));
        assert_eq!(err.status_code(), 400);

        let err = resolver
            .resolve(None, "https://vimeo.com/123")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedUrl));
        assert_eq!(err.kind(), ErrorKind::BadInput);

        let err = resolver
            .resolve(Some(ProviderKind::Unknown), "not a url")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedUrl));

        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn test_provider_for_only_youtube_needs_format_provider() {
        assert_eq!(provider_for(None, YOUTUBE_VIDEO).unwrap(), ProviderKind::YouTube);
        assert_eq!(provider_for(None, X_POST).unwrap(), ProviderKind::X);
        assert_eq!(provider_for(None, TIKTOK_POST).unwrap(), ProviderKind::TikTok);
        assert_eq!(
            provider_for(Some(ProviderKind::Instagram), YOUTUBE_VIDEO).unwrap(),
            ProviderKind::Instagram
        );
        assert!(matches!(provider_for(None, "  "), Err(ResolveError::MissingUrl)));
    }

    #[tokio::test]
    async fn test_instagram_needs_hint() {
        let reel = "https://www.instagram.com/reel/C7xYz12AbCd/";
        let fetcher = Arc::new(MockFetcher::new());
        let resolver = resolver(fetcher.clone(), no_youtube());

        let err = resolver.resolve(None, reel).await.unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedUrl));
        assert!(fetcher.calls().is_empty());

        let err = resolver
            .resolve(Some(ProviderKind::Instagram), reel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("INSTAGRAM"));
        assert_eq!(err.status_code(), 404);
        assert_eq!(fetcher.calls()[0], "https://www.instagram.com/graphql/query");
    }

    #[tokio::test]
    async fn test_tiktok_empty_is_not_found() {
        let resolver = resolver(Arc::new(MockFetcher::new()), no_youtube());

        let err = resolver.resolve(None, TIKTOK_POST).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "No downloadable sources found for this TIKTOK link. The post may be private, region-restricted, or has no video."
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_tiktok_resolve_and_best_source() {
        let html = r#"<meta property="og:title" content="Dance">
"https://v19.tiktokcdn.com/a/pl.m3u8" "https://v58.tiktokcdn.com/b/clip.mp4""#;
        let fetcher = Arc::new(MockFetcher::new().ok(TIKTOK_POST, html));
        let resolver = resolver(fetcher, no_youtube());

        let media = resolver.resolve(None, TIKTOK_POST).await.unwrap();
        assert_eq!(media.provider, "TikTok");
        assert_eq!(media.title.as_deref(), Some("Dance"));
        assert!(media.thumbnails.is_empty());
        assert_eq!(media.sources[0].mime_type.as_deref(), Some(HLS_MIME));
        assert_eq!(media.sources[0].quality.as_deref(), Some("HLS"));
        assert_eq!(media.sources[1].quality.as_deref(), Some("MP4"));

        let best = resolver.best_source(None, TIKTOK_POST).await.unwrap();
        assert_eq!(best.url, "https://v58.tiktokcdn.com/b/clip.mp4");
    }

    #[tokio::test]
    async fn test_x_resolve_fills_quality() {
        let fetcher = Arc::new(MockFetcher::new().ok(
            X_SYNDICATION,
            r#"{"text":"clip","video":{"variants":[
                {"type":"video/mp4","src":"https://video.twimg.com/low.mp4","bitrate":632000},
                {"type":"video/mp4","src":"https://video.twimg.com/high.mp4","bitrate":2176000}
            ]}}"#,
        ));
        let resolver = resolver(fetcher, no_youtube());

        let media = resolver.resolve(None, X_POST).await.unwrap();
        assert_eq!(media.provider, "X");
        assert_eq!(media.sources[0].url, "https://video.twimg.com/high.mp4");
        assert_eq!(media.sources[0].quality.as_deref(), Some("480p"));
        assert_eq!(media.sources[1].quality.as_deref(), Some("MP4"));

        let best = resolver.best_source(None, X_POST).await.unwrap();
        assert_eq!(best.url, "https://video.twimg.com/high.mp4");
    }

    #[tokio::test]
    async fn test_youtube_resolve_trims_url() {
        let formats = StubProvider::ok(video());
        let resolver = resolver(Arc::new(MockFetcher::new()), formats.clone());

        let media = resolver
            .resolve(None, &format!("  {}  ", YOUTUBE_VIDEO))
            .await
            .unwrap();

        assert_eq!(media.provider, "YouTube");
        assert_eq!(media.thumbnails.len(), 1);
        let qualities: Vec<_> = media
            .sources
            .iter()
            .map(|s| s.quality.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(qualities, vec!["Audio", "1080p", "720p"]);
        assert_eq!(
            formats.requested.lock().unwrap().as_slice(),
            &["https://www.youtube.com/watch?v=dQw4w9WgXcQ&hl=en".to_string()]
        );
    }

    #[tokio::test]
    async fn test_youtube_best_source() {
        let resolver = resolver(Arc::new(MockFetcher::new()), StubProvider::ok(video()));

        let best = resolver.best_source(None, YOUTUBE_VIDEO).await.unwrap();

        assert_eq!(best.quality.as_deref(), Some("1080p"));
        assert!(best.url.ends_with("itag=37"));
        assert!(best.is_mp4());
    }

    #[tokio::test]
    async fn test_youtube_bot_check_is_unavailable() {
        let resolver = Resolver::with_parts(
            &Config {
                youtube: crate::config::YouTubeConfig {
                    fallback_resolver: None,
                    ..Default::default()
                },
                ..Default::default()
            },
            Arc::new(MockFetcher::new()),
            StubProvider::failing("ERROR: Sign in to confirm you're not a bot"),
        );

        let err = resolver.resolve(None, YOUTUBE_VIDEO).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_resolved_media_wire_shape() {
        let resolver = resolver(
            Arc::new(MockFetcher::new().ok(
                TIKTOK_POST,
                r#""https://v16.tiktokcdn.com/only.mp4""#,
            )),
            no_youtube(),
        );

        let media = resolver.resolve(None, TIKTOK_POST).await.unwrap();
        let json = serde_json::to_value(&media).unwrap();

        assert_eq!(json["provider"], "TikTok");
        assert!(json.get("title").is_none());
        assert_eq!(json["sources"][0]["type"], MP4_MIME);
        assert_eq!(json["sources"][0]["quality"], "MP4");
        assert!(json["sources"][0].get("bitrate").is_none());
    }
}
