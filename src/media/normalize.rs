use super::types::{MediaKind, MediaSource, ProviderKind};
use std::collections::HashSet;

/// Drops later entries whose URL was already seen. Order is otherwise kept.
pub fn dedup_by_url(sources: Vec<MediaSource>) -> Vec<MediaSource> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| !s.url.is_empty() && seen.insert(s.url.clone()))
        .collect()
}

/// Sorts by bitrate, highest first. Missing bitrates count as zero; ties keep
/// their order.
pub fn sort_by_bitrate_desc(sources: &mut [MediaSource]) {
    sources.sort_by_key(|s| std::cmp::Reverse(s.bitrate.unwrap_or(0)));
}

/// Keeps the MP4 entries when there are any, otherwise the HLS ones.
pub fn prefer_mp4(sources: Vec<MediaSource>) -> Vec<MediaSource> {
    let (mp4, rest): (Vec<_>, Vec<_>) = sources
        .into_iter()
        .partition(|s| s.kind() == MediaKind::Mp4);
    if !mp4.is_empty() {
        return mp4;
    }
    rest.into_iter()
        .filter(|s| s.kind() == MediaKind::Hls)
        .collect()
}

/// Fills in the `type` and `quality` defaults each provider's consumers expect,
/// then removes duplicate URLs.
pub fn normalize_sources(provider: ProviderKind, sources: Vec<MediaSource>) -> Vec<MediaSource> {
    let normalized = sources
        .into_iter()
        .map(|mut source| {
            if source.mime_type.is_none() {
                source.mime_type = Some(MediaKind::default_mime(&source.url).to_string());
            }
            if source.quality.is_none() {
                source.quality = default_quality(provider, &source);
            }
            source
        })
        .collect();

    dedup_by_url(normalized)
}

fn default_quality(provider: ProviderKind, source: &MediaSource) -> Option<String> {
    match provider {
        ProviderKind::TikTok | ProviderKind::Instagram => {
            let is_hls = source
                .mime_type
                .as_deref()
                .is_some_and(|t| t.contains("mpegurl") || t.contains("m3u8"));
            Some(if is_hls { "HLS" } else { "MP4" }.to_string())
        }
        ProviderKind::X => Some("MP4".to_string()),
        ProviderKind::YouTube | ProviderKind::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::{HLS_MIME, MP4_MIME};

    #[test]
    fn test_dedup_by_url_keeps_first() {
        let sources = vec![
            MediaSource::new("https://a/1.mp4").with_quality("watermark"),
            MediaSource::new("https://a/2.mp4"),
            MediaSource::new("https://a/1.mp4"),
            MediaSource::new(""),
        ];
        let deduped = dedup_by_url(sources);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].quality.as_deref(), Some("watermark"));
        assert_eq!(deduped[1].url, "https://a/2.mp4");
    }

    #[test]
    fn test_sort_by_bitrate_desc_is_stable() {
        let mut sources = vec![
            MediaSource {
                bitrate: Some(832_000),
                ..MediaSource::new("https://v/low.mp4")
            },
            MediaSource::new("https://v/pl.m3u8"),
            MediaSource {
                bitrate: Some(2_176_000),
                ..MediaSource::new("https://v/high.mp4")
            },
            MediaSource::new("https://v/other.m3u8"),
        ];
        sort_by_bitrate_desc(&mut sources);
        let urls: Vec<_> = sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://v/high.mp4",
                "https://v/low.mp4",
                "https://v/pl.m3u8",
                "https://v/other.m3u8"
            ]
        );
    }

    #[test]
    fn test_prefer_mp4() {
        let mixed = vec![
            MediaSource::new("https://v/pl.m3u8"),
            MediaSource::new("https://v/a.mp4?tag=12"),
        ];
        let kept = prefer_mp4(mixed);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "https://v/a.mp4?tag=12");

        let hls_only = vec![
            MediaSource::new("https://v/pl.m3u8"),
            MediaSource::new("https://v/page"),
        ];
        let kept = prefer_mp4(hls_only);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "https://v/pl.m3u8");
    }

    #[test]
    fn test_normalize_tiktok_defaults() {
        let sources = vec![
            MediaSource::new("https://v16.tiktokcdn.com/a.mp4"),
            MediaSource::new("https://v16.tiktokcdn.com/a.m3u8"),
            MediaSource::new("https://v19.tiktokcdn.com/b.mp4").with_quality("HD"),
            MediaSource::new("https://v16.tiktokcdn.com/a.mp4"),
        ];
        let normalized = normalize_sources(ProviderKind::TikTok, sources);
        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized[0].mime_type.as_deref(), Some(MP4_MIME));
        assert_eq!(normalized[0].quality.as_deref(), Some("MP4"));
        assert_eq!(normalized[1].mime_type.as_deref(), Some(HLS_MIME));
        assert_eq!(normalized[1].quality.as_deref(), Some("HLS"));
        assert_eq!(normalized[2].quality.as_deref(), Some("HD"));
    }

    #[test]
    fn test_normalize_x_and_youtube_defaults() {
        let x = normalize_sources(
            ProviderKind::X,
            vec![MediaSource::new("https://video.twimg.com/pl.m3u8")],
        );
        assert_eq!(x[0].quality.as_deref(), Some("MP4"));
        assert_eq!(x[0].mime_type.as_deref(), Some(HLS_MIME));

        let yt = normalize_sources(
            ProviderKind::YouTube,
            vec![MediaSource::new("https://rr1.googlevideo.com/videoplayback?itag=22")],
        );
        assert!(yt[0].quality.is_none());
        assert_eq!(yt[0].mime_type.as_deref(), Some(MP4_MIME));
    }
}
