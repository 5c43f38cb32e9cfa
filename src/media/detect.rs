use super::types::ProviderKind;
use url::Url;

/// Classifies a post URL by hostname. Unparsable input is `Unknown`.
pub fn detect(url: &str) -> ProviderKind {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return ProviderKind::Unknown;
    };
    let Some(host) = parsed.host_str() else {
        return ProviderKind::Unknown;
    };

    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    if host.contains("tiktok.com") {
        ProviderKind::TikTok
    } else if host.contains("youtube.com") || host.contains("youtu.be") {
        ProviderKind::YouTube
    } else if host == "x.com" || host.contains("twitter.com") {
        ProviderKind::X
    } else {
        ProviderKind::Unknown
    }
}
