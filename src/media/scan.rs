//! Extraction helpers for semi-structured upstream markup: embedded JSON
//! blobs, meta tags, script blocks, and a generic JSON tree walk shared by all
//! resolvers.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static MEDIA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://.+\.(mp4|m3u8)(\?.*)?$").expect("Invalid media URL regex")
});

static LD_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script type="application/ld\+json">(.*?)</script>"#)
        .expect("Invalid ld+json regex")
});

/// Parses the first balanced JSON object or array that starts after
/// `marker`. Braces inside string literals are not counted.
///
/// This is a heuristic: it finds the blob but cannot tell a stale one from a
/// current one if the page embeds several.
pub fn json_after_marker(content: &str, marker: &str) -> Option<Value> {
    let start = content.find(marker)? + marker.len();
    balanced_json(&content[start..])
}

/// Strict JSON parse, falling back to the first balanced object or array in
/// the text.
pub fn parse_json_loose(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    balanced_json(trimmed)
}

fn balanced_json(content: &str) -> Option<Value> {
    let open = content.find(['{', '['])?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    let end = open + offset + 1;
                    return serde_json::from_str(&content[open..end]).ok();
                }
            }
            _ => {}
        }
    }

    None
}

/// Content of `<meta property="..." content="...">` (or `name=`).
pub fn meta_content(html: &str, property: &str) -> Option<String> {
    let pattern = format!(
        r#"(?i)<meta[^>]+(?:property|name)=["']{}["'][^>]+content=["']([^"']+)["']"#,
        regex::escape(property)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// First of several meta properties that is present.
pub fn first_meta(html: &str, properties: &[&str]) -> Option<String> {
    properties.iter().find_map(|p| meta_content(html, p))
}

/// Parsed bodies of every `application/ld+json` script block. Blocks that
/// fail to parse are skipped.
pub fn ld_json_blocks(html: &str) -> Vec<Value> {
    LD_JSON_RE
        .captures_iter(html)
        .filter_map(|c| serde_json::from_str(c.get(1)?.as_str().trim()).ok())
        .collect()
}

/// Absolute http(s) URL whose path ends in `.mp4` or `.m3u8`.
pub fn is_media_url(candidate: &str) -> bool {
    MEDIA_URL_RE.is_match(candidate)
}

/// Every match of `re` in `text`, in order.
pub fn find_links(text: &str, re: &Regex) -> Vec<String> {
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Walks a JSON tree collecting strings. Under an object key accepted by
/// `list_key` every string of an array value is taken as-is; elsewhere string
/// values are taken when `accept` holds. Strings sitting directly in arrays
/// outside a matching key are ignored.
pub fn scan_strings<K, P>(value: &Value, list_key: K, accept: P) -> Vec<String>
where
    K: Fn(&str) -> bool,
    P: Fn(&str) -> bool,
{
    let mut out = Vec::new();
    walk(value, &list_key, &accept, &mut out);
    out
}

fn walk(
    value: &Value,
    list_key: &dyn Fn(&str) -> bool,
    accept: &dyn Fn(&str) -> bool,
    out: &mut Vec<String>,
) {
    match value {
        Value::Array(items) => {
            for item in items {
                walk(item, list_key, accept, out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::Array(items) if list_key(key) => {
                        out.extend(items.iter().filter_map(|u| u.as_str()).map(String::from));
                    }
                    Value::String(s) if accept(s) => out.push(s.clone()),
                    Value::Array(_) | Value::Object(_) => walk(child, list_key, accept, out),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Media URLs anywhere in a JSON tree, with no key-based lists.
pub fn media_urls_in(value: &Value) -> Vec<String> {
    scan_strings(value, |_| false, is_media_url)
}

/// Undoes the JSON string escaping commonly left on URLs scraped from inline
/// scripts.
pub fn unescape_url(raw: &str) -> String {
    raw.replace("\\u0026", "&")
        .replace("\\u002F", "/")
        .replace("\\/", "/")
}
