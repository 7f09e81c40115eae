use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;

pub const NO_TITLE_SENTINEL: &str = "No title found";
pub const NO_DESCRIPTION_SENTINEL: &str = "No meta description found";
pub const TITLE_ERROR_SENTINEL: &str = "Error fetching title";
pub const DESCRIPTION_ERROR_SENTINEL: &str = "Error fetching meta description";

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.159 Safari/537.36";
const PROBE_TIMEOUT_MS: u64 = 10_000;

/// Current on-page copy. Both fields always hold a value; failures collapse
/// into sentinels so callers need no branching.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
}

impl PageMetadata {
    pub fn unavailable() -> Self {
        Self {
            title: TITLE_ERROR_SENTINEL.to_string(),
            description: DESCRIPTION_ERROR_SENTINEL.to_string(),
        }
    }
}

/// Seam over the probe so the analysis pipeline tests run offline.
pub trait MetadataSource {
    fn probe(&mut self, url: &str) -> PageMetadata;
}

/// Fetches a page and extracts title/description. Never raises outward:
/// every failure path degrades to the sentinel pair.
pub struct MetadataProbe {
    client: Option<Client>,
}

impl MetadataProbe {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(PROBE_TIMEOUT_MS))
            .build()
            .ok();
        Self { client }
    }
}

impl Default for MetadataProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataSource for MetadataProbe {
    fn probe(&mut self, url: &str) -> PageMetadata {
        let Some(client) = &self.client else {
            return PageMetadata::unavailable();
        };
        let response = client
            .get(url)
            .header("User-Agent", PROBE_USER_AGENT)
            .header("Accept", "text/html, text/plain;q=0.9,*/*;q=0.1")
            .send();
        let body = match response {
            Ok(response) if response.status().is_success() => match response.text() {
                Ok(body) => body,
                Err(error) => {
                    tracing::warn!(url, error = %error, "metadata probe failed to read body");
                    return PageMetadata::unavailable();
                }
            },
            Ok(response) => {
                tracing::warn!(url, status = %response.status(), "metadata probe got an error status");
                return PageMetadata::unavailable();
            }
            Err(error) => {
                tracing::warn!(url, error = %error, "metadata probe request failed");
                return PageMetadata::unavailable();
            }
        };
        extract_metadata(&body)
    }
}

/// Extracts title and meta description from raw HTML. Best-effort heuristic;
/// misses degrade to the not-found sentinels.
pub fn extract_metadata(html: &str) -> PageMetadata {
    PageMetadata {
        title: extract_title(html).unwrap_or_else(|| NO_TITLE_SENTINEL.to_string()),
        description: extract_description(html)
            .unwrap_or_else(|| NO_DESCRIPTION_SENTINEL.to_string()),
    }
}

fn extract_title(html: &str) -> Option<String> {
    let open = find_ascii_ci(html, "<title", 0)?;
    let content_start = html[open..].find('>').map(|index| open + index + 1)?;
    let close = find_ascii_ci(html, "</title", content_start)?;
    clean_text(&html[content_start..close])
}

fn extract_description(html: &str) -> Option<String> {
    let mut cursor = 0;
    while let Some(start) = find_ascii_ci(html, "<meta", cursor) {
        let end = match html[start..].find('>') {
            Some(index) => start + index,
            None => break,
        };
        let tag = &html[start..end];
        cursor = end + 1;

        if attribute_value(tag, "name")
            .is_some_and(|name| name.eq_ignore_ascii_case("description"))
            && let Some(content) = attribute_value(tag, "content")
        {
            return clean_text(&content);
        }
    }
    None
}

fn attribute_value(tag: &str, name: &str) -> Option<String> {
    let bytes = tag.as_bytes();
    let mut cursor = 0;
    while let Some(at) = find_ascii_ci(tag, name, cursor) {
        cursor = at + name.len();

        let standalone_before =
            at == 0 || !(bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'-');
        if !standalone_before {
            continue;
        }

        let mut index = cursor;
        while index < bytes.len() && bytes[index].is_ascii_whitespace() {
            index += 1;
        }
        if index >= bytes.len() || bytes[index] != b'=' {
            continue;
        }
        index += 1;
        while index < bytes.len() && bytes[index].is_ascii_whitespace() {
            index += 1;
        }
        if index >= bytes.len() || (bytes[index] != b'"' && bytes[index] != b'\'') {
            continue;
        }
        let quote = bytes[index];
        index += 1;
        let value_start = index;
        while index < bytes.len() && bytes[index] != quote {
            index += 1;
        }
        if index >= bytes.len() {
            return None;
        }
        return Some(tag[value_start..index].to_string());
    }
    None
}

// ASCII-case-insensitive substring search returning a byte offset. The
// needles are ASCII tag/attribute names, so a hit always lands on a char
// boundary.
fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|index| from + index)
}

fn clean_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let decoded = decode_entities(&collapsed);
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::{
        DESCRIPTION_ERROR_SENTINEL, MetadataProbe, MetadataSource, NO_DESCRIPTION_SENTINEL,
        NO_TITLE_SENTINEL, TITLE_ERROR_SENTINEL, attribute_value, extract_metadata,
    };

    #[test]
    fn extracts_title_and_description() {
        let html = r#"<html><head>
            <title>  Running   Shoes &amp; More </title>
            <meta charset="utf-8">
            <meta name="description" content="The best running shoes.">
        </head><body></body></html>"#;

        let metadata = extract_metadata(html);
        assert_eq!(metadata.title, "Running Shoes & More");
        assert_eq!(metadata.description, "The best running shoes.");
    }

    #[test]
    fn handles_uppercase_tags_and_attribute_order() {
        let html = r#"<HEAD><TITLE>Shop</TITLE>
            <META CONTENT='Socks for every season' NAME='Description'></HEAD>"#;

        let metadata = extract_metadata(html);
        assert_eq!(metadata.title, "Shop");
        assert_eq!(metadata.description, "Socks for every season");
    }

    #[test]
    fn missing_elements_yield_not_found_sentinels() {
        let metadata = extract_metadata("<html><body>plain page</body></html>");
        assert_eq!(metadata.title, NO_TITLE_SENTINEL);
        assert_eq!(metadata.description, NO_DESCRIPTION_SENTINEL);

        // An empty title is a miss, not an empty string.
        let metadata = extract_metadata("<title>   </title>");
        assert_eq!(metadata.title, NO_TITLE_SENTINEL);
    }

    #[test]
    fn other_meta_tags_are_not_mistaken_for_description() {
        let html = r#"<meta name="author" content="somebody">
            <meta name="og:description" content="wrong one">
            <meta name="description" content="right one">"#;
        let metadata = extract_metadata(html);
        assert_eq!(metadata.description, "right one");
    }

    #[test]
    fn attribute_scanner_requires_standalone_names() {
        assert_eq!(
            attribute_value(r#"<meta data-name="x" name="description""#, "name").as_deref(),
            Some("description")
        );
        assert_eq!(attribute_value("<meta name=unquoted>", "name"), None);
        assert_eq!(attribute_value("<meta content=\"\"", "name"), None);
    }

    #[test]
    fn probe_on_unreachable_url_returns_error_sentinels() {
        let mut probe = MetadataProbe::new();
        let metadata = probe.probe("not a url");
        assert_eq!(metadata.title, TITLE_ERROR_SENTINEL);
        assert_eq!(metadata.description, DESCRIPTION_ERROR_SENTINEL);

        // Deterministic across calls.
        assert_eq!(probe.probe("not a url"), metadata);
    }
}
