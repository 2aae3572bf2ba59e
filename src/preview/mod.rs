use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, LazyLock},
    time::Duration,
};

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::{
    rooms::{self, RoomPath, events::Event, hub::HubRegistry},
    store::{SharedStore, StoreError},
};

/// Resolved link metadata: OpenGraph when the page carries it, otherwise the
/// `<title>`/icon fallback. Cached as JSON under `cache:{url}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub title: String,
    pub image: String,
    pub url: String,
}

#[derive(Debug, Error)]
enum PreviewError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cached preview is garbage: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Link previews run entirely off the message-delivery path: a detached task
/// per message, with actual fetches capped by a semaphore so a burst of
/// links cannot pile unbounded connections onto third-party hosts.
#[derive(Clone)]
pub struct PreviewService {
    inner: Arc<Inner>,
}

struct Inner {
    store: SharedStore,
    http: reqwest::Client,
    ttl: Duration,
    fetches: Semaphore,
}

impl PreviewService {
    pub fn new(store: SharedStore, ttl: Duration, max_fetches: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                http: reqwest::Client::new(),
                ttl,
                fetches: Semaphore::new(max_fetches),
            }),
        }
    }

    /// Fire-and-forget. Failures are logged and never reach the chat; the
    /// task also tolerates the sending connection closing mid-flight.
    pub fn spawn_maybe_preview(
        &self,
        hubs: Arc<HubRegistry>,
        room: RoomPath,
        author: String,
        text: String,
    ) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(err) = service.run(&hubs, &room, &author, &text).await {
                tracing::warn!(room = %room, %err, "link preview failed");
            }
        });
    }

    async fn run(
        &self,
        hubs: &HubRegistry,
        room: &RoomPath,
        author: &str,
        text: &str,
    ) -> Result<(), PreviewError> {
        let Some(candidate) = extract_url(text) else {
            return Ok(());
        };
        // Unsupported schemes are a silent no-op, not a user-visible error.
        let Some(url) = canonicalize(candidate) else {
            return Ok(());
        };

        let cache_key = format!("cache:{url}");
        let preview: Preview = match self.inner.store.get(&cache_key).await {
            Ok(cached) => serde_json::from_str(&cached)?,
            Err(StoreError::NotFound) => {
                // Forwarded-for hint; the author may already be gone.
                let hint = hubs.get(room).and_then(|hub| hub.remote_ip(author));
                let Ok(_permit) = self.inner.fetches.acquire().await else {
                    return Ok(());
                };
                let preview = self.fetch(url, hint).await?;
                // Pages without useful tags are cached too, so repeated
                // links to them don't refetch for the whole TTL.
                self.inner
                    .store
                    .set_with_ttl(&cache_key, serde_json::to_string(&preview)?, self.inner.ttl)
                    .await?;
                preview
            }
            Err(err) => return Err(err.into()),
        };

        if preview.title.is_empty() {
            // Nothing worth showing.
            return Ok(());
        }
        if let Some(hub) = hubs.get(room) {
            rooms::log_dropped(room, hub.broadcast(&Event::Preview(preview), &[]));
        }
        Ok(())
    }

    async fn fetch(&self, url: Url, hint: Option<IpAddr>) -> Result<Preview, PreviewError> {
        let mut request = self.inner.http.get(url.clone());
        if let Some(ip) = hint {
            request = request.header("X-Forwarded-For", ip.to_string());
        }
        let body = request.send().await?.text().await?;

        let mut preview = parse_preview(&body);
        if preview.url.is_empty() {
            preview.url = url.into();
        }
        Ok(preview)
    }
}

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bhttps?://[^\s<>"')]+|\b(?:[a-z0-9][a-z0-9-]*\.)+[a-z]{2,}(?:/[^\s<>"')]*)?"#,
    )
    .expect("url regex")
});

/// First URL-looking substring, scheme optional (`example.com/x` counts).
fn extract_url(text: &str) -> Option<&str> {
    URL_RE.find(text).map(|m| m.as_str())
}

/// Defaults a missing scheme to https; anything but http/https is rejected.
fn canonicalize(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(_) => None,
        Err(_) => {
            let url = Url::parse(&format!("https://{raw}")).ok()?;
            matches!(url.scheme(), "http" | "https").then_some(url)
        }
    }
}

static META_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("meta regex"));
static LINK_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("link regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attr regex")
});

fn tag_attrs(tag: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(tag)
        .filter_map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3))?;
            Some((caps[1].to_lowercase(), value.as_str().to_owned()))
        })
        .collect()
}

/// OpenGraph tags from the head, falling back to `<title>` text and the
/// first icon link when the page has neither og:title nor og:image.
fn parse_preview(html: &str) -> Preview {
    let mut preview = Preview::default();

    for tag in META_TAG_RE.find_iter(html) {
        let attrs = tag_attrs(tag.as_str());
        let Some(prop) = attrs.get("property").or_else(|| attrs.get("name")) else {
            continue;
        };
        let Some(content) = attrs.get("content") else {
            continue;
        };
        let slot = match prop.as_str() {
            "og:title" => &mut preview.title,
            "og:image" => &mut preview.image,
            "og:url" => &mut preview.url,
            _ => continue,
        };
        if slot.is_empty() {
            *slot = content.clone();
        }
    }

    if preview.title.is_empty() && preview.image.is_empty() {
        if let Some(caps) = TITLE_RE.captures(html) {
            preview.title = caps[1].trim().to_owned();
        }
        for tag in LINK_TAG_RE.find_iter(html) {
            let attrs = tag_attrs(tag.as_str());
            if attrs.get("rel").is_some_and(|rel| rel.contains("icon")) {
                if let Some(href) = attrs.get("href") {
                    preview.image = href.clone();
                    break;
                }
            }
        }
    }

    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_first_url() {
        assert_eq!(
            extract_url("see https://example.com/a and http://other.org"),
            Some("https://example.com/a")
        );
        assert_eq!(extract_url("bare example.com/path works"), Some("example.com/path"));
        assert_eq!(extract_url("no links here"), None);
        assert_eq!(extract_url("version v1.2.3 is not a link"), None);
    }

    #[test]
    fn canonicalize_defaults_to_https() {
        assert_eq!(
            canonicalize("example.com/a").unwrap().as_str(),
            "https://example.com/a"
        );
        assert_eq!(
            canonicalize("http://example.com").unwrap().as_str(),
            "http://example.com/"
        );
    }

    #[test]
    fn canonicalize_rejects_non_web_schemes() {
        assert!(canonicalize("ftp://example.com").is_none());
        assert!(canonicalize("mailto:a@example.com").is_none());
        assert!(canonicalize("javascript:alert(1)").is_none());
    }

    #[test]
    fn parses_open_graph_tags_in_any_attribute_order() {
        let html = r#"<html><head>
            <meta property="og:title" content="A Title">
            <meta content="https://img.example.com/x.png" property="og:image">
            <meta name="og:url" content="https://example.com/canonical">
        </head></html>"#;
        let preview = parse_preview(html);
        assert_eq!(preview.title, "A Title");
        assert_eq!(preview.image, "https://img.example.com/x.png");
        assert_eq!(preview.url, "https://example.com/canonical");
    }

    #[test]
    fn falls_back_to_title_and_icon() {
        let html = r#"<html><head>
            <title> Plain Page </title>
            <link rel="shortcut icon" href="/favicon.ico">
        </head></html>"#;
        let preview = parse_preview(html);
        assert_eq!(preview.title, "Plain Page");
        assert_eq!(preview.image, "/favicon.ico");
    }

    #[test]
    fn og_tags_win_over_the_fallback() {
        let html = r#"<head>
            <meta property="og:title" content="OG Title">
            <title>HTML Title</title>
        </head>"#;
        assert_eq!(parse_preview(html).title, "OG Title");
    }

    #[test]
    fn tagless_page_yields_an_empty_preview() {
        let preview = parse_preview("<html><body>hi</body></html>");
        assert_eq!(preview, Preview::default());
    }
}
