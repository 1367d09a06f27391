//! RSS 2.0 / Atom feed fetching.
//!
//! Only the fields the digest prompt needs are extracted: title, link and
//! description (`<description>` for RSS, `<summary>`/`<content>` for Atom).

use std::time::Duration;

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DigestError, FailureKind, Result};
use crate::providers::classify_reqwest;

/// Longest description kept per item, in characters.
const MAX_DESCRIPTION_CHARS: usize = 400;

/// One parsed feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Link,
    Description,
}

/// Parse an RSS or Atom document into at most `limit` items.
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<FeedItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field: Option<Field> = None;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                saw_root = true;
                match e.local_name().as_ref() {
                    b"item" | b"entry" => {
                        current = Some(FeedItem {
                            title: String::new(),
                            link: None,
                            description: None,
                        });
                    }
                    b"title" if current.is_some() => field = Some(Field::Title),
                    b"link" if current.is_some() => {
                        // Atom carries the URL in an attribute.
                        if let Some(href) = href_attr(e) {
                            set_link(&mut current, href);
                        } else {
                            field = Some(Field::Link);
                        }
                    }
                    b"description" | b"summary" | b"content" if current.is_some() => {
                        field = Some(Field::Description)
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                saw_root = true;
                if e.local_name().as_ref() == b"link" {
                    if let Some(href) = href_attr(e) {
                        set_link(&mut current, href);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = e
                        .decode()
                        .map_err(|e| feed_error(format!("XML decode error: {e}")))?;
                    append(item, f, &text);
                }
            }
            Ok(Event::GeneralRef(ref e)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    append(item, f, &resolve_reference(e)?);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = String::from_utf8_lossy(e);
                    append(item, f, &text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(item) = current.take() {
                        let item = finish(item);
                        if !item.title.is_empty() {
                            items.push(item);
                            if items.len() >= limit {
                                break;
                            }
                        }
                    }
                    field = None;
                }
                b"title" | b"link" | b"description" | b"summary" | b"content" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(feed_error(format!("XML parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(feed_error("document is not a feed".to_string()));
    }
    Ok(items)
}

/// Expand `&amp;`-style and `&#39;`-style references. Unknown named
/// entities are kept verbatim.
fn resolve_reference(e: &BytesRef<'_>) -> Result<String> {
    if let Some(c) = e
        .resolve_char_ref()
        .map_err(|e| feed_error(format!("invalid character reference: {e}")))?
    {
        return Ok(c.to_string());
    }
    let name = e
        .decode()
        .map_err(|e| feed_error(format!("XML decode error: {e}")))?;
    Ok(match resolve_predefined_entity(&name) {
        Some(resolved) => resolved.to_string(),
        None => format!("&{name};"),
    })
}

fn href_attr(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"href")
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn set_link(current: &mut Option<FeedItem>, href: String) {
    if let Some(item) = current.as_mut() {
        if item.link.is_none() {
            item.link = Some(href);
        }
    }
}

fn append(item: &mut FeedItem, field: Field, text: &str) {
    match field {
        Field::Title => item.title.push_str(text),
        Field::Link => item.link.get_or_insert_with(String::new).push_str(text),
        Field::Description => item
            .description
            .get_or_insert_with(String::new)
            .push_str(text),
    }
}

fn finish(mut item: FeedItem) -> FeedItem {
    item.title = item.title.split_whitespace().collect::<Vec<_>>().join(" ");
    item.link = item
        .link
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    item.description = item
        .description
        .map(|d| strip_tags(&d))
        .map(|d| d.chars().take(MAX_DESCRIPTION_CHARS).collect::<String>())
        .filter(|d| !d.is_empty());
    item
}

/// Remove inline HTML from a description and collapse whitespace.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn feed_error(message: String) -> DigestError {
    DigestError::permanent(FailureKind::InvalidRequest, message)
}

/// Downloads and parses feeds.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("newsdigest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DigestError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch one feed and return up to `limit` items.
    pub async fn fetch(
        &self,
        url: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<FeedItem>> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(feed_error(format!("unsupported feed URL: {url}")));
        }
        debug!(url, "Fetching feed");

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(DigestError::Cancelled),
            body = self.download(url) => body?,
        };
        parse_feed(&body, limit)
    }

    /// Fetch every feed concurrently, failing on the first error.
    pub async fn fetch_all(
        &self,
        urls: &[String],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<FeedItem>> {
        let fetches = urls.iter().map(|url| self.fetch(url, limit, cancel));
        let results = futures::future::try_join_all(fetches).await?;
        Ok(results.into_iter().flatten().collect())
    }

    async fn download(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest(&format!("feed request to {url} failed"), &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::providers::classify_status(
                status.as_u16(),
                &format!("feed {url} returned HTTP {}", status.as_u16()),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| classify_reqwest(&format!("reading feed {url} failed"), &e))
    }
}
