use async_trait::async_trait;
use feed_rs::model::Entry;
use feed_rs::parser;
use tracing::debug;

use crate::sources::SourceFetch;
use crate::text;
use crate::types::{Item, RelayError, Result, SourceKind};

/// RSS/Atom feed fetcher. Entries are capped per source, summaries are
/// stripped of markup, and an enclosure/media image is carried along when
/// the feed provides one.
pub struct RssSource {
    key: String,
    url: String,
    client: reqwest::Client,
    max_items: usize,
}

impl RssSource {
    pub fn new(key: String, url: String, client: reqwest::Client, max_items: usize) -> Self {
        Self {
            key,
            url,
            client,
            max_items,
        }
    }

    /// Maps a raw feed payload to normalized items. Split out from the
    /// network call so feed handling is testable offline.
    pub fn items_from_feed(&self, content: &str) -> Result<Vec<Item>> {
        let feed = parser::parse(content.as_bytes())
            .map_err(|e| RelayError::Parse(format!("invalid feed from {}: {}", self.url, e)))?;

        let items = feed
            .entries
            .into_iter()
            .take(self.max_items)
            .filter_map(|entry| self.entry_to_item(entry))
            .collect::<Vec<_>>();

        debug!("parsed {} entries from {}", items.len(), self.url);
        Ok(items)
    }

    fn entry_to_item(&self, entry: Entry) -> Option<Item> {
        let link = entry.links.first().map(|l| l.href.clone())?;
        let id = if entry.id.is_empty() {
            link.clone()
        } else {
            entry.id.clone()
        };
        let image_url = entry_image(&entry);
        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let summary = entry
            .summary
            .map(|s| text::strip_html(&s.content))
            .unwrap_or_default();

        Some(
            Item::new(id, title, link, &self.key)
                .with_body(summary)
                .with_published_at(entry.published)
                .with_image_url(image_url),
        )
    }
}

/// Picks an image for the entry: media thumbnails first, then any media
/// content with an image type.
fn entry_image(entry: &Entry) -> Option<String> {
    for media in &entry.media {
        if let Some(thumb) = media.thumbnails.first() {
            return Some(thumb.image.uri.clone());
        }
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .map(|m| m.essence_str().starts_with("image"))
                .unwrap_or(false);
            if is_image {
                if let Some(url) = &content.url {
                    return Some(url.to_string());
                }
            }
        }
    }
    None
}

#[async_trait]
impl SourceFetch for RssSource {
    fn source_key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        let content = response.text().await?;
        self.items_from_feed(&content)
    }
}
