use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::sources::SourceFetch;
use crate::types::{Item, Result, SourceKind};

/// Link path fragments that point at non-article pages on the listing.
const DEFAULT_DENY_PATTERNS: &[&str] = &["/tag/", "/author/", "/goc-nhin/", "/chuyen-sau/"];

/// HTML listing-page fetcher. Article cards are headline anchors; links
/// outside the site or matching the deny list are skipped, and a nearby
/// image is picked up with a lazy-load fallback chain.
pub struct ScrapeSource {
    key: String,
    url: String,
    client: reqwest::Client,
    max_items: usize,
    deny_patterns: Vec<String>,
}

impl ScrapeSource {
    pub fn new(key: String, url: String, client: reqwest::Client, max_items: usize) -> Self {
        Self {
            key,
            url,
            client,
            max_items,
            deny_patterns: DEFAULT_DENY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    pub fn with_deny_patterns(mut self, patterns: Vec<String>) -> Self {
        self.deny_patterns = patterns;
        self
    }

    /// Extracts article items from a listing page. Synchronous so the
    /// non-`Send` DOM never crosses an await point, and testable offline.
    pub fn parse_listing(&self, html: &str) -> Vec<Item> {
        let document = Html::parse_document(html);
        let heading_link = Selector::parse("h3 a[href], h2 a[href]").expect("static selector");
        let img = Selector::parse("img").expect("static selector");

        let mut items = Vec::new();
        for anchor in document.select(&heading_link) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if !href.starts_with(&self.url) {
                continue;
            }
            if self.deny_patterns.iter().any(|p| href.contains(p.as_str())) {
                continue;
            }

            let title = anchor.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                continue;
            }

            let image_url = find_card_image(anchor, &img);

            items.push(
                Item::new(href, title, href, &self.key)
                    .with_published_at(Some(Utc::now()))
                    .with_image_url(image_url),
            );
            if items.len() >= self.max_items {
                break;
            }
        }

        debug!("scraped {} items from {}", items.len(), self.url);
        items
    }
}

/// Walks up from the headline anchor to the surrounding card and takes
/// the first usable image: lazy-load attribute first, then plain `src`,
/// skipping inline data URIs. The walk stops at the card container so an
/// unrelated card's image is never picked up.
fn find_card_image(anchor: ElementRef, img: &Selector) -> Option<String> {
    for ancestor in anchor.ancestors().take(2) {
        let Some(container) = ElementRef::wrap(ancestor) else {
            continue;
        };
        for image in container.select(img) {
            if let Some(src) = image.value().attr("data-src") {
                return Some(src.to_string());
            }
            if let Some(src) = image.value().attr("src") {
                if !src.starts_with("data:") {
                    return Some(src.to_string());
                }
            }
        }
    }
    None
}

#[async_trait]
impl SourceFetch for ScrapeSource {
    fn source_key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Scrape
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        let html = response.text().await?;
        Ok(self.parse_listing(&html))
    }
}
