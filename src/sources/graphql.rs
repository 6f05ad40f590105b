use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error};

use crate::sources::SourceFetch;
use crate::text;
use crate::types::{Item, RelayError, Result, SourceKind};

/// GraphQL insights-API fetcher. Queries the most recent posts and keeps
/// only those in the `published` ready-state. A missing API key is an
/// empty-result condition, not an error: the cycle continues without the
/// source until the operator configures credentials.
pub struct GraphqlSource {
    key: String,
    endpoint: String,
    link_base: String,
    api_key: Option<String>,
    client: reqwest::Client,
    max_items: usize,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse {
    data: Option<InsightData>,
    errors: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct InsightData {
    #[serde(rename = "allInsights")]
    insights: Vec<Insight>,
}

#[derive(Debug, Deserialize)]
struct Insight {
    id: serde_json::Value,
    title: Option<String>,
    text: Option<String>,
    #[serde(rename = "readyState")]
    ready_state: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
}

impl GraphqlSource {
    pub fn new(
        key: String,
        endpoint: String,
        api_key: Option<String>,
        client: reqwest::Client,
        max_items: usize,
    ) -> Self {
        // Post permalinks live next to the API endpoint.
        let link_base = endpoint
            .trim_end_matches('/')
            .trim_end_matches("/graphql")
            .to_string();
        Self {
            key,
            endpoint,
            link_base,
            api_key,
            client,
            max_items,
        }
    }

    fn query(&self) -> String {
        format!(
            "{{ allInsights(page: 1, pageSize: {}) {{ id title text readyState publishedAt }} }}",
            self.max_items
        )
    }

    /// Maps a GraphQL response body to normalized items. GraphQL-level
    /// errors are parse failures so the retry and health machinery see
    /// them.
    pub fn items_from_response(&self, response: GraphqlResponse) -> Result<Vec<Item>> {
        if let Some(errors) = response.errors {
            if !errors.is_empty() {
                return Err(RelayError::Parse(format!(
                    "GraphQL errors from {}: {}",
                    self.endpoint,
                    serde_json::to_string(&errors)?
                )));
            }
        }

        let insights = response.data.map(|d| d.insights).unwrap_or_default();
        let items = insights
            .into_iter()
            .filter(|insight| insight.ready_state.as_deref() == Some("published"))
            .map(|insight| {
                let id = json_id(&insight.id);
                let body = insight
                    .text
                    .map(|t| text::strip_html(&t))
                    .unwrap_or_default();
                let published = insight
                    .published_at
                    .as_deref()
                    .and_then(parse_timestamp);
                Item::new(
                    id.clone(),
                    insight.title.unwrap_or_else(|| "Untitled".to_string()),
                    format!("{}/read/{}", self.link_base, id),
                    &self.key,
                )
                .with_body(body)
                .with_published_at(published)
            })
            .collect();
        Ok(items)
    }
}

fn json_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl SourceFetch for GraphqlSource {
    fn source_key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        let Some(api_key) = &self.api_key else {
            debug!("no API key configured for {}, skipping", self.key);
            return Ok(Vec::new());
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Apikey {}", api_key))
            .json(&serde_json::json!({ "query": self.query() }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                error!("GraphQL request to {} failed: {}", self.endpoint, e);
                RelayError::Http(e)
            })?;

        let body: GraphqlResponse = response.json().await?;
        self.items_from_response(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(api_key: Option<&str>) -> GraphqlSource {
        GraphqlSource::new(
            "insights".to_string(),
            "https://api.example.test/graphql".to_string(),
            api_key.map(|k| k.to_string()),
            reqwest::Client::new(),
            5,
        )
    }

    fn response(json: serde_json::Value) -> GraphqlResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn maps_published_insights_only() {
        let items = source(Some("k"))
            .items_from_response(response(serde_json::json!({
                "data": { "allInsights": [
                    {
                        "id": 17,
                        "title": "On-chain flows",
                        "text": "<p>Exchange balances fell.</p>",
                        "readyState": "published",
                        "publishedAt": "2025-01-06T09:30:00Z"
                    },
                    {
                        "id": 18,
                        "title": "Draft post",
                        "text": "wip",
                        "readyState": "draft"
                    }
                ]}
            })))
            .unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.id, "17");
        assert_eq!(item.title, "On-chain flows");
        assert_eq!(item.url, "https://api.example.test/read/17");
        assert_eq!(item.body.as_deref(), Some("Exchange balances fell."));
        assert!(item.published_at.is_some());
    }

    #[test]
    fn graphql_errors_are_parse_failures() {
        let result = source(Some("k")).items_from_response(response(serde_json::json!({
            "errors": [{ "message": "rate limited" }]
        })));
        assert!(matches!(result, Err(RelayError::Parse(_))));
    }

    #[test]
    fn empty_data_yields_no_items() {
        let items = source(Some("k"))
            .items_from_response(response(serde_json::json!({ "data": null })))
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn missing_credential_is_empty_result() {
        let items = source(None).fetch().await.unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn long_body_is_capped() {
        let long = "x".repeat(1000);
        let items = source(Some("k"))
            .items_from_response(response(serde_json::json!({
                "data": { "allInsights": [{
                    "id": "a", "title": "t", "text": long,
                    "readyState": "published"
                }]}
            })))
            .unwrap();
        assert_eq!(items[0].body.as_ref().unwrap().chars().count(), crate::types::BODY_MAX);
    }
}
