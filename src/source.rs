// src/source.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::models::{HistoryPage, HistoryQuery, SortDirection};

/// Remote paginated store of closed positions.
///
/// An `Err` means the whole call failed; there is no partial page.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn query(&self, query: &HistoryQuery) -> Result<HistoryPage>;
}

/// History source reached over HTTP (`GET {base}/positions/history`).
#[derive(Clone)]
pub struct HttpHistorySource {
    client: Client,
    base_url: String,
}

impl HttpHistorySource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build history source client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn params(query: &HistoryQuery) -> Result<Vec<(&'static str, String)>> {
        let mut qp = Vec::with_capacity(8);
        qp.push(("account", query.account.clone()));
        qp.push(("context", query.context.clone()));
        qp.push(("limit", query.limit.to_string()));
        qp.push(("offset", query.offset.to_string()));
        if let Some(sort) = &query.sort {
            qp.push(("sort", sort.field.clone()));
            let order = match sort.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            qp.push(("order", order.to_string()));
        }
        if let Some(block) = query.min_close_block {
            qp.push(("min_close_block", block.to_string()));
        }
        qp.push(("filters", serde_json::to_string(&query.filters)?));
        Ok(qp)
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn query(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let url = format!("{}/positions/history", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&Self::params(query)?)
            .send()
            .await
            .context("GET /positions/history failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET /positions/history {}: {}", status, text));
        }

        resp.json::<HistoryPage>()
            .await
            .context("Failed to parse history page")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FilterState, SortSpec, Subject};

    #[test]
    fn params_carry_paging_sort_and_bound() {
        let subject = Subject::parse("0x00000000000000000000000000000000000000aa", "perp").unwrap();
        let mut query = HistoryQuery::new(&subject, &FilterState::default()).page(20, 40);
        query.sort = Some(SortSpec::new("pnl", SortDirection::Asc));
        query.min_close_block = Some(1_001);

        let qp = HttpHistorySource::params(&query).unwrap();
        let get = |k: &str| qp.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("account"), Some("0x00000000000000000000000000000000000000aa"));
        assert_eq!(get("limit"), Some("20"));
        assert_eq!(get("offset"), Some("40"));
        assert_eq!(get("sort"), Some("pnl"));
        assert_eq!(get("order"), Some("asc"));
        assert_eq!(get("min_close_block"), Some("1001"));
    }

    #[test]
    fn default_ordering_sends_no_sort() {
        let subject = Subject::parse("0x00000000000000000000000000000000000000aa", "perp").unwrap();
        let mut query = HistoryQuery::new(&subject, &FilterState::default()).page(20, 0);
        query.sort = None;

        let qp = HttpHistorySource::params(&query).unwrap();
        assert!(qp.iter().all(|(k, _)| *k != "sort" && *k != "order"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let source = HttpHistorySource::new("http://localhost:3000/").unwrap();
        assert_eq!(source.base_url, "http://localhost:3000");
    }
}
