//! PostgREST-style HTTP data source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{DataSource, FetchError, RangeQuery};

const REST_PREFIX: &str = "rest/v1/";

#[derive(Clone, Debug)]
pub struct RestDataSource {
    client: Client,
    base: Url,
    api_key: String,
}

impl RestDataSource {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let base = Url::parse(base_url)?.join("/")?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &crate::config::BackendSettings) -> Result<Self, FetchError> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| FetchError::InvalidInput("backend.url is not configured".into()))?;
        Self::new(
            url,
            settings.api_key.clone().unwrap_or_default(),
            settings.request_timeout,
        )
    }

    pub fn user_agent() -> &'static str {
        concat!("talentgrid/", env!("CARGO_PKG_VERSION"))
    }

    fn table_url(&self, table: &str) -> Result<Url, FetchError> {
        Ok(self.base.join(REST_PREFIX)?.join(table)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rows(resp: Response) -> Result<Vec<Value>, FetchError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(FetchError::Server {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl DataSource for RestDataSource {
    #[instrument(skip(self, query), fields(table = %query.table, offset = query.offset, limit = query.limit))]
    async fn fetch_range(&self, query: &RangeQuery) -> Result<Vec<Value>, FetchError> {
        let mut url = self.table_url(&query.table)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for filter in &query.filters {
                let (key, value) = filter.query_pair();
                pairs.append_pair(&key, &value);
            }
            if let Some(order) = &query.order {
                pairs.append_pair("order", &order.to_string());
            }
            pairs.append_pair("offset", &query.offset.to_string());
            pairs.append_pair("limit", &query.limit.to_string());
        }

        let resp = self.request(Method::GET, url).send().await?;
        let rows = Self::rows(resp).await?;
        debug!(rows = rows.len(), "Range read completed");
        Ok(rows)
    }

    async fn fetch_one(&self, table: &str, id: Uuid) -> Result<Option<Value>, FetchError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("id", &format!("eq.{id}"))
            .append_pair("limit", "1");

        let resp = self.request(Method::GET, url).send().await?;
        Ok(Self::rows(resp).await?.into_iter().next())
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, FetchError> {
        let url = self.table_url(table)?;
        let resp = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        Self::rows(resp).await?.into_iter().next().ok_or_else(|| FetchError::Server {
            status: 200,
            body: "insert returned no representation".to_string(),
        })
    }

    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value, FetchError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let resp = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;

        Self::rows(resp)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::not_found(table, id))
    }
}
