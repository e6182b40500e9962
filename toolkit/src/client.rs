//! Thin client for the hosted REST layer (`/rest/v1`).
//!
//! Every call is awaited to completion by the caller before the next one is
//! issued; the client keeps no state beyond the HTTP connection pool.

use std::fmt;

use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use shared::PostgrestError;

use crate::config::Config;
use crate::error::{DbError, DbResult, Target};

/// One returned row, keys in the order the server sent them.
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// Filters & queries
// ============================================================================

/// Row filters rendered as PostgREST query pairs (`col=eq.value`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(Vec<(String, String)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.0.push((column.to_string(), format!("eq.{}", value)));
        self
    }

    pub fn neq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.0.push((column.to_string(), format!("neq.{}", value)));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.0.push((column.to_string(), "is.null".to_string()));
        self
    }

    pub fn in_list<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: fmt::Display,
    {
        let joined = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.0.push((column.to_string(), format!("in.({})", joined)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub select: Option<String>,
    pub filters: Filters,
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(
            "select".to_string(),
            self.select.clone().unwrap_or_else(|| "*".to_string()),
        )];
        pairs.extend(self.filters.pairs().iter().cloned());
        if let Some(order) = &self.order {
            pairs.push(("order".to_string(), order.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        pairs
    }
}

/// Total from a `Content-Range` header: `0-9/42` or `*/42`.
pub fn parse_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.parse().ok()
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl RestClient {
    pub fn new(config: &Config) -> DbResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DbError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.url.clone(),
            api_key: config.api_key().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, urlencoding::encode(table))
    }

    fn rpc_url(&self, function: &str) -> String {
        format!(
            "{}/rest/v1/rpc/{}",
            self.base_url,
            urlencoding::encode(function)
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    pub async fn select(&self, table: &str, query: &Query) -> DbResult<Vec<Row>> {
        let req = self
            .request(Method::GET, &self.table_url(table))
            .query(&query.to_pairs());
        let resp = self.send(req, "GET", Target::Table(table)).await?;
        decode_rows(resp).await
    }

    /// Like [`select`](Self::select), plus the table's exact row count when
    /// the server reports one.
    pub async fn select_counted(
        &self,
        table: &str,
        query: &Query,
    ) -> DbResult<(Vec<Row>, Option<u64>)> {
        let req = self
            .request(Method::GET, &self.table_url(table))
            .header("Prefer", "count=exact")
            .query(&query.to_pairs());
        let resp = self.send(req, "GET", Target::Table(table)).await?;
        let total = total_from(&resp);
        Ok((decode_rows(resp).await?, total))
    }

    /// Exact row count of `table`.
    pub async fn count(&self, table: &str) -> DbResult<u64> {
        let req = self
            .request(Method::GET, &self.table_url(table))
            .header("Prefer", "count=exact")
            .query(&[("select", "*"), ("limit", "0")]);
        let resp = self.send(req, "COUNT", Target::Table(table)).await?;

        total_from(&resp)
            .ok_or_else(|| DbError::Decode(format!("no usable Content-Range for '{}'", table)))
    }

    pub async fn insert<T: Serialize + ?Sized>(&self, table: &str, body: &T) -> DbResult<Vec<Row>> {
        let req = self
            .request(Method::POST, &self.table_url(table))
            .header("Prefer", "return=representation")
            .json(body);
        let resp = self.send(req, "POST", Target::Table(table)).await?;
        decode_rows(resp).await
    }

    pub async fn update<T: Serialize + ?Sized>(
        &self,
        table: &str,
        filters: &Filters,
        body: &T,
    ) -> DbResult<Vec<Row>> {
        if filters.is_empty() {
            return Err(DbError::unfiltered(table));
        }
        let req = self
            .request(Method::PATCH, &self.table_url(table))
            .header("Prefer", "return=representation")
            .query(filters.pairs())
            .json(body);
        let resp = self.send(req, "PATCH", Target::Table(table)).await?;
        decode_rows(resp).await
    }

    pub async fn delete(&self, table: &str, filters: &Filters) -> DbResult<Vec<Row>> {
        if filters.is_empty() {
            return Err(DbError::unfiltered(table));
        }
        let req = self
            .request(Method::DELETE, &self.table_url(table))
            .header("Prefer", "return=representation")
            .query(filters.pairs());
        let resp = self.send(req, "DELETE", Target::Table(table)).await?;
        decode_rows(resp).await
    }

    /// Invoke a named database function.
    pub async fn rpc<T: Serialize + ?Sized>(&self, function: &str, args: &T) -> DbResult<Value> {
        let req = self.request(Method::POST, &self.rpc_url(function)).json(args);
        let resp = self.send(req, "RPC", Target::Function(function)).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| DbError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| DbError::Decode(e.to_string()))
    }

    async fn send(&self, req: RequestBuilder, verb: &str, target: Target<'_>) -> DbResult<Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| DbError::Network(e.to_string()))?;
        let status = resp.status();
        tracing::debug!(verb, target = ?target, status = status.as_u16(), "rest call");

        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let body = serde_json::from_str::<PostgrestError>(&text).unwrap_or_else(|_| PostgrestError {
            message: text.trim().to_string(),
            ..PostgrestError::default()
        });
        Err(DbError::classify(status.as_u16(), &body, target))
    }
}

fn total_from(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

async fn decode_rows(resp: Response) -> DbResult<Vec<Row>> {
    let text = resp
        .text()
        .await
        .map_err(|e| DbError::Network(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&text).map_err(|e| DbError::Decode(e.to_string()))
}
