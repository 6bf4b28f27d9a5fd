//! REST adapter for the rest and supabase source kinds.
//!
//! The planner's query expression for REST sources is `GET /path` or
//! `POST /path`; declared parameters of the form `name=value` travel as the
//! query string (GET) or as a JSON object body (POST). Responses are JSON:
//! an array of objects becomes rows, a single object becomes one row.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{SourceAdapter, TableData};
use crate::error::ConnectorError;
use crate::source::DataSourceConfig;
use crate::Result;

/// Adapter for HTTP-speaking source kinds.
pub struct RestAdapter {
    client: Client,
    base: String,
    max_rows: usize,
}

impl RestAdapter {
    /// Builds an adapter from a source configuration.
    pub fn new(config: &DataSourceConfig) -> Self {
        Self {
            client: Client::new(),
            base: config.endpoint.trim_end_matches('/').to_string(),
            max_rows: config.max_rows,
        }
    }

    /// Splits `name=value` parameters into pairs.
    fn pairs(parameters: &[String]) -> Vec<(String, String)> {
        parameters
            .iter()
            .map(|p| match p.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => ("value".to_string(), p.clone()),
            })
            .collect()
    }

    /// Flattens a JSON payload into columnar data.
    fn tabulate(&self, payload: Value) -> TableData {
        let objects: Vec<Value> = match payload {
            Value::Array(items) => items,
            Value::Object(_) => vec![payload],
            other => vec![serde_json::json!({ "value": other })],
        };

        let columns: Vec<String> = objects
            .first()
            .and_then(|o| o.as_object())
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();

        let truncated = objects.len() > self.max_rows;
        let rows = objects
            .into_iter()
            .take(self.max_rows)
            .map(|o| {
                columns
                    .iter()
                    .map(|c| match o.get(c) {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Null) | None => String::new(),
                        Some(other) => other.to_string(),
                    })
                    .collect()
            })
            .collect();

        TableData {
            columns,
            rows,
            elapsed_ms: 0,
            truncated,
        }
    }
}

#[async_trait]
impl SourceAdapter for RestAdapter {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        query: &str,
        parameters: &[String],
        deadline: Duration,
    ) -> Result<TableData> {
        let (method, path) = query
            .split_once(' ')
            .ok_or_else(|| ConnectorError::Adapter(format!("bad REST expression: {}", query)))?;
        let url = format!("{}/{}", self.base, path.trim_start_matches('/'));
        let pairs = Self::pairs(parameters);

        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url).query(&pairs),
            "POST" => {
                let body: serde_json::Map<String, Value> = pairs
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                self.client.post(&url).json(&Value::Object(body))
            }
            other => {
                return Err(ConnectorError::Adapter(format!(
                    "unsupported REST method: {}",
                    other
                )))
            }
        };

        let started = Instant::now();
        let response = match tokio::time::timeout(deadline, request.send()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectorError::SourceTimeout),
        };
        if !response.status().is_success() {
            return Err(ConnectorError::SourceUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        let payload: Value = match tokio::time::timeout(deadline, response.json()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectorError::SourceTimeout),
        };

        let mut data = self.tabulate(payload);
        data.elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(rows = data.rows.len(), elapsed_ms = data.elapsed_ms, "rest query executed");
        Ok(data)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for RestAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAdapter")
            .field("base", &self.base)
            .field("max_rows", &self.max_rows)
            .finish_non_exhaustive()
    }
}
