use async_trait::async_trait;
use axum::http::{HeaderMap, Method, Uri};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::security::rejection::Rejection;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Read-only view of an inbound request, built once and shared by every stage.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    /// Raw (still percent-encoded) path.
    pub path: String,
    /// First value of each query parameter, decoded.
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            method,
            path: uri.path().to_string(),
            query: parse_query(uri.query()),
            headers,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
            params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }
    }
    params
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Hand the request to the next stage or the backend.
    Continue,
    /// Preflight short-circuit: answer 204 without touching the backend.
    NoContent,
    Reject(Rejection),
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, ctx: &RequestContext) -> StageOutcome;
}

/// Stages run strictly in list order; the first non-`Continue` outcome ends the run.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &RequestContext) -> StageOutcome {
        for stage in &self.stages {
            let outcome = stage.evaluate(ctx).await;
            if outcome != StageOutcome::Continue {
                debug!(
                    request_id = %ctx.request_id,
                    stage = stage.name(),
                    outcome = ?outcome,
                    "pipeline stopped"
                );
                return outcome;
            }
        }
        StageOutcome::Continue
    }
}
