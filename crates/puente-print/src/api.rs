// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Submission API.
//
// Maps (method, path, body) to a status code and a JSON body. The HTTP
// listener only frames bytes; every routing and error-mapping decision lives
// here so it can be tested without sockets.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument};

use puente_bridge::PrinterDriver;
use puente_core::error::PuenteError;
use puente_core::types::{Job, JobDescription, JobId, JobStatus, Segment};

use crate::dispatcher::Dispatcher;
use crate::invoice::Invoice;
use crate::order::Order;

/// Longest a `GET /jobs/{id}?wait=ms` request may block.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Status code and JSON body for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    fn json(status: u16, body: impl Serialize) -> Self {
        let body = serde_json::to_value(body)
            .unwrap_or_else(|e| json!({ "error": format!("response serialization: {e}") }));
        Self { status, body }
    }

    /// Answer without a body.
    fn empty(status: u16) -> Self {
        Self {
            status,
            body: serde_json::Value::Null,
        }
    }

    /// Whether the response carries a body at all.
    pub fn has_body(&self) -> bool {
        !self.body.is_null()
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    /// Reason phrase for the status line.
    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            202 => "Accepted",
            204 => "No Content",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            503 => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }
}

impl From<PuenteError> for ApiResponse {
    fn from(err: PuenteError) -> Self {
        let status = match &err {
            PuenteError::Validation(_) | PuenteError::Serialization(_) => 400,
            PuenteError::NotFound(_) => 404,
            PuenteError::NotCancellable { .. } => 409,
            PuenteError::QueueFull { .. } | PuenteError::ShuttingDown => 503,
            _ => 500,
        };
        Self::error(status, err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct Submitted {
    id: JobId,
}

/// What callers see of a job.
#[derive(Debug, Serialize)]
struct JobView {
    id: JobId,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            failure_reason: job.failure_reason,
            submitted_at: job.submitted_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct Health<'a> {
    endpoint: &'a str,
    healthy: bool,
    queued: usize,
    #[serde(flatten)]
    link: puente_core::types::LinkStatus,
}

/// Request router in front of a dispatcher.
pub struct Api<D: PrinterDriver> {
    dispatcher: Arc<Dispatcher<D>>,
}

impl<D: PrinterDriver> Clone for Api<D> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<D: PrinterDriver> Api<D> {
    pub fn new(dispatcher: Arc<Dispatcher<D>>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<D>> {
        &self.dispatcher
    }

    #[instrument(skip(self, body), fields(body_len = body.len()))]
    pub async fn handle(&self, method: &str, target: &str, body: &[u8]) -> ApiResponse {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let response = match (method, segments.as_slice()) {
            // CORS preflight from browser-based point-of-sale clients.
            ("OPTIONS", _) => ApiResponse::empty(204),
            ("POST", ["jobs"]) => self.submit_job(body),
            ("POST", ["invoices"]) => self.submit_invoice(body),
            ("POST", ["orders"]) => self.submit_order(body),
            ("POST", ["print"]) => self.submit_image(body),
            ("GET", ["jobs", id]) => match parse_id(id) {
                Ok(id) => self.job_status(id, query).await,
                Err(resp) => resp,
            },
            ("DELETE", ["jobs", id]) => match parse_id(id) {
                Ok(id) => self.cancel(id),
                Err(resp) => resp,
            },
            ("GET", ["health"]) => self.health(),
            (_, ["jobs"] | ["invoices"] | ["orders"] | ["print"] | ["jobs", _] | ["health"]) => {
                ApiResponse::error(405, format!("{method} not allowed on {path}"))
            }
            _ => ApiResponse::error(404, format!("no route for {path}")),
        };

        debug!(status = response.status, "request handled");
        response
    }

    fn submit_job(&self, body: &[u8]) -> ApiResponse {
        let description: JobDescription = match serde_json::from_slice(body) {
            Ok(description) => description,
            Err(e) => return ApiResponse::error(400, format!("malformed job description: {e}")),
        };
        self.accept(description)
    }

    fn submit_invoice(&self, body: &[u8]) -> ApiResponse {
        let invoice: Invoice = match serde_json::from_slice(body) {
            Ok(invoice) => invoice,
            Err(e) => return ApiResponse::error(400, format!("malformed invoice: {e}")),
        };
        let width = self.dispatcher.encoder().config().paper_width;
        self.accept(invoice.to_job(width))
    }

    fn submit_order(&self, body: &[u8]) -> ApiResponse {
        let order: Order = match serde_json::from_slice(body) {
            Ok(order) => order,
            Err(e) => return ApiResponse::error(400, format!("malformed order: {e}")),
        };
        let width = self.dispatcher.encoder().config().paper_width;
        self.accept(order.to_job(width))
    }

    /// A bare base64 image (or `{"data": "..."}`), printed and cut.
    fn submit_image(&self, body: &[u8]) -> ApiResponse {
        #[derive(serde::Deserialize)]
        struct ImageBody {
            data: String,
        }

        let data = match serde_json::from_slice::<ImageBody>(body) {
            Ok(parsed) => parsed.data,
            Err(_) => match std::str::from_utf8(body) {
                Ok(text) => text.to_string(),
                Err(_) => return ApiResponse::error(400, "image data must be base64 text"),
            },
        };
        if data.trim().is_empty() {
            return ApiResponse::error(400, "no image data received");
        }
        self.accept(JobDescription::new(vec![
            Segment::image(data),
            Segment::Feed { lines: 2 },
            Segment::Cut,
        ]))
    }

    fn accept(&self, description: JobDescription) -> ApiResponse {
        match self.dispatcher.submit(description) {
            Ok(id) => ApiResponse::json(202, Submitted { id }),
            Err(e) => e.into(),
        }
    }

    async fn job_status(&self, id: JobId, query: &str) -> ApiResponse {
        let wait = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("wait="))
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(|ms| Duration::from_millis(ms).min(MAX_WAIT));

        let result = match wait {
            Some(limit) => match tokio::time::timeout(limit, self.dispatcher.wait(id)).await {
                Ok(result) => result,
                // Still running: report where it is now.
                Err(_) => self.dispatcher.status(id),
            },
            None => self.dispatcher.status(id),
        };

        match result {
            Ok(job) => ApiResponse::json(200, JobView::from(job)),
            Err(e) => e.into(),
        }
    }

    fn cancel(&self, id: JobId) -> ApiResponse {
        match self.dispatcher.cancel(id) {
            Ok(job) => ApiResponse::json(200, JobView::from(job)),
            Err(e) => e.into(),
        }
    }

    fn health(&self) -> ApiResponse {
        let link = self.dispatcher.link();
        ApiResponse::json(
            200,
            Health {
                endpoint: link.endpoint(),
                healthy: link.is_healthy(),
                queued: self.dispatcher.queue_len(),
                link: link.link_status(),
            },
        )
    }
}

fn parse_id(raw: &str) -> Result<JobId, ApiResponse> {
    raw.parse::<u64>()
        .map(JobId)
        .map_err(|_| ApiResponse::error(400, format!("invalid job id {raw:?}")))
}
