//! Human-feedback suspension and resume
//!
//! Entering the awaiting-human phase emits a structured request. The flow
//! parks until a response arrives or the configured timeout elapses, at
//! which point the default option is taken. Responses are parsed into
//! structured form before routing proceeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Category of a feedback request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    #[default]
    Clarification,
    Approval,
    Escalation,
    Override,
}

/// Structured request emitted when the flow suspends for human input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub id: Uuid,
    pub question: String,
    pub kind: FeedbackKind,
    /// Structured options; free text is always accepted too
    pub options: Vec<String>,
    /// Option applied when the wait times out
    pub default_option: Option<String>,
    /// Compact summary of the state that triggered the request
    pub context_digest: String,
    pub deadline: Option<DateTime<Utc>>,
}

impl FeedbackRequest {
    pub fn new(question: impl Into<String>, kind: FeedbackKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            kind,
            options: Vec::new(),
            default_option: None,
            context_digest: String::new(),
            deadline: None,
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_default_option(mut self, option: impl Into<String>) -> Self {
        self.default_option = Some(option.into());
        self
    }

    pub fn with_context_digest(mut self, digest: impl Into<String>) -> Self {
        self.context_digest = digest.into();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Parsed human response, ready to attach to state metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub raw: String,
    /// Matched option, if the response names one
    pub selected_option: Option<String>,
    /// Free-text portion when no option matched
    pub free_text: String,
    /// For approvals and overrides: whether the user accepted
    pub accepted: bool,
}

const NEGATIVE_WORDS: &[&str] = &["no", "reject", "deny", "abort", "disallow", "stop"];
const POSITIVE_WORDS: &[&str] = &["yes", "confirm", "allow", "approve", "accept", "ok", "retry", "proceed"];

/// Parse a raw response against the offered options.
///
/// An exact (case-insensitive) option match sets `selected_option`;
/// otherwise the whole response is free text. Accept/reject is inferred for
/// approval-like requests from the wording.
pub fn parse_response(raw: &str, options: &[String], kind: FeedbackKind) -> FeedbackResponse {
    let trimmed = raw.trim();
    let selected = options
        .iter()
        .find(|opt| opt.trim().eq_ignore_ascii_case(trimmed))
        .map(|opt| opt.trim().to_string());
    let lower = trimmed.to_lowercase();

    let mut accepted = true;
    if matches!(
        kind,
        FeedbackKind::Approval | FeedbackKind::Override | FeedbackKind::Escalation
    ) {
        let negative = NEGATIVE_WORDS.iter().any(|w| lower.contains(w));
        let positive = POSITIVE_WORDS.iter().any(|w| lower.contains(w));
        if negative && !positive {
            accepted = false;
        }
    }

    FeedbackResponse {
        raw: trimmed.to_string(),
        free_text: if selected.is_none() {
            trimmed.to_string()
        } else {
            String::new()
        },
        selected_option: selected,
        accepted,
    }
}

/// Source of human responses
#[async_trait]
pub trait FeedbackHandler: Send + Sync {
    /// Present the request and wait for a raw response. `None` means no
    /// response was available; the flow then applies the default option or
    /// parks.
    async fn request(&self, request: &FeedbackRequest) -> Option<String>;
}

/// Handler that replays preloaded responses; used in tests and demos
#[derive(Debug, Default)]
pub struct ScriptedFeedback {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedFeedback {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl FeedbackHandler for ScriptedFeedback {
    async fn request(&self, request: &FeedbackRequest) -> Option<String> {
        let response = self
            .responses
            .lock()
            .expect("scripted responses poisoned")
            .pop_front();
        tracing::info!(
            request_id = %request.id,
            kind = ?request.kind,
            answered = response.is_some(),
            "scripted feedback"
        );
        response
    }
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<String>>>>;

/// Flow-side half of the request/response channel protocol
pub struct FeedbackGateway {
    requests_tx: mpsc::Sender<FeedbackRequest>,
    pending: PendingMap,
}

/// Client-side half: receives requests and submits responses
pub struct FeedbackClient {
    requests_rx: tokio::sync::Mutex<mpsc::Receiver<FeedbackRequest>>,
    pending: PendingMap,
}

/// Create a connected gateway/client pair
pub fn feedback_channel() -> (FeedbackGateway, FeedbackClient) {
    let (tx, rx) = mpsc::channel(8);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    (
        FeedbackGateway {
            requests_tx: tx,
            pending: pending.clone(),
        },
        FeedbackClient {
            requests_rx: tokio::sync::Mutex::new(rx),
            pending,
        },
    )
}

#[async_trait]
impl FeedbackHandler for FeedbackGateway {
    async fn request(&self, request: &FeedbackRequest) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(request.id, tx);
        if self.requests_tx.send(request.clone()).await.is_err() {
            tracing::warn!(request_id = %request.id, "feedback client disconnected");
            return None;
        }
        rx.await.ok()
    }
}

impl FeedbackClient {
    /// Wait for the next feedback request from the flow
    pub async fn await_request(&self) -> Option<FeedbackRequest> {
        self.requests_rx.lock().await.recv().await
    }

    /// Submit a response to an outstanding request
    pub fn submit_response(&self, request_id: Uuid, response: impl Into<String>) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(&request_id)
            .ok_or_else(|| {
                Error::Invariant(format!("no outstanding feedback request {request_id}"))
            })?;
        sender
            .send(response.into())
            .map_err(|_| Error::Invariant("feedback requester went away".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        vec!["Proceed as-is".to_string(), "Abort".to_string()]
    }

    #[test]
    fn test_option_match_is_case_insensitive() {
        let response = parse_response("proceed as-is", &options(), FeedbackKind::Approval);
        assert_eq!(response.selected_option.as_deref(), Some("Proceed as-is"));
        assert!(response.free_text.is_empty());
        assert!(response.accepted);
    }

    #[test]
    fn test_free_text_when_no_option_matches() {
        let response = parse_response(
            "target 200ms p99 latency",
            &options(),
            FeedbackKind::Clarification,
        );
        assert!(response.selected_option.is_none());
        assert_eq!(response.free_text, "target 200ms p99 latency");
        assert!(response.accepted);
    }

    #[test]
    fn test_negative_wording_rejects_escalation() {
        let response = parse_response("abort", &options(), FeedbackKind::Escalation);
        assert!(!response.accepted);
        assert_eq!(response.selected_option.as_deref(), Some("Abort"));
    }

    #[test]
    fn test_retry_wording_accepts_escalation() {
        let response = parse_response(
            "retry with my notes below",
            &options(),
            FeedbackKind::Escalation,
        );
        assert!(response.accepted);
    }

    #[tokio::test]
    async fn test_scripted_handler_pops_in_order() {
        let handler = ScriptedFeedback::new(vec!["first".into(), "second".into()]);
        let request = FeedbackRequest::new("q", FeedbackKind::Clarification);
        assert_eq!(handler.request(&request).await.as_deref(), Some("first"));
        assert_eq!(handler.request(&request).await.as_deref(), Some("second"));
        assert_eq!(handler.request(&request).await, None);
    }

    #[tokio::test]
    async fn test_gateway_roundtrip() {
        let (gateway, client) = feedback_channel();
        let request = FeedbackRequest::new("continue?", FeedbackKind::Approval)
            .with_options(vec!["yes".into()]);
        let id = request.id;

        let waiter = tokio::spawn(async move { gateway.request(&request).await });
        let received = client.await_request().await.expect("request delivered");
        assert_eq!(received.id, id);
        client.submit_response(id, "yes").unwrap();

        let raw = waiter.await.unwrap();
        assert_eq!(raw.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn test_submit_to_unknown_request_fails() {
        let (_gateway, client) = feedback_channel();
        let err = client.submit_response(Uuid::new_v4(), "hello").unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn test_request_builder() {
        let request = FeedbackRequest::new("clarify scope", FeedbackKind::Clarification)
            .with_options(vec!["Proceed as-is".into()])
            .with_default_option("Proceed as-is")
            .with_context_digest("phase=planning confidence=0.5");
        assert_eq!(request.options.len(), 1);
        assert_eq!(request.default_option.as_deref(), Some("Proceed as-is"));
        assert!(request.context_digest.contains("planning"));
    }
}
