//! HTTP surface
//!
//! `POST /v1/chat` runs one turn through the pipeline. `GET /health`,
//! `GET /live` and `GET /metrics` serve probes and counters.
//!
//! This layer owns everything the pipeline treats as given: acknowledgment
//! tokens are redeemed and conversation history is loaded before the
//! `PipelineContext` is built, and the request deadline drives cancellation.

use crate::error::{AssistantError, ErrorBody, ErrorCode};
use crate::gates::ACKNOWLEDGED_ACTION_KEY;
use crate::observability::metrics;
use crate::pipeline::{cancellation, PipelineContext, PipelineOrchestrator, PipelineResult, PipelineStatus};
use crate::request_span;
use crate::store::{AckLedger, AckRedemption, ConversationStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Body of `POST /v1/chat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub ack_token: Option<String>,
    #[serde(default)]
    pub stance: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub action_source: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ChatRequest {
    pub fn new(
        message: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            session_id: None,
            ack_token: None,
            stance: None,
            locale: None,
            timezone: None,
            action_source: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_ack_token(mut self, token: impl Into<String>) -> Self {
        self.ack_token = Some(token.into());
        self
    }
}

/// Runs chat turns: context assembly, deadline and pipeline
pub struct ChatService {
    orchestrator: Arc<PipelineOrchestrator>,
    store: Arc<dyn ConversationStore>,
    ledger: Arc<AckLedger>,
    history_window: usize,
    request_timeout: Option<Duration>,
}

impl ChatService {
    pub fn new(
        orchestrator: Arc<PipelineOrchestrator>,
        store: Arc<dyn ConversationStore>,
        ledger: Arc<AckLedger>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            ledger,
            history_window: 20,
            request_timeout: None,
        }
    }

    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the read-only context for one request
    pub async fn build_context(&self, request: &ChatRequest) -> Result<PipelineContext, AssistantError> {
        if request.user_id.trim().is_empty() {
            return Err(AssistantError::invalid_input("user_id must not be empty"));
        }
        if request.conversation_id.trim().is_empty() {
            return Err(AssistantError::invalid_input(
                "conversation_id must not be empty",
            ));
        }

        let history = match self
            .store
            .history(&request.conversation_id, self.history_window)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "Conversation history unavailable, continuing without it");
                Vec::new()
            }
        };

        let mut ctx = PipelineContext::new(&request.user_id, &request.conversation_id)
            .with_history(history);
        ctx.session_id = request.session_id.clone();
        ctx.requested_stance = request.stance.clone();
        ctx.locale = request.locale.clone();
        ctx.timezone = request.timezone.clone();
        ctx.action_source = request.action_source.clone();
        ctx.metadata = request.metadata.clone();
        // Only the ledger may vouch for an acknowledged action
        ctx.metadata.remove(ACKNOWLEDGED_ACTION_KEY);

        if let Some(token) = &request.ack_token {
            ctx = match self.ledger.redeem(token, &request.user_id).await {
                AckRedemption::Valid { action } => ctx
                    .with_acknowledgment(token.clone(), true)
                    .with_metadata(ACKNOWLEDGED_ACTION_KEY, Value::String(action)),
                other => {
                    debug!(redemption = ?other, "Acknowledgment token rejected");
                    ctx.with_acknowledgment(token.clone(), false)
                }
            };
        }

        Ok(ctx)
    }

    /// Run one chat turn under the request deadline
    pub async fn handle(&self, request: ChatRequest) -> Result<PipelineResult, AssistantError> {
        let ctx = self.build_context(&request).await?;
        let span = request_span!(request_id = %ctx.request_id);

        async {
            let (handle, signal) = cancellation::pair();
            let run = self
                .orchestrator
                .run_with_cancellation(&request.message, &ctx, signal);
            tokio::pin!(run);

            let result = match self.request_timeout {
                Some(timeout) => {
                    tokio::select! {
                        biased;
                        result = &mut run => result,
                        _ = tokio::time::sleep(timeout) => {
                            warn!(timeout_ms = timeout.as_millis() as u64, "Request deadline exceeded");
                            handle.cancel("request deadline exceeded");
                            run.await
                        }
                    }
                }
                None => run.await,
            };
            drop(handle);
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

/// HTTP status for a pipeline outcome
pub fn status_code(status: PipelineStatus) -> StatusCode {
    match status {
        PipelineStatus::Success | PipelineStatus::Degraded | PipelineStatus::Stopped => {
            StatusCode::OK
        }
        PipelineStatus::AwaitAck => StatusCode::ACCEPTED,
        PipelineStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_status(body: &ErrorBody) -> StatusCode {
    match body.code {
        ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
        ErrorCode::ConfigurationError | ErrorCode::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    assistant_id: String,
    version: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: String,
}

async fn handle_chat(
    request: ChatRequest,
    service: Arc<ChatService>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    match service.handle(request).await {
        Ok(result) => Ok(warp::reply::with_status(
            warp::reply::json(&result),
            status_code(result.status),
        )),
        Err(e) => {
            let body = e.to_error_body();
            Ok(warp::reply::with_status(
                warp::reply::json(&body),
                error_status(&body),
            ))
        }
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, code, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, ErrorCode::InvalidInput, "not found".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, ErrorCode::InvalidInput, format!("invalid request body: {e}"))
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, ErrorCode::InvalidInput, "request body too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, ErrorCode::InvalidInput, "method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, "unhandled request".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { code, message }),
        status,
    ))
}

/// All HTTP routes
pub fn routes(
    service: Arc<ChatService>,
    assistant_id: String,
    max_body_bytes: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_service = warp::any().map(move || service.clone());

    let chat = warp::path!("v1" / "chat")
        .and(warp::post())
        .and(warp::body::content_length_limit(max_body_bytes))
        .and(warp::body::json())
        .and(with_service)
        .and_then(handle_chat);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            warp::reply::json(&HealthResponse {
                status: "healthy",
                assistant_id: assistant_id.clone(),
                version: env!("CARGO_PKG_VERSION"),
                timestamp: Utc::now().to_rfc3339(),
            })
        });

    let live = warp::path("live")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: Utc::now().to_rfc3339(),
            })
        });

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    chat.or(health)
        .or(live)
        .or(metrics_route)
        .recover(handle_rejection)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    service: Arc<ChatService>,
    assistant_id: String,
    max_body_bytes: u64,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) {
    let (bound, server) = warp::serve(routes(service, assistant_id, max_body_bytes))
        .bind_with_graceful_shutdown(addr, shutdown);
    info!(addr = %bound, "HTTP server listening");
    server.await;
    info!("HTTP server stopped");
}
