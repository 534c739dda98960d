//! Axum route handlers for the Analysis API.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::header,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::fetcher::{
    AnalysisEvent, AnalysisFetcher, DeliveryMode, FetchOutcome, NonStreamingCause,
};
use crate::analysis::models::{AnalysisResult, RevealState};
use crate::analysis::report::render_report;
use crate::analysis::request::AnalysisInputs;
use crate::analysis::session::{SessionSnapshot, Ticket};
use crate::config::ProviderKind;
use crate::errors::AppError;
use crate::llm_client::LlmClient;
use crate::state::AppState;

type ClientSender = mpsc::Sender<Result<Event, Infallible>>;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    /// Reuse a session to supersede its previous request.
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub field_of_study: String,
    /// Falls back to `DEFAULT_PROVIDER`.
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    /// `false` forces the non-streaming upstream request.
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub session_id: Uuid,
    pub generation: u64,
    pub mode: DeliveryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_streaming_cause: Option<NonStreamingCause>,
    pub reveal: RevealState,
    pub result: AnalysisResult,
}

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub id: ProviderKind,
    pub ready: bool,
    pub streaming: bool,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub default: ProviderKind,
    pub providers: Vec<ProviderStatus>,
}

/// A request that passed validation and is ready to run.
struct AnalysisJob {
    ticket: Ticket,
    inputs: AnalysisInputs,
    fetcher: AnalysisFetcher,
    prefer_streaming: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/providers
///
/// Lists both providers and whether each has a credential and model configured.
pub async fn handle_list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let providers = ProviderKind::ALL
        .into_iter()
        .map(|kind| {
            let provider = state.config.provider(kind);
            ProviderStatus {
                id: kind,
                ready: provider.is_ready(),
                streaming: provider.streaming,
                model: provider.model.clone(),
            }
        })
        .collect();

    Json(ProvidersResponse {
        default: state.config.default_provider,
        providers,
    })
}

/// POST /api/v1/analysis/stream
///
/// Validates, then streams progress as SSE events: `session`, `phase`,
/// `section`, `complete`, `error`. Validation failures are a plain 400.
pub async fn handle_stream_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let job = prepare(&state, request)?;

    let (tx, rx) = mpsc::channel(64);
    let _ = tx.send(Ok(session_event(&job.ticket))).await;

    let span = info_span!(
        "analysis",
        session = %job.ticket.session_id,
        generation = job.ticket.generation
    );
    tokio::spawn(
        async move {
            // The outcome is already recorded on the session and sent to the client.
            let _ = run_analysis(&state, job, Some(tx)).await;
        }
        .instrument(span),
    );

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// POST /api/v1/analysis
///
/// Runs the full analysis and answers once it is finished.
pub async fn handle_run_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let job = prepare(&state, request)?;
    let ticket = job.ticket;

    let span = info_span!(
        "analysis",
        session = %ticket.session_id,
        generation = ticket.generation
    );
    let outcome = run_analysis(&state, job, None).instrument(span).await?;

    Ok(Json(AnalysisResponse {
        session_id: ticket.session_id,
        generation: ticket.generation,
        mode: outcome.mode,
        non_streaming_cause: outcome.non_streaming_cause,
        reveal: outcome.state.reveal,
        result: outcome.state.result,
    }))
}

/// GET /api/v1/analysis/:session_id
///
/// Returns phase, reveal flags, result and last error of a session.
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    state
        .sessions
        .snapshot(session_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))
}

/// GET /api/v1/analysis/:session_id/report
///
/// Plain-text report as a file download.
pub async fn handle_download_report(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .sessions
        .snapshot(session_id)
        .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))?;

    if snapshot.result.is_empty() {
        return Err(AppError::NotFound(format!(
            "Session {session_id} has no analysis to report yet"
        )));
    }

    let body = render_report(snapshot.inputs.as_ref(), &snapshot.result, Utc::now());
    let disposition = format!("attachment; filename=\"career-analysis-{session_id}.txt\"");

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

/// Opens a new generation for the session and validates inputs and provider.
/// A failure is recorded on the session; no upstream call has been made.
fn prepare(state: &AppState, request: AnalysisRequest) -> Result<AnalysisJob, AppError> {
    let ticket = state.sessions.begin(request.session_id);

    match validate(state, &request) {
        Ok((inputs, fetcher, provider, prefer_streaming)) => {
            state.sessions.start(&ticket, inputs.clone(), provider);
            Ok(AnalysisJob {
                ticket,
                inputs,
                fetcher,
                prefer_streaming,
            })
        }
        Err(e) => {
            warn!("Rejected analysis request: {e}");
            state.sessions.fail(&ticket, &e);
            Err(e)
        }
    }
}

fn validate(
    state: &AppState,
    request: &AnalysisRequest,
) -> Result<(AnalysisInputs, AnalysisFetcher, ProviderKind, bool), AppError> {
    let inputs = AnalysisInputs::new(&request.occupation, &request.field_of_study)?;

    let kind = request.provider.unwrap_or(state.config.default_provider);
    let provider = state.config.provider(kind).resolve()?;
    info!(
        "Analysis request accepted: provider={} model={} streaming={}",
        provider.kind, provider.model, provider.streaming
    );

    let model = provider.model.clone();
    let prefer_streaming = request.stream.unwrap_or(true) && provider.streaming;
    let backend = Arc::new(LlmClient::new(state.http.clone(), provider));
    let fetcher = AnalysisFetcher::new(backend, model);

    Ok((inputs, fetcher, kind, prefer_streaming))
}

/// Runs the fetcher and relays its events into the session and, when present,
/// to the client. Events from a superseded generation go nowhere.
async fn run_analysis(
    state: &AppState,
    job: AnalysisJob,
    client: Option<ClientSender>,
) -> Result<FetchOutcome, AppError> {
    let AnalysisJob {
        ticket,
        inputs,
        fetcher,
        prefer_streaming,
    } = job;
    let sessions = state.sessions.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let fetch = async {
        let tx = tx;
        fetcher.run(&inputs, prefer_streaming, &tx).await
    };
    let relay = async {
        while let Some(event) = rx.recv().await {
            if !sessions.apply(&ticket, &event) {
                continue;
            }
            if let (Some(client), Some(event)) = (&client, client_event(&event)) {
                let _ = client.send(Ok(event)).await;
            }
        }
    };
    let (outcome, ()) = tokio::join!(fetch, relay);

    if !sessions.is_current(&ticket) {
        info!("Request superseded by a newer one; its result is discarded");
    }

    match outcome {
        Ok(outcome) => {
            let current = sessions.complete(&ticket, outcome.state.clone(), outcome.mode);
            if let (true, Some(client)) = (current, &client) {
                let payload = json!({
                    "mode": outcome.mode,
                    "non_streaming_cause": outcome.non_streaming_cause,
                    "reveal": outcome.state.reveal,
                    "result": outcome.state.result,
                });
                let _ = client.send(Ok(named_event("complete", &payload))).await;
            }
            Ok(outcome)
        }
        Err(e) => {
            warn!("Analysis failed: {e}");
            let current = sessions.fail(&ticket, &e);
            if let (true, Some(client)) = (current, &client) {
                let payload = json!({"code": e.code(), "message": e.user_message()});
                let _ = client.send(Ok(named_event("error", &payload))).await;
            }
            Err(e)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SSE encoding
// ────────────────────────────────────────────────────────────────────────────

fn named_event(name: &str, payload: &Value) -> Event {
    Event::default().event(name).data(payload.to_string())
}

fn session_event(ticket: &Ticket) -> Event {
    named_event(
        "session",
        &json!({"session_id": ticket.session_id, "generation": ticket.generation}),
    )
}

/// Client-facing form of a fetcher event. A whole result is not forwarded
/// here: the single `complete` event sent when the run ends carries it.
fn client_event(event: &AnalysisEvent) -> Option<Event> {
    match event {
        AnalysisEvent::Phase(phase) => Some(named_event("phase", &json!({ "phase": phase }))),
        AnalysisEvent::Section { section, data } => Some(named_event(
            "section",
            &json!({"section": section, "data": data}),
        )),
        AnalysisEvent::Whole(_) => None,
    }
}
