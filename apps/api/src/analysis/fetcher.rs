//! Streaming Analysis Fetcher: drives one analysis request end to end.
//!
//! Flow: build request → open stream → SSE frames → text deltas → NDJSON
//!       sections → events. When the stream ends: flush, parse the
//!       unterminated tail, and fall back to whole-object parsing if no
//!       section was ever recognized.
//!
//! Fallback ladder, each step only when the previous one could not run:
//! 1. streaming NDJSON
//! 2. non-streaming request (transport cannot stream)
//! 3. whole-buffer JSON (stream finished with zero sections)
//! 4. protocol error

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::analysis::models::{AnalysisResult, AnalysisState, Applied, Phase};
use crate::analysis::ndjson::{NdjsonSectionParser, SectionLine};
use crate::analysis::request::{build_chat_request, AnalysisInputs};
use crate::errors::AppError;
use crate::llm_client::sse::{SseFrame, SseLineDecoder};
use crate::llm_client::{delta_text, strip_json_fences, ChunkStream, CompletionBackend};

/// Progress reported while a request runs, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    Phase(Phase),
    /// One section arrived. Known sections carry their normalized payload.
    Section { section: String, data: Value },
    /// A whole result arrived at once; every section is revealed together.
    Whole(AnalysisResult),
}

/// How the final result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Streaming,
    WholeBuffer,
    NonStreaming,
}

/// Why a request went out without streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NonStreamingCause {
    /// The caller or the provider configuration asked for it.
    Requested,
    /// A streaming request was answered without a stream.
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub state: AnalysisState,
    pub mode: DeliveryMode,
    /// Set only when `mode` is `NonStreaming`.
    pub non_streaming_cause: Option<NonStreamingCause>,
}

/// Runs analyses against one backend and model.
#[derive(Clone)]
pub struct AnalysisFetcher {
    backend: Arc<dyn CompletionBackend>,
    model: String,
}

impl AnalysisFetcher {
    pub fn new(backend: Arc<dyn CompletionBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    /// Runs the whole ladder. Events go to `events`; a closed receiver is not
    /// an error. On success the returned state holds every applied section.
    pub async fn run(
        &self,
        inputs: &AnalysisInputs,
        prefer_streaming: bool,
        events: &UnboundedSender<AnalysisEvent>,
    ) -> Result<FetchOutcome, AppError> {
        info!(
            "Requesting analysis: occupation={:?} field_of_study={:?} model={}",
            inputs.occupation, inputs.field_of_study, self.model
        );
        let _ = events.send(AnalysisEvent::Phase(Phase::Requesting));

        let request = build_chat_request(inputs, &self.model, true);

        let stream = if prefer_streaming {
            self.backend.open_stream(&request).await?
        } else {
            None
        };

        let outcome = match stream {
            Some(stream) => {
                let _ = events.send(AnalysisEvent::Phase(Phase::Streaming));
                let mut session = StreamSession::new(events);
                session.consume(stream).await?;
                session.reconcile()?
            }
            None => {
                let cause = if prefer_streaming {
                    warn!(
                        "Backend cannot stream this request; \
                         falling back to a non-streaming completion"
                    );
                    NonStreamingCause::Unsupported
                } else {
                    info!("Non-streaming mode requested; sending a non-streaming completion");
                    NonStreamingCause::Requested
                };
                let content = self.backend.complete(&request.non_streaming()).await?;
                let _ = events.send(AnalysisEvent::Phase(Phase::Rendering));
                let mut outcome = parse_non_streaming(&content, events)?;
                outcome.non_streaming_cause = Some(cause);
                outcome
            }
        };

        let revealed = outcome.state.reveal.revealed_count();
        if outcome.state.reveal.all_revealed() {
            info!("Analysis complete via {:?}", outcome.mode);
        } else {
            warn!(
                "Analysis complete via {:?} with only {revealed} of 6 sections",
                outcome.mode
            );
        }
        let _ = events.send(AnalysisEvent::Phase(Phase::Done));
        Ok(outcome)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stream session
// ────────────────────────────────────────────────────────────────────────────

/// Buffers and flags for one streaming read. Dropped when the request ends.
struct StreamSession<'a> {
    decoder: SseLineDecoder,
    parser: NdjsonSectionParser,
    state: AnalysisState,
    received_any: bool,
    events: &'a UnboundedSender<AnalysisEvent>,
}

impl<'a> StreamSession<'a> {
    fn new(events: &'a UnboundedSender<AnalysisEvent>) -> Self {
        Self {
            decoder: SseLineDecoder::new(),
            parser: NdjsonSectionParser::new(),
            state: AnalysisState::new(),
            received_any: false,
            events,
        }
    }

    /// Reads until end of body or `[DONE]`, whichever comes first.
    async fn consume(&mut self, mut stream: ChunkStream) -> Result<(), AppError> {
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for frame in self.decoder.feed(&bytes) {
                match frame {
                    SseFrame::Data(payload) => self.on_payload(&payload),
                    SseFrame::Done => {
                        debug!("Received [DONE]");
                        return Ok(());
                    }
                }
            }
        }
        if !self.decoder.is_finished() {
            debug!("Body ended without [DONE]");
        }
        for frame in self.decoder.finish() {
            if let SseFrame::Data(payload) = frame {
                self.on_payload(&payload);
            }
        }
        Ok(())
    }

    fn on_payload(&mut self, payload: &str) {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            debug!("Skipping non-JSON data frame: {:?}", truncate(payload));
            return;
        };
        let Some(text) = delta_text(&value) else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let sections = self.parser.push(text);
        self.apply_all(sections);
    }

    fn apply_all(&mut self, sections: Vec<SectionLine>) {
        for line in sections {
            apply_line(&mut self.state, line, self.events);
            self.received_any = true;
        }
    }

    /// End-of-stream reconciliation plus the whole-buffer fallback.
    fn reconcile(mut self) -> Result<FetchOutcome, AppError> {
        let _ = self.events.send(AnalysisEvent::Phase(Phase::Rendering));
        if !self.parser.pending().trim().is_empty() {
            debug!(
                "Parsing {} unterminated bytes at end of stream",
                self.parser.pending().len()
            );
        }
        let remaining = self.parser.finish();
        self.apply_all(remaining);

        if self.received_any {
            return Ok(FetchOutcome {
                state: self.state,
                mode: DeliveryMode::Streaming,
                non_streaming_cause: None,
            });
        }

        warn!("No NDJSON sections recognized; trying whole-object parse of the stream");
        match parse_whole_result(self.parser.transcript()) {
            Some(result) => {
                self.state.apply_whole(result);
                let _ = self
                    .events
                    .send(AnalysisEvent::Whole(self.state.result.clone()));
                Ok(FetchOutcome {
                    state: self.state,
                    mode: DeliveryMode::WholeBuffer,
                    non_streaming_cause: None,
                })
            }
            None => Err(AppError::Protocol(
                "The model did not answer in sectioned NDJSON, and its output could not be \
                 parsed as one JSON object. Retry, or switch to non-streaming mode."
                    .to_string(),
            )),
        }
    }
}

/// Applies one section line and emits its event. Every `{section, data}` line
/// counts as received, whatever the shape of `data`.
fn apply_line(
    state: &mut AnalysisState,
    line: SectionLine,
    events: &UnboundedSender<AnalysisEvent>,
) {
    let SectionLine { section, data } = line;
    match state.apply_section(&section, data.clone()) {
        Applied::Known(kind) => {
            if state.result.raw.contains_key(kind.as_str()) {
                debug!("Section {kind} payload is not an object; stored as raw");
            } else {
                debug!("Section received: {kind}");
            }
            let data = state.result.section_value(kind).unwrap_or(data);
            let _ = events.send(AnalysisEvent::Section { section, data });
        }
        Applied::Unknown => {
            debug!("Unrecognized section {section:?} kept in side-channel");
            let _ = events.send(AnalysisEvent::Section { section, data });
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Whole-object parsing
// ────────────────────────────────────────────────────────────────────────────

/// Parses text as one object holding the full analysis. The text must be
/// bounded by `{` and `}` (after stripping code fences) and contain at least
/// one of the six sections.
pub fn parse_whole_result(text: &str) -> Option<AnalysisResult> {
    let text = strip_json_fences(text);
    if !(text.starts_with('{') && text.ends_with('}')) {
        return None;
    }
    let result: AnalysisResult = serde_json::from_str(text).ok()?;
    (result.known_section_count() > 0).then_some(result)
}

/// Non-streaming reply: a whole object first, else the content is treated as
/// NDJSON and run through the section parser alone.
fn parse_non_streaming(
    content: &str,
    events: &UnboundedSender<AnalysisEvent>,
) -> Result<FetchOutcome, AppError> {
    let mut state = AnalysisState::new();

    if let Some(result) = parse_whole_result(content) {
        state.apply_whole(result);
        let _ = events.send(AnalysisEvent::Whole(state.result.clone()));
        return Ok(FetchOutcome {
            state,
            mode: DeliveryMode::NonStreaming,
            non_streaming_cause: None,
        });
    }

    let mut parser = NdjsonSectionParser::new();
    let mut sections = parser.push(content);
    sections.extend(parser.finish());
    let received_any = !sections.is_empty();
    for line in sections {
        apply_line(&mut state, line, events);
    }

    if received_any {
        Ok(FetchOutcome {
            state,
            mode: DeliveryMode::NonStreaming,
            non_streaming_cause: None,
        })
    } else {
        Err(AppError::Protocol(
            "The model's non-streaming reply could not be parsed as an analysis. Retry."
                .to_string(),
        ))
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::models::SectionKind;
    use crate::llm_client::{ChatCompletionRequest, LlmError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    // ── Fixtures ────────────────────────────────────────────────────────────

    fn section_lines() -> Vec<String> {
        vec![
            json!({"section": "misperception", "data": {"type": "Myth", "title": "Major ≠ job", "content": "Majors rarely decide careers."}}),
            json!({"section": "essence", "data": {"summary": "Owns the product", "industry": "Internet", "role": "Coordinates engineering and design"}}),
            json!({"section": "threshold", "data": {"level": "Medium", "match": "Writing transfers", "path": ["Internship", "Master's degree"]}}),
            json!({"section": "skills", "data": {"core": ["Communication", "Data analysis"], "match": "Strong writing", "practice": ["Write a PRD", "Run a survey"]}}),
            json!({"section": "experience", "data": {"scene": "Open office, many meetings", "value": "Creating", "fit_test": "Shadow a PM for a day"}}),
            json!({"section": "conclusion", "data": {"feasibility": "Feasible without a degree change", "priority_action": "Apply for a PM internship"}}),
        ]
        .into_iter()
        .map(|v| v.to_string())
        .collect()
    }

    fn ndjson_text() -> String {
        section_lines()
            .into_iter()
            .map(|l| format!("{l}\n"))
            .collect()
    }

    /// Wraps text in SSE delta frames of `piece` characters each.
    fn sse_body(text: &str, piece: usize, done: bool) -> Vec<u8> {
        let chars: Vec<char> = text.chars().collect();
        let mut body = String::from(": connected\n\n");
        for part in chars.chunks(piece) {
            let content: String = part.iter().collect();
            let frame = json!({"choices": [{"delta": {"content": content}}]});
            body.push_str(&format!("data: {frame}\n\n"));
        }
        if done {
            body.push_str("data: [DONE]\n\n");
        }
        body.into_bytes()
    }

    fn split_bytes(body: &[u8], size: usize) -> Vec<Vec<u8>> {
        body.chunks(size).map(|c| c.to_vec()).collect()
    }

    #[derive(Default)]
    struct ScriptedBackend {
        chunks: Option<Vec<Vec<u8>>>,
        reply: Option<String>,
        stream_calls: AtomicUsize,
        complete_calls: AtomicUsize,
        last_complete_stream_flag: Mutex<Option<bool>>,
    }

    impl ScriptedBackend {
        fn streaming(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: Some(chunks),
                ..Default::default()
            }
        }

        fn non_streaming(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn open_stream(
            &self,
            _request: &ChatCompletionRequest,
        ) -> Result<Option<ChunkStream>, LlmError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.chunks.clone().map(|chunks| {
                futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed()
            }))
        }

        async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, LlmError> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_complete_stream_flag.lock().unwrap() = Some(request.stream);
            self.reply.clone().ok_or(LlmError::Api {
                status: 500,
                message: "no reply scripted".to_string(),
                hint: None,
            })
        }
    }

    async fn run_with(
        backend: ScriptedBackend,
    ) -> (
        Result<FetchOutcome, AppError>,
        Arc<ScriptedBackend>,
        UnboundedReceiver<AnalysisEvent>,
    ) {
        let backend = Arc::new(backend);
        let fetcher = AnalysisFetcher::new(backend.clone(), "test-model");
        let inputs = AnalysisInputs::new("Product Manager", "Literature").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let outcome = fetcher.run(&inputs, true, &tx).await;
        (outcome, backend, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── Streaming path ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_full_stream_populates_all_sections() {
        let body = sse_body(&ndjson_text(), 17, true);
        let (outcome, backend, mut rx) =
            run_with(ScriptedBackend::streaming(vec![body])).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.mode, DeliveryMode::Streaming);
        assert_eq!(outcome.non_streaming_cause, None);
        assert_eq!(outcome.state.result.known_section_count(), 6);
        assert!(outcome.state.reveal.all_revealed());
        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 0);

        let sections: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AnalysisEvent::Section { section, .. } => Some(section),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = SectionKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(sections, expected);
    }

    #[tokio::test]
    async fn test_result_is_independent_of_chunk_boundaries() {
        let body = sse_body(&ndjson_text(), 9, true);

        let (whole, _, _) = run_with(ScriptedBackend::streaming(vec![body.clone()])).await;
        let (bytewise, _, _) =
            run_with(ScriptedBackend::streaming(split_bytes(&body, 1))).await;
        let (odd, _, _) = run_with(ScriptedBackend::streaming(split_bytes(&body, 7))).await;

        let whole = whole.unwrap().state;
        assert_eq!(whole.result.known_section_count(), 6);
        assert_eq!(bytewise.unwrap().state, whole);
        assert_eq!(odd.unwrap().state, whole);
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let lines = section_lines();
        let text = format!("{}\nnot json\n{}\n", lines[1], lines[3]);
        let body = sse_body(&text, 50, true);
        let (outcome, _, _) = run_with(ScriptedBackend::streaming(vec![body])).await;
        let result = outcome.unwrap().state.result;

        assert!(result.essence.is_some());
        assert!(result.skills.is_some());
        assert_eq!(result.known_section_count(), 2);
    }

    #[tokio::test]
    async fn test_wrong_shape_section_is_stored_and_revealed() {
        let lines = section_lines();
        let threshold = json!({
            "section": "threshold",
            "data": {"level": "High", "match": "m", "path": "Do a master's"}
        });
        let text = format!("{}\n{threshold}\n", lines[1]);
        let body = sse_body(&text, 20, true);
        let (outcome, _, mut rx) = run_with(ScriptedBackend::streaming(vec![body])).await;
        let state = outcome.unwrap().state;

        assert!(state.reveal.threshold);
        assert_eq!(
            state.result.threshold.as_ref().unwrap().path,
            vec!["Do a master's"]
        );
        let threshold_events: Vec<Value> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AnalysisEvent::Section { section, data } if section == "threshold" => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(threshold_events.len(), 1);
        assert_eq!(threshold_events[0]["path"], json!(["Do a master's"]));
    }

    #[tokio::test]
    async fn test_stream_of_only_wrong_shape_sections_succeeds() {
        let text = [
            json!({"section": "essence", "data": {"summary": "s", "role": ["a", "b"]}}),
            json!({"section": "conclusion", "data": {"feasibility": 3}}),
            json!({"section": "experience", "data": "Mostly desk work"}),
        ]
        .iter()
        .map(|v| format!("{v}\n"))
        .collect::<String>();
        let body = sse_body(&text, 15, true);
        let (outcome, _, _) = run_with(ScriptedBackend::streaming(vec![body])).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.mode, DeliveryMode::Streaming);
        let state = outcome.state;
        assert_eq!(state.reveal.revealed_count(), 3);
        assert_eq!(state.result.essence.unwrap().role, "a; b");
        assert_eq!(state.result.conclusion.unwrap().feasibility, "3");
        assert_eq!(state.result.raw["experience"], "Mostly desk work");
    }

    #[tokio::test]
    async fn test_done_mid_buffer_keeps_preceding_lines() {
        let lines = section_lines();
        let text = format!("{}\n{}\n", lines[0], lines[1]);
        let mut body = sse_body(&text, 1000, true);
        // Anything after [DONE] in the same chunk must be ignored.
        let late = json!({"choices": [{"delta": {"content": format!("{}\n", lines[2])}}]});
        body.extend_from_slice(format!("data: {late}\n\n").as_bytes());

        let (outcome, _, _) = run_with(ScriptedBackend::streaming(vec![body])).await;
        let state = outcome.unwrap().state;

        assert!(state.reveal.misperception);
        assert!(state.reveal.essence);
        assert!(!state.reveal.threshold);
        assert!(state.result.threshold.is_none());
    }

    #[tokio::test]
    async fn test_unterminated_trailing_object_is_recognized() {
        let lines = section_lines();
        let text = format!("{}\n{}", lines[4], lines[5]);
        let body = sse_body(&text, 30, false);
        let (outcome, _, _) = run_with(ScriptedBackend::streaming(vec![body])).await;
        let state = outcome.unwrap().state;

        assert!(state.reveal.experience);
        assert!(state.reveal.conclusion);
        assert_eq!(
            state.result.conclusion.unwrap().priority_action,
            "Apply for a PM internship"
        );
    }

    #[tokio::test]
    async fn test_heartbeat_frames_are_ignored() {
        let lines = section_lines();
        let mut body = b"data: ping\ndata: {\"choices\":[]}\n".to_vec();
        body.extend(sse_body(&format!("{}\n", lines[1]), 40, true));
        let (outcome, _, _) = run_with(ScriptedBackend::streaming(vec![body])).await;
        assert!(outcome.unwrap().state.result.essence.is_some());
    }

    #[tokio::test]
    async fn test_unknown_section_is_stored_but_not_revealed() {
        let lines = section_lines();
        let extra = json!({"section": "salary", "data": {"range": "10k"}}).to_string();
        let text = format!("{extra}\n{}\n", lines[1]);
        let body = sse_body(&text, 25, true);
        let (outcome, _, _) = run_with(ScriptedBackend::streaming(vec![body])).await;
        let state = outcome.unwrap().state;

        assert_eq!(state.result.extra["salary"]["range"], "10k");
        assert_eq!(state.reveal.revealed_count(), 1);
    }

    #[tokio::test]
    async fn test_whole_buffer_fallback_when_no_sections() {
        let whole = json!({
            "misperception": {"type": "Myth", "title": "t", "content": "c"},
            "essence": {"summary": "s", "industry": "i", "role": "r"},
            "conclusion": {"feasibility": "f", "priority_action": "p"}
        });
        let pretty = serde_json::to_string_pretty(&whole).unwrap();
        let body = sse_body(&pretty, 11, true);
        let (outcome, _, mut rx) = run_with(ScriptedBackend::streaming(vec![body])).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.mode, DeliveryMode::WholeBuffer);
        assert_eq!(outcome.state.result.known_section_count(), 3);
        assert!(outcome.state.reveal.all_revealed());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AnalysisEvent::Whole(_))));
    }

    #[tokio::test]
    async fn test_protocol_error_when_nothing_parses() {
        let body = sse_body("Sorry, I cannot help with that.", 8, true);
        let (outcome, _, _) = run_with(ScriptedBackend::streaming(vec![body])).await;
        assert!(matches!(outcome, Err(AppError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_stream_read_error_fails_the_request() {
        struct BrokenStream;

        #[async_trait]
        impl CompletionBackend for BrokenStream {
            async fn open_stream(
                &self,
                _request: &ChatCompletionRequest,
            ) -> Result<Option<ChunkStream>, LlmError> {
                let items = vec![
                    Ok(Bytes::from_static(b"data: {}\n")),
                    Err(LlmError::Stream("connection reset".to_string())),
                ];
                Ok(Some(futures::stream::iter(items).boxed()))
            }

            async fn complete(&self, _request: &ChatCompletionRequest) -> Result<String, LlmError> {
                unreachable!("non-streaming path must not run")
            }
        }

        let fetcher = AnalysisFetcher::new(Arc::new(BrokenStream), "m");
        let inputs = AnalysisInputs::new("Nurse", "Biology").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = fetcher.run(&inputs, true, &tx).await;
        assert!(matches!(
            outcome,
            Err(AppError::Upstream(LlmError::Stream(_)))
        ));
    }

    // ── Non-streaming fallback ──────────────────────────────────────────────

    fn whole_reply() -> String {
        let mut object = serde_json::Map::new();
        for line in section_lines() {
            let value: Value = serde_json::from_str(&line).unwrap();
            object.insert(
                value["section"].as_str().unwrap().to_string(),
                value["data"].clone(),
            );
        }
        Value::Object(object).to_string()
    }

    #[tokio::test]
    async fn test_non_streaming_fallback_matches_streaming_result() {
        let (streamed, _, _) =
            run_with(ScriptedBackend::streaming(vec![sse_body(&ndjson_text(), 13, true)])).await;
        let (fallback, backend, mut rx) =
            run_with(ScriptedBackend::non_streaming(&whole_reply())).await;

        let streamed = streamed.unwrap().state;
        let fallback = fallback.unwrap();
        assert_eq!(fallback.mode, DeliveryMode::NonStreaming);
        assert_eq!(
            fallback.non_streaming_cause,
            Some(NonStreamingCause::Unsupported)
        );
        assert_eq!(fallback.state.result, streamed.result);
        assert!(fallback.state.reveal.all_revealed());

        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*backend.last_complete_stream_flag.lock().unwrap(), Some(false));

        // All flags flip at once: one Whole event, no per-section events.
        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, AnalysisEvent::Whole(_)))
                .count(),
            1
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, AnalysisEvent::Section { .. })));
    }

    #[tokio::test]
    async fn test_non_streaming_reply_in_ndjson_form() {
        let (outcome, _, _) = run_with(ScriptedBackend::non_streaming(&ndjson_text())).await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.mode, DeliveryMode::NonStreaming);
        assert_eq!(outcome.state.result.known_section_count(), 6);
    }

    #[tokio::test]
    async fn test_non_streaming_garbage_is_protocol_error() {
        let (outcome, _, _) = run_with(ScriptedBackend::non_streaming("no json here")).await;
        assert!(matches!(outcome, Err(AppError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_prefer_non_streaming_skips_stream() {
        let backend = Arc::new(ScriptedBackend::non_streaming(&whole_reply()));
        let fetcher = AnalysisFetcher::new(backend.clone(), "m");
        let inputs = AnalysisInputs::new("Chef", "Physics").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = fetcher.run(&inputs, false, &tx).await.unwrap();
        assert_eq!(outcome.mode, DeliveryMode::NonStreaming);
        assert_eq!(
            outcome.non_streaming_cause,
            Some(NonStreamingCause::Requested)
        );
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_whole_result_requires_braces_and_sections() {
        assert!(parse_whole_result("```json\n{\"essence\": {\"summary\": \"s\"}}\n```").is_some());
        assert!(parse_whole_result("{\"unrelated\": 1}").is_none());
        assert!(parse_whole_result("prefix {\"essence\": {}}").is_none());
    }
}
