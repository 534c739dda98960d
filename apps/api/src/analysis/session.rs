//! In-memory per-session state: the presentation side of an analysis.
//!
//! Exactly one request per session is authoritative. `begin` bumps the
//! generation; every later mutation carries a `Ticket` and is dropped when its
//! generation is no longer current.
//!
//! Sessions live in a bounded cache. One left idle past its TTL, or pushed out
//! by the capacity limit, is gone and reads as not found.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::analysis::fetcher::{AnalysisEvent, DeliveryMode};
use crate::analysis::models::{AnalysisResult, AnalysisState, Phase, RevealState};
use crate::analysis::request::AnalysisInputs;
use crate::config::ProviderKind;
use crate::errors::AppError;

/// Proof of which request a mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub session_id: Uuid,
    pub generation: u64,
}

/// Diagnostic recorded when a request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionError {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for SessionError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.user_message(),
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    generation: u64,
    inputs: Option<AnalysisInputs>,
    provider: Option<ProviderKind>,
    state: AnalysisState,
    phase: Phase,
    mode: Option<DeliveryMode>,
    error: Option<SessionError>,
    updated_at: Option<DateTime<Utc>>,
}

/// Read-only copy of a session, as served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub generation: u64,
    pub phase: Phase,
    /// True once the request reached `done` or `failed`.
    pub finished: bool,
    pub inputs: Option<AnalysisInputs>,
    pub provider: Option<ProviderKind>,
    pub mode: Option<DeliveryMode>,
    pub reveal: RevealState,
    pub result: AnalysisResult,
    pub error: Option<SessionError>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_SESSION_CAPACITY: u64 = 10_000;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

pub struct SessionStore {
    sessions: Cache<Uuid, Arc<Mutex<Session>>>,
    /// Store-wide, so a session recreated after eviction never reuses a
    /// generation an old ticket still holds.
    generations: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_CAPACITY, DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `capacity` sessions; each expires after `ttl` without access.
    pub fn with_limits(capacity: u64, ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(ttl)
                .build(),
            generations: AtomicU64::new(0),
        }
    }

    /// Starts a new request for `session_id` (or a new session when `None`).
    /// Clears result, reveal flags and error; the phase becomes `validating`.
    pub fn begin(&self, session_id: Option<Uuid>) -> Ticket {
        let session_id = session_id.unwrap_or_else(Uuid::new_v4);
        let entry = self
            .sessions
            .get_with(session_id, || Arc::new(Mutex::new(Session::default())));
        let mut session = lock(&entry);
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        *session = Session {
            generation,
            phase: Phase::Validating,
            updated_at: Some(Utc::now()),
            ..Session::default()
        };
        debug!("Session {session_id} starting generation {generation}");
        Ticket {
            session_id,
            generation,
        }
    }

    /// Runs `f` on the session only when `ticket` is still current.
    fn with_current<F>(&self, ticket: &Ticket, f: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let Some(entry) = self.sessions.get(&ticket.session_id) else {
            debug!("Dropping update for expired session {}", ticket.session_id);
            return false;
        };
        let mut session = lock(&entry);
        if session.generation != ticket.generation {
            debug!(
                "Dropping stale update for session {} (generation {} < {})",
                ticket.session_id, ticket.generation, session.generation
            );
            return false;
        }
        f(&mut *session);
        session.updated_at = Some(Utc::now());
        true
    }

    /// Records the validated inputs and provider of the current request.
    pub fn start(&self, ticket: &Ticket, inputs: AnalysisInputs, provider: ProviderKind) -> bool {
        self.with_current(ticket, |session| {
            session.inputs = Some(inputs);
            session.provider = Some(provider);
        })
    }

    /// Applies one fetcher event. Returns false when the ticket is stale.
    pub fn apply(&self, ticket: &Ticket, event: &AnalysisEvent) -> bool {
        self.with_current(ticket, |session| match event {
            AnalysisEvent::Phase(phase) => session.phase = *phase,
            AnalysisEvent::Section { section, data } => {
                session.state.apply_section(section, data.clone());
            }
            AnalysisEvent::Whole(result) => session.state.apply_whole(result.clone()),
        })
    }

    /// Installs the final state of a successful request.
    pub fn complete(&self, ticket: &Ticket, state: AnalysisState, mode: DeliveryMode) -> bool {
        self.with_current(ticket, |session| {
            session.state = state;
            session.mode = Some(mode);
            session.phase = Phase::Done;
        })
    }

    /// Marks the current request failed. Sections already revealed stay.
    pub fn fail(&self, ticket: &Ticket, err: &AppError) -> bool {
        self.with_current(ticket, |session| {
            session.phase = Phase::Failed;
            session.error = Some(SessionError::from(err));
        })
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.sessions
            .get(&ticket.session_id)
            .is_some_and(|entry| lock(&entry).generation == ticket.generation)
    }

    pub fn snapshot(&self, session_id: Uuid) -> Option<SessionSnapshot> {
        let entry = self.sessions.get(&session_id)?;
        let session = lock(&entry);
        Some(SessionSnapshot {
            session_id,
            generation: session.generation,
            phase: session.phase,
            finished: session.phase.is_terminal(),
            inputs: session.inputs.clone(),
            provider: session.provider,
            mode: session.mode,
            reveal: session.state.reveal,
            result: session.state.result.clone(),
            error: session.error.clone(),
            updated_at: session.updated_at,
        })
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
