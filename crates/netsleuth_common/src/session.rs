//! Session state: one troubleshooting attempt and its iteration history.

use crate::action::ActionResult;
use crate::error::ValidationError;
use crate::intent::{AnalysisResult, Intent};
use crate::request::Request;
use serde::{Deserialize, Serialize};

/// Orchestration loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Init,
    Planning,
    Validating,
    Correcting,
    Dispatching,
    Consolidating,
    Finalizing,
    Done,
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Planning => "PLANNING",
            Self::Validating => "VALIDATING",
            Self::Correcting => "CORRECTING",
            Self::Dispatching => "DISPATCHING",
            Self::Consolidating => "CONSOLIDATING",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Completed,
    BudgetExceeded,
    ValidationExhausted,
    EngineUnavailable,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::BudgetExceeded => "budget_exceeded",
            Self::ValidationExhausted => "validation_exhausted",
            Self::EngineUnavailable => "engine_unavailable",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One plan -> validate -> dispatch -> consolidate cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based
    pub index: u32,
    /// Accepted intent; absent when every attempt was rejected
    pub intent: Option<Intent>,
    pub validation_errors: Vec<ValidationError>,
    pub correction_attempts: u32,
    pub action_results: Vec<ActionResult>,
    pub consolidated_summary: String,
}

/// A troubleshooting session. History is append-only.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    request: Request,
    history: Vec<IterationRecord>,
    status: SessionStatus,
    status_detail: Option<String>,
    states: Vec<LoopState>,
    analysis: Option<AnalysisResult>,
    clarification: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>, request: Request) -> Self {
        Self {
            id: id.into(),
            request,
            history: Vec::new(),
            status: SessionStatus::Running,
            status_detail: None,
            states: Vec::new(),
            analysis: None,
            clarification: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn iteration_count(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn status_detail(&self) -> Option<&str> {
        self.status_detail.as_deref()
    }

    /// States traversed so far, in order
    pub fn states(&self) -> &[LoopState] {
        &self.states
    }

    pub fn current_state(&self) -> Option<LoopState> {
        self.states.last().copied()
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn clarification(&self) -> Option<&str> {
        self.clarification.as_deref()
    }

    pub fn enter(&mut self, state: LoopState) {
        self.states.push(state);
    }

    /// Append an iteration. The index is assigned here so it always matches
    /// the position in history.
    pub fn push_iteration(&mut self, mut record: IterationRecord) -> u32 {
        record.index = self.history.len() as u32 + 1;
        let index = record.index;
        self.history.push(record);
        index
    }

    pub fn complete_with_analysis(&mut self, analysis: AnalysisResult) {
        self.analysis = Some(analysis);
        self.status = SessionStatus::Completed;
    }

    pub fn complete_with_clarification(&mut self, question: String) {
        self.clarification = Some(question);
        self.status = SessionStatus::Completed;
    }

    /// Budget exhaustion still yields a valid, inconclusive result.
    pub fn budget_exceeded(&mut self, max_iterations: u32) {
        self.analysis = Some(AnalysisResult::inconclusive(max_iterations));
        self.status = SessionStatus::BudgetExceeded;
        self.status_detail = Some(format!(
            "iteration budget of {} exhausted without analysis",
            max_iterations
        ));
    }

    pub fn terminate(&mut self, status: SessionStatus, detail: impl Into<String>) {
        self.status = status;
        self.status_detail = Some(detail.into());
    }

    /// Every validation error recorded across the session, oldest first
    pub fn validation_errors(&self) -> impl Iterator<Item = (u32, &ValidationError)> {
        self.history
            .iter()
            .flat_map(|it| it.validation_errors.iter().map(move |e| (it.index, e)))
    }

    pub fn action_results(&self) -> impl Iterator<Item = (u32, &ActionResult)> {
        self.history
            .iter()
            .flat_map(|it| it.action_results.iter().map(move |r| (it.index, r)))
    }
}
