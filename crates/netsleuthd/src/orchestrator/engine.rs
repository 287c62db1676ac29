//! Orchestration Loop
//!
//! INIT -> PLANNING -> VALIDATING -> (CORRECTING)* -> DISPATCHING ->
//! CONSOLIDATING -> {PLANNING | FINALIZING} -> DONE | FAILED
//!
//! Invariants:
//! - At most `max_iterations` iterations; reaching it is BudgetExceeded
//! - At most 1 + `correction_retries` engine replies validated per iteration
//! - Nothing reaches the dispatcher without passing the validator
//! - Cancellation and the session deadline are checked at every transition

use super::prompts::{self, PlanningInput};
use super::reasoning::{EngineError, ReasoningEngine};
use crate::cancel::CancelToken;
use crate::config::{CancelPolicy, Config};
use crate::consolidator::consolidate;
use crate::dispatcher::ActionDispatcher;
use crate::validator::{IntentValidator, ValidatedIntent};
use netsleuth_common::{
    CapabilityCatalog, Intent, INTENT_SCHEMA, IterationRecord, LoopState, Session, SessionStatus,
    ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Budgets and retry policy for one session
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub correction_retries: u32,
    pub context_budget_chars: usize,
    pub max_operations: usize,
    pub engine_retries: u32,
    pub engine_backoff: Duration,
    pub session_timeout: Duration,
    pub cancel_policy: CancelPolicy,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_iterations: config.session.max_iterations,
            correction_retries: config.session.correction_retries,
            context_budget_chars: config.session.context_budget_chars,
            max_operations: config.session.max_operations_per_request,
            engine_retries: config.engine.retries,
            engine_backoff: Duration::from_millis(config.engine.backoff_ms),
            session_timeout: config.session.session_timeout(),
            cancel_policy: config.session.cancel_policy,
        }
    }
}

/// Why the engine produced no usable reply
enum PlanError {
    /// Transport failures exhausted the retries
    Unavailable(EngineError),
    /// The engine answered with something that is not JSON
    Invalid(EngineError),
}

/// Why a session stopped early
enum Halt {
    Cancelled(String),
    EngineUnavailable(EngineError),
    ValidationExhausted(u32),
}

pub struct OrchestrationLoop {
    catalog: Arc<CapabilityCatalog>,
    engine: Arc<dyn ReasoningEngine>,
    dispatcher: ActionDispatcher,
    settings: LoopSettings,
    cancel: CancelToken,
}

impl OrchestrationLoop {
    pub fn new(
        catalog: Arc<CapabilityCatalog>,
        engine: Arc<dyn ReasoningEngine>,
        dispatcher: ActionDispatcher,
        settings: LoopSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            catalog,
            engine,
            dispatcher,
            settings,
            cancel,
        }
    }

    /// Drive `session` to a terminal state.
    pub async fn run(&self, session: &mut Session) {
        // A timeout too large to represent means no deadline
        let deadline = Instant::now().checked_add(self.settings.session_timeout);
        session.enter(LoopState::Init);
        info!(
            "Session started: {} '{}' ({} device(s) in scope)",
            session.request().kind(),
            session.request().headline(),
            session.request().target_scope().devices.len()
        );

        match self.iterate(session, deadline).await {
            Ok(()) => {
                info!(
                    "Session finished: {} after {} iteration(s)",
                    session.status(),
                    session.iteration_count()
                );
            }
            Err(Halt::Cancelled(reason)) => {
                warn!("Session cancelled: {}", reason);
                session.terminate(SessionStatus::Cancelled, reason);
                session.enter(LoopState::Failed);
            }
            Err(Halt::EngineUnavailable(e)) => {
                warn!("Reasoning engine unavailable: {}", e);
                session.terminate(
                    SessionStatus::EngineUnavailable,
                    format!(
                        "reasoning engine unavailable after {} attempt(s): {}",
                        self.settings.engine_retries + 1,
                        e
                    ),
                );
                session.enter(LoopState::Failed);
            }
            Err(Halt::ValidationExhausted(attempts)) => {
                warn!("Validation exhausted after {} attempt(s)", attempts);
                session.terminate(
                    SessionStatus::ValidationExhausted,
                    format!(
                        "engine output rejected {} time(s) in iteration {}",
                        attempts,
                        session.iteration_count()
                    ),
                );
                session.enter(LoopState::Failed);
            }
        }

        debug_assert!(session.status().is_terminal());
        debug_assert!(session.current_state().is_some_and(|s| s.is_terminal()));
    }

    fn check_interrupt(&self, deadline: Option<Instant>) -> Result<(), Halt> {
        if let Some(reason) = self.cancel.reason() {
            return Err(Halt::Cancelled(reason));
        }
        if deadline.is_some_and(|at| Instant::now() >= at) {
            return Err(Halt::Cancelled("session timeout".to_string()));
        }
        Ok(())
    }

    async fn iterate(&self, session: &mut Session, deadline: Option<Instant>) -> Result<(), Halt> {
        let system_prompt = prompts::system_prompt(&self.catalog, session.request());
        let mut context = String::new();

        loop {
            self.check_interrupt(deadline)?;
            session.enter(LoopState::Planning);

            let iteration = session.iteration_count() + 1;
            let (validated, rejected, corrections) = self
                .plan_and_validate(session, &system_prompt, &context, iteration, deadline)
                .await?;

            let Some(validated) = validated else {
                session.push_iteration(IterationRecord {
                    index: iteration,
                    intent: None,
                    validation_errors: rejected,
                    correction_attempts: corrections,
                    action_results: Vec::new(),
                    consolidated_summary: context.clone(),
                });
                return Err(Halt::ValidationExhausted(corrections + 1));
            };

            let intent = validated.into_intent();
            info!("Iteration {}: engine chose {}", iteration, intent.kind());

            match &intent {
                Intent::DataRequest { operations, .. } => {
                    self.check_interrupt(deadline)?;
                    session.enter(LoopState::Dispatching);
                    let batch = self
                        .dispatcher
                        .dispatch_batch(
                            operations,
                            self.cancel.clone(),
                            self.settings.cancel_policy,
                            deadline,
                        )
                        .await;

                    session.enter(LoopState::Consolidating);
                    let consolidated =
                        consolidate(session.history(), &batch.results, self.settings.context_budget_chars);
                    if consolidated.elided > 0 {
                        debug!(
                            "Consolidated context: {} chars, {} payload(s) summarized",
                            consolidated.text.len(),
                            consolidated.elided
                        );
                    }
                    context = consolidated.text;

                    session.push_iteration(IterationRecord {
                        index: iteration,
                        intent: Some(intent.clone()),
                        validation_errors: rejected,
                        correction_attempts: corrections,
                        action_results: batch.results,
                        consolidated_summary: context.clone(),
                    });

                    if let Some(reason) = batch.abandoned {
                        return Err(Halt::Cancelled(reason));
                    }

                    if session.iteration_count() >= self.settings.max_iterations {
                        info!(
                            "Iteration budget of {} reached without analysis",
                            self.settings.max_iterations
                        );
                        session.enter(LoopState::Finalizing);
                        session.budget_exceeded(self.settings.max_iterations);
                        session.enter(LoopState::Done);
                        return Ok(());
                    }
                }
                Intent::Analysis(analysis) => {
                    session.push_iteration(IterationRecord {
                        index: iteration,
                        intent: Some(intent.clone()),
                        validation_errors: rejected,
                        correction_attempts: corrections,
                        action_results: Vec::new(),
                        consolidated_summary: context.clone(),
                    });
                    session.enter(LoopState::Finalizing);
                    session.complete_with_analysis(analysis.clone());
                    session.enter(LoopState::Done);
                    return Ok(());
                }
                Intent::Clarification { question } => {
                    session.push_iteration(IterationRecord {
                        index: iteration,
                        intent: Some(intent.clone()),
                        validation_errors: rejected,
                        correction_attempts: corrections,
                        action_results: Vec::new(),
                        consolidated_summary: context.clone(),
                    });
                    session.enter(LoopState::Finalizing);
                    session.complete_with_clarification(question.clone());
                    session.enter(LoopState::Done);
                    return Ok(());
                }
            }
        }
    }

    /// PLANNING -> VALIDATING -> (CORRECTING -> VALIDATING)*
    ///
    /// Returns the accepted intent (if any), every rejected item of this
    /// iteration and the number of corrections used.
    async fn plan_and_validate(
        &self,
        session: &mut Session,
        system_prompt: &str,
        context: &str,
        iteration: u32,
        deadline: Option<Instant>,
    ) -> Result<(Option<ValidatedIntent>, Vec<ValidationError>, u32), Halt> {
        let scope = session.request().target_scope().clone();
        let validator = IntentValidator::new(&self.catalog, &scope, self.settings.max_operations);
        let mut rejected: Vec<ValidationError> = Vec::new();
        let mut last_errors: Vec<ValidationError> = Vec::new();
        let mut corrections = 0;

        loop {
            let user_prompt = prompts::user_prompt(&PlanningInput {
                request: session.request(),
                context,
                iteration,
                max_iterations: self.settings.max_iterations,
                corrections: &last_errors,
            });

            let reply = match self.call_engine(system_prompt, &user_prompt).await {
                Ok(raw) => Ok(raw),
                Err(PlanError::Unavailable(e)) => return Err(Halt::EngineUnavailable(e)),
                Err(PlanError::Invalid(e)) => Err(vec![ValidationError::malformed("$", e.to_string())]),
            };

            self.check_interrupt(deadline)?;
            session.enter(LoopState::Validating);

            match reply.and_then(|raw| validator.validate(&raw)) {
                Ok(validated) => return Ok((Some(validated), rejected, corrections)),
                Err(errors) => {
                    info!(
                        "Iteration {}: {} validation error(s) on attempt {}",
                        iteration,
                        errors.len(),
                        corrections + 1
                    );
                    for error in &errors {
                        debug!("  {}", error);
                    }
                    rejected.extend(errors.iter().cloned());
                    last_errors = errors;

                    if corrections >= self.settings.correction_retries {
                        return Ok((None, rejected, corrections));
                    }
                    corrections += 1;
                    self.check_interrupt(deadline)?;
                    session.enter(LoopState::Correcting);
                }
            }
        }
    }

    /// One engine call with bounded retry and exponential backoff
    async fn call_engine(&self, system_prompt: &str, user_prompt: &str) -> Result<serde_json::Value, PlanError> {
        let mut backoff = self.settings.engine_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.engine.call_json(system_prompt, user_prompt, INTENT_SCHEMA).await {
                Ok(raw) => return Ok(raw),
                Err(e) if !e.is_transport() => return Err(PlanError::Invalid(e)),
                Err(e) => {
                    if attempt > self.settings.engine_retries {
                        return Err(PlanError::Unavailable(e));
                    }
                    warn!(
                        "Engine call failed (attempt {}), retrying in {:?}: {}",
                        attempt, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }
}
