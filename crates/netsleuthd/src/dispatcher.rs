//! Action dispatcher.
//!
//! Executes validated operations against devices. Every submitted operation
//! yields exactly one `ActionResult`, in submission order, whatever happens
//! to its siblings.

use crate::cancel::CancelToken;
use crate::config::{CancelPolicy, DispatchConfig};
use crate::connectivity::ConnectivityProber;
use crate::orchestrator::device_executor::{DeviceExecutor, ExecutorError};
use crate::pool::{DevicePool, PoolError};
use crate::redact::{needs_redaction, redact};
use netsleuth_common::{ActionOutcome, ActionResult, CapabilityCatalog, OperationRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub operation_timeout: Duration,
    pub connectivity_fallback: bool,
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            connectivity_fallback: config.connectivity_fallback,
        }
    }
}

/// Results of one batch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<ActionResult>,
    /// Set when the batch was cut short by cancellation
    pub abandoned: Option<String>,
}

#[derive(Clone)]
pub struct ActionDispatcher {
    catalog: Arc<CapabilityCatalog>,
    executor: Arc<dyn DeviceExecutor>,
    prober: Arc<dyn ConnectivityProber>,
    pool: Arc<DevicePool>,
    settings: DispatchSettings,
}

impl ActionDispatcher {
    pub fn new(
        catalog: Arc<CapabilityCatalog>,
        executor: Arc<dyn DeviceExecutor>,
        prober: Arc<dyn ConnectivityProber>,
        pool: Arc<DevicePool>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            catalog,
            executor,
            prober,
            pool,
            settings,
        }
    }

    /// Run a batch to completion.
    pub async fn dispatch(&self, operations: &[OperationRequest]) -> Vec<ActionResult> {
        self.dispatch_batch(operations, CancelToken::never(), CancelPolicy::Drain, None)
            .await
            .results
    }

    /// Run a batch, fanned out one task per operation.
    ///
    /// With `CancelPolicy::Abandon`, cancellation or the deadline aborts the
    /// tasks still running and reports them as failed. With `Drain` the batch
    /// always runs to completion and the caller decides afterwards.
    pub async fn dispatch_batch(
        &self,
        operations: &[OperationRequest],
        mut cancel: CancelToken,
        policy: CancelPolicy,
        deadline: Option<Instant>,
    ) -> BatchOutcome {
        let total = operations.len();
        info!("Dispatching {} operation(s)", total);

        let (tx, mut rx) = mpsc::channel::<(usize, ActionResult)>(total.max(1));
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(total);

        for (index, op) in operations.iter().cloned().enumerate() {
            let this = self.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let result = this.dispatch_one(&op).await;
                let _ = tx.send((index, result)).await;
            }));
        }
        drop(tx);

        let mut slots: Vec<Option<ActionResult>> = vec![None; total];
        let mut received = 0;
        let mut abandoned = None;

        let deadline_sleep = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        while received < total {
            if policy == CancelPolicy::Abandon {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some((index, result)) => {
                            slots[index] = Some(result);
                            received += 1;
                        }
                        None => break,
                    },
                    reason = cancel.cancelled() => {
                        abandoned = Some(reason);
                        break;
                    }
                    _ = &mut deadline_sleep => {
                        abandoned = Some("session timeout".to_string());
                        break;
                    }
                }
            } else {
                match rx.recv().await {
                    Some((index, result)) => {
                        slots[index] = Some(result);
                        received += 1;
                    }
                    None => break,
                }
            }
        }

        if let Some(reason) = &abandoned {
            warn!("Abandoning {} in-flight operation(s): {}", total - received, reason);
            for handle in &handles {
                handle.abort();
            }
        }

        let results = slots
            .into_iter()
            .zip(operations)
            .map(|(slot, op)| {
                slot.unwrap_or_else(|| {
                    let reason = match &abandoned {
                        Some(reason) => format!("abandoned: {}", reason),
                        None => "operation task ended without a result".to_string(),
                    };
                    ActionResult::failed(&op.operation_id, &op.target, &self.command_for(op), reason)
                })
            })
            .collect();

        BatchOutcome { results, abandoned }
    }

    fn command_for(&self, op: &OperationRequest) -> String {
        self.catalog
            .get(&op.operation_id)
            .and_then(|entry| entry.render(&op.params).ok())
            .unwrap_or_default()
    }

    /// Execute a single operation. Never fails; errors become outcomes.
    pub async fn dispatch_one(&self, op: &OperationRequest) -> ActionResult {
        let Some(entry) = self.catalog.get(&op.operation_id) else {
            return ActionResult::failed(&op.operation_id, &op.target, "", "operation not in catalog");
        };
        let command = match entry.render(&op.params) {
            Ok(command) => command,
            Err(e) => return ActionResult::failed(&op.operation_id, &op.target, "", e.to_string()),
        };

        // The timeout covers waiting for a lease as well as the command itself
        let timeout = self.settings.operation_timeout;
        let executed = tokio::time::timeout(timeout, async {
            let lease = self.pool.acquire(&op.target).await?;
            debug!("Running '{}' on {}", command, lease.device());
            Ok::<_, PoolError>(self.executor.execute(&op.target, &command).await)
        })
        .await;

        let outcome = match executed {
            Err(_) => {
                warn!("{} @ {} timed out", op.operation_id, op.target);
                ActionOutcome::Failed {
                    error: format!("timed out after {}s", timeout.as_secs_f64()),
                }
            }
            Ok(Err(e)) => ActionOutcome::Failed { error: e.to_string() },
            Ok(Ok(Ok(output))) => {
                let text = if needs_redaction(&output) {
                    debug!("Redacting secrets in {} output from {}", op.operation_id, op.target);
                    redact(&output)
                } else {
                    output
                };
                debug!("{} @ {} output:\n{}", op.operation_id, op.target, text);
                if entry.parser.is_none() {
                    ActionOutcome::Raw { text }
                } else {
                    match entry.parser.parse(&text) {
                        Some(data) => ActionOutcome::Parsed { data },
                        None => {
                            debug!(
                                "{} parser could not parse {} output, keeping raw text",
                                entry.parser, op.operation_id
                            );
                            ActionOutcome::Raw { text }
                        }
                    }
                }
            }
            Ok(Ok(Err(err @ ExecutorError::Connection { .. }))) => {
                let error = redact(&err.to_string());
                if self.settings.connectivity_fallback {
                    info!("Connection to {} failed, running connectivity probe", op.target);
                    let mut probe = self.prober.probe(&op.target).await;
                    probe.connection_error = Some(error);
                    ActionOutcome::ConnectivityFallback { probe }
                } else {
                    ActionOutcome::Failed { error }
                }
            }
            Ok(Ok(Err(err))) => {
                warn!("{} @ {} failed: {}", op.operation_id, op.target, err);
                ActionOutcome::Failed {
                    error: redact(&err.to_string()),
                }
            }
        };

        ActionResult::new(&op.operation_id, &op.target, &command, outcome)
    }
}
