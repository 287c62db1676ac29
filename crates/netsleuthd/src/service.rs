//! Troubleshooting service: the three entry points.
//!
//! Owns the shared read-only catalog and the collaborators. Every session
//! runs as its own tokio task inside a `session` span; sessions share
//! nothing mutable except the device pool's permits.

use crate::cancel::{CancelHandle, CancelToken};
use crate::config::{Config, ConfigError};
use crate::connectivity::{ConnectivityProber, SystemConnectivityProber};
use crate::dispatcher::{ActionDispatcher, DispatchSettings};
use crate::orchestrator::{
    DeviceExecutor, HttpReasoningEngine, LoopSettings, OrchestrationLoop, ReasoningEngine,
    SshDeviceExecutor,
};
use crate::pool::DevicePool;
use anyhow::Result;
use netsleuth_common::{
    AlarmDetails, Attachment, CapabilityCatalog, CatalogSnapshot, ChatMessage, Report, Request,
    Session, SessionStatus, TargetScope,
};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct TroubleshootingService {
    config: Config,
    /// Catalog, or the configuration problem that prevents sessions
    catalog: Result<Arc<CapabilityCatalog>, ConfigError>,
    engine: Arc<dyn ReasoningEngine>,
    executor: Arc<dyn DeviceExecutor>,
    prober: Arc<dyn ConnectivityProber>,
    pool: Arc<DevicePool>,
}

impl TroubleshootingService {
    /// Build with explicit collaborators. An invalid configuration does not
    /// fail here; every session then reports it as `Failed`.
    pub fn new(
        config: Config,
        engine: Arc<dyn ReasoningEngine>,
        executor: Arc<dyn DeviceExecutor>,
        prober: Arc<dyn ConnectivityProber>,
    ) -> Self {
        let catalog = config
            .validate()
            .and_then(|_| config.catalog())
            .map(Arc::new);
        if let Err(e) = &catalog {
            warn!("Configuration error: {}", e);
        }
        let pool = Arc::new(DevicePool::new(
            config.dispatch.device_pool_size,
            config.dispatch.max_sessions_per_device,
        ));
        debug!(
            "Device pool: {} lease(s), {} per device",
            pool.size(),
            config.dispatch.max_sessions_per_device
        );

        Self {
            config,
            catalog,
            engine,
            executor,
            prober,
            pool,
        }
    }

    /// Production collaborators: HTTP engine, ssh executor, system prober
    pub fn from_config(config: Config) -> Result<Self> {
        let engine = Arc::new(HttpReasoningEngine::new(config.engine.clone())?);
        let executor = Arc::new(SshDeviceExecutor::new(config.ssh.clone()));
        let prober = Arc::new(SystemConnectivityProber::new(
            config.dispatch.ping_timeout(),
            config.dispatch.dns_timeout(),
        ));
        Ok(Self::new(config, engine, executor, prober))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn process_alarm(&self, alarm_details: AlarmDetails, target_scope: TargetScope) -> Report {
        self.process(
            Request::Alarm {
                alarm_details,
                target_scope,
            },
            CancelToken::never(),
        )
        .await
    }

    pub async fn process_alarm_with_cancel(
        &self,
        alarm_details: AlarmDetails,
        target_scope: TargetScope,
        cancel: &CancelHandle,
    ) -> Report {
        self.process(
            Request::Alarm {
                alarm_details,
                target_scope,
            },
            cancel.token(),
        )
        .await
    }

    pub async fn process_user_query(
        &self,
        query: &str,
        target_scope: TargetScope,
        chat_history: Vec<ChatMessage>,
        attachments: Vec<Attachment>,
    ) -> Report {
        self.process(
            Request::Query {
                query: query.to_string(),
                target_scope,
                chat_history,
                attachments,
            },
            CancelToken::never(),
        )
        .await
    }

    pub async fn process_user_query_with_cancel(
        &self,
        query: &str,
        target_scope: TargetScope,
        chat_history: Vec<ChatMessage>,
        attachments: Vec<Attachment>,
        cancel: &CancelHandle,
    ) -> Report {
        self.process(
            Request::Query {
                query: query.to_string(),
                target_scope,
                chat_history,
                attachments,
            },
            cancel.token(),
        )
        .await
    }

    pub fn get_supported_capabilities(&self) -> Result<CatalogSnapshot, ConfigError> {
        match &self.catalog {
            Ok(catalog) => Ok(catalog.snapshot()),
            Err(e) => Err(e.clone()),
        }
    }

    /// Run one session to completion. Always returns a report.
    pub async fn process(&self, request: Request, cancel: CancelToken) -> Report {
        let catalog = match &self.catalog {
            Ok(catalog) => catalog.clone(),
            Err(e) => {
                return Report::rejected(
                    request,
                    SessionStatus::Failed,
                    format!("configuration error: {}", e),
                );
            }
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("session", id = %session_id);

        let dispatcher = ActionDispatcher::new(
            catalog.clone(),
            self.executor.clone(),
            self.prober.clone(),
            self.pool.clone(),
            DispatchSettings::from(&self.config.dispatch),
        );
        let orchestration = OrchestrationLoop::new(
            catalog,
            self.engine.clone(),
            dispatcher,
            LoopSettings::from(&self.config),
            cancel,
        );

        let started = chrono::Utc::now();
        let mut session = Session::new(session_id, request.clone());
        let task = tokio::spawn(
            async move {
                info!("Accepted at {}", started.to_rfc3339());
                orchestration.run(&mut session).await;
                session
            }
            .instrument(span),
        );

        match task.await {
            Ok(session) => Report::assemble(&session),
            Err(e) => {
                error!("Session task failed: {}", e);
                Report::rejected(request, SessionStatus::Failed, format!("session task failed: {}", e))
            }
        }
    }
}
