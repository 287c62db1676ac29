//! netsleuth daemon library.
//!
//! Turns an alarm or an operator question into a bounded, auditable run of
//! read-only device operations driven by a reasoning engine, and returns a
//! structured report.

pub mod cancel;
pub mod config;
pub mod connectivity;
pub mod consolidator;
pub mod dispatcher;
pub mod orchestrator;
pub mod pool;
pub mod redact;
pub mod service;
pub mod validator;

pub use cancel::{CancelHandle, CancelToken};
pub use config::{CancelPolicy, Config, ConfigError};
pub use connectivity::{ConnectivityProber, FakeConnectivityProber, SystemConnectivityProber};
pub use consolidator::{consolidate, ConsolidatedContext};
pub use dispatcher::{ActionDispatcher, BatchOutcome, DispatchSettings};
pub use orchestrator::{
    DeviceExecutor, EngineError, ExecutorError, FakeDeviceExecutor, FakeReasoningEngine,
    HttpReasoningEngine, LoopSettings, OrchestrationLoop, ReasoningEngine, SshDeviceExecutor,
};
pub use pool::{DeviceLease, DevicePool};
pub use service::TroubleshootingService;
pub use validator::{IntentValidator, ValidatedIntent};
