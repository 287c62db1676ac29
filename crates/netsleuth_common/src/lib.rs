//! netsleuth common - shared types for the troubleshooting daemon.
//!
//! Everything here is plain data or a pure function over plain data:
//! requests, the capability catalog, reasoning-engine intents, action
//! results, session history and the final report.

pub mod action;
pub mod catalog;
pub mod error;
pub mod intent;
pub mod parsers;
pub mod report;
pub mod request;
pub mod session;

pub use action::{ActionOutcome, ActionResult, ConnectivityProbeResult};
pub use catalog::{
    CapabilityCatalog, CapabilityEntry, CatalogError, CatalogSnapshot, ParamSpec, RiskClass,
};
pub use error::{ValidationError, ValidationErrorKind};
pub use intent::{AnalysisResult, Intent, OperationRequest, INTENT_SCHEMA};
pub use parsers::ParserStrategy;
pub use report::{ConnectivityRecord, OperationRecord, Report, ValidationRecord};
pub use request::{AlarmDetails, Attachment, ChatMessage, ChatRole, Request, TargetScope};
pub use session::{IterationRecord, LoopState, Session, SessionStatus};
