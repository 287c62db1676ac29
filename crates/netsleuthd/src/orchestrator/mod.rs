//! Troubleshooting orchestration.
//!
//! Flow per iteration:
//! 1. Ask the reasoning engine for an intent
//! 2. Validate it against the catalog and scope (correct up to N times)
//! 3. Dispatch validated operations to devices
//! 4. Consolidate results into the next prompt's context

pub mod device_executor;
pub mod engine;
pub mod prompts;
pub mod reasoning;

pub use device_executor::{
    DeviceExecutor, ExecutorError, FakeDeviceExecutor, FakeDeviceExecutorBuilder, SshDeviceExecutor,
};
pub use engine::{LoopSettings, OrchestrationLoop};
pub use reasoning::{EngineError, FakeReasoningEngine, HttpReasoningEngine, ReasoningEngine};
