//! Device Executor Trait Abstraction
//!
//! The dispatcher talks to devices only through `DeviceExecutor`:
//! a command and a target go in, output or an error comes out.
//!
//! Production code uses `SshDeviceExecutor`, which shells out to the system
//! `ssh` binary. Test code uses `FakeDeviceExecutor` with pre-configured
//! responses, so no test ever opens a connection.

use crate::config::SshConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    /// Could not reach or log into the device
    #[error("connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    /// Connected, but the command failed
    #[error("command '{command}' failed on {target}: {reason}")]
    Command {
        target: String,
        command: String,
        reason: String,
    },
}

impl ExecutorError {
    pub fn connection(target: &str, reason: impl Into<String>) -> Self {
        Self::Connection {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    pub fn command(target: &str, command: &str, reason: impl Into<String>) -> Self {
        Self::Command {
            target: target.to_string(),
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

// ============================================================================
// Device Executor Trait
// ============================================================================

#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    /// Run one read-only command on one device and return its output
    async fn execute(&self, target: &str, command: &str) -> Result<String, ExecutorError>;
}

// ============================================================================
// SSH Device Executor (Production)
// ============================================================================

/// Runs commands over the system ssh client.
///
/// Authentication is whatever ssh is configured for (agent, keys,
/// ~/.ssh/config); BatchMode makes ssh fail instead of prompting. A control
/// master per device keeps the connection open between operations.
pub struct SshDeviceExecutor {
    config: SshConfig,
}

impl SshDeviceExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, target: &str, command: &str) -> Command {
        let control_path = self.config.control_dir.join("%C");

        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs))
            .arg("-o")
            .arg("ControlMaster=auto")
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-o")
            .arg(format!("ControlPersist={}", self.config.control_persist_secs));

        if let Some(port) = self.config.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(user) = &self.config.user {
            cmd.arg("-l").arg(user);
        }

        cmd.arg(target).arg(command);
        cmd.stdin(std::process::Stdio::null());
        // A timed-out or abandoned operation must not leave ssh running
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl DeviceExecutor for SshDeviceExecutor {
    async fn execute(&self, target: &str, command: &str) -> Result<String, ExecutorError> {
        tokio::fs::create_dir_all(&self.config.control_dir)
            .await
            .map_err(|e| ExecutorError::connection(target, format!("control dir: {}", e)))?;

        debug!("ssh {} '{}'", target, command);

        let output = self
            .build_command(target, command)
            .output()
            .await
            .map_err(|e| ExecutorError::connection(target, format!("failed to spawn ssh: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
            Some(SSH_CONNECTION_FAILURE) => Err(ExecutorError::connection(target, stderr)),
            Some(code) => Err(ExecutorError::command(
                target,
                command,
                format!("exit code {}: {}", code, stderr),
            )),
            None => Err(ExecutorError::command(target, command, "terminated by signal")),
        }
    }
}

// ============================================================================
// Fake Device Executor (Testing)
// ============================================================================

#[derive(Debug, Clone)]
enum FakeReply {
    Output(String),
    Error(ExecutorError),
}

/// Fake executor for deterministic testing.
///
/// ## Example
///
/// ```rust,ignore
/// let fake = FakeDeviceExecutor::builder()
///     .respond("core-router-1", "show version", "IOS 15.2")
///     .unreachable("sw-42")
///     .build();
/// ```
pub struct FakeDeviceExecutor {
    /// (target, command) -> reply
    replies: HashMap<(String, String), FakeReply>,
    /// target -> reply for any command
    device_replies: HashMap<String, FakeReply>,
    delays: HashMap<String, Duration>,
    call_counts: Arc<Mutex<HashMap<(String, String), usize>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDeviceExecutor {
    pub fn builder() -> FakeDeviceExecutorBuilder {
        FakeDeviceExecutorBuilder::default()
    }

    /// Calls for one (target, command)
    pub fn call_count(&self, target: &str, command: &str) -> usize {
        self.call_counts
            .lock()
            .unwrap()
            .get(&(target.to_string(), command.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.call_counts.lock().unwrap().values().sum()
    }

    /// Highest number of concurrent `execute` calls seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceExecutor for FakeDeviceExecutor {
    async fn execute(&self, target: &str, command: &str) -> Result<String, ExecutorError> {
        {
            let mut counts = self.call_counts.lock().unwrap();
            *counts
                .entry((target.to_string(), command.to_string()))
                .or_insert(0) += 1;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(target) {
            tokio::time::sleep(*delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .replies
            .get(&(target.to_string(), command.to_string()))
            .or_else(|| self.device_replies.get(target));

        match reply {
            Some(FakeReply::Output(text)) => Ok(text.clone()),
            Some(FakeReply::Error(err)) => Err(err.clone()),
            None => Err(ExecutorError::command(target, command, "no scripted response")),
        }
    }
}

#[derive(Default)]
pub struct FakeDeviceExecutorBuilder {
    replies: HashMap<(String, String), FakeReply>,
    device_replies: HashMap<String, FakeReply>,
    delays: HashMap<String, Duration>,
}

impl FakeDeviceExecutorBuilder {
    pub fn respond(mut self, target: &str, command: &str, output: &str) -> Self {
        self.replies.insert(
            (target.to_string(), command.to_string()),
            FakeReply::Output(output.to_string()),
        );
        self
    }

    /// Same output for every command on `target`
    pub fn respond_any(mut self, target: &str, output: &str) -> Self {
        self.device_replies
            .insert(target.to_string(), FakeReply::Output(output.to_string()));
        self
    }

    /// Every command on `target` fails to connect
    pub fn unreachable(mut self, target: &str) -> Self {
        self.device_replies.insert(
            target.to_string(),
            FakeReply::Error(ExecutorError::connection(target, "Connection timed out")),
        );
        self
    }

    pub fn command_error(mut self, target: &str, command: &str, reason: &str) -> Self {
        self.replies.insert(
            (target.to_string(), command.to_string()),
            FakeReply::Error(ExecutorError::command(target, command, reason)),
        );
        self
    }

    /// Sleep before answering for `target`
    pub fn delay(mut self, target: &str, delay: Duration) -> Self {
        self.delays.insert(target.to_string(), delay);
        self
    }

    pub fn build(self) -> FakeDeviceExecutor {
        FakeDeviceExecutor {
            replies: self.replies,
            device_replies: self.device_replies,
            delays: self.delays,
            call_counts: Arc::new(Mutex::new(HashMap::new())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_responses() {
        let fake = FakeDeviceExecutor::builder()
            .respond("r1", "show version", "IOS 15.2")
            .unreachable("sw-42")
            .build();

        assert_eq!(fake.execute("r1", "show version").await.unwrap(), "IOS 15.2");
        assert!(fake.execute("sw-42", "show version").await.unwrap_err().is_connection());
        let err = fake.execute("r1", "show logging").await.unwrap_err();
        assert!(!err.is_connection());

        assert_eq!(fake.call_count("r1", "show version"), 1);
        assert_eq!(fake.total_calls(), 3);
    }

    #[test]
    fn test_ssh_command_line() {
        let executor = SshDeviceExecutor::new(SshConfig {
            user: Some("netops".to_string()),
            port: Some(2222),
            connect_timeout_secs: 5,
            control_persist_secs: 30,
            control_dir: std::path::PathBuf::from("/tmp/ns"),
        });
        let cmd = executor.build_command("r1", "show version");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ControlPath=/tmp/ns/%C".to_string()));
        assert!(args.contains(&"ControlPersist=30".to_string()));
        assert_eq!(&args[args.len() - 2..], &["r1".to_string(), "show version".to_string()]);
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
    }

    #[test]
    fn test_error_display() {
        let err = ExecutorError::connection("sw-42", "Connection timed out");
        assert_eq!(err.to_string(), "connection to sw-42 failed: Connection timed out");
    }
}
