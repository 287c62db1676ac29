//! Connectivity fallback diagnostics.
//!
//! When a device connection fails the dispatcher asks a prober whether the
//! device answers ICMP and whether its name resolves. Both checks are best
//! effort and independently timed; a probe never returns an error.

use async_trait::async_trait;
use netsleuth_common::ConnectivityProbeResult;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

static PING_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").unwrap());

#[async_trait]
pub trait ConnectivityProber: Send + Sync {
    async fn probe(&self, target: &str) -> ConnectivityProbeResult;
}

/// ICMP via the system `ping` binary, DNS via the tokio resolver.
pub struct SystemConnectivityProber {
    ping_timeout: Duration,
    dns_timeout: Duration,
}

impl SystemConnectivityProber {
    pub fn new(ping_timeout: Duration, dns_timeout: Duration) -> Self {
        Self {
            ping_timeout,
            dns_timeout,
        }
    }

    async fn resolve(&self, target: &str) -> Option<Vec<String>> {
        let lookup = tokio::net::lookup_host((target, 0));
        match tokio::time::timeout(self.dns_timeout, lookup).await {
            Ok(Ok(addrs)) => {
                let mut out: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
                out.sort();
                out.dedup();
                Some(out)
            }
            Ok(Err(e)) => {
                debug!("DNS lookup for {} failed: {}", target, e);
                None
            }
            Err(_) => {
                debug!("DNS lookup for {} timed out", target);
                None
            }
        }
    }

    async fn ping(&self, target: &str) -> Option<f64> {
        let wait_secs = self.ping_timeout.as_secs().max(1);
        let mut cmd = Command::new("ping");
        cmd.arg("-c")
            .arg("1")
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg(target)
            .kill_on_drop(true);

        match tokio::time::timeout(self.ping_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                Some(parse_ping_latency(&stdout).unwrap_or(0.0))
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!("ping {} failed to run: {}", target, e);
                None
            }
            Err(_) => None,
        }
    }
}

#[async_trait]
impl ConnectivityProber for SystemConnectivityProber {
    async fn probe(&self, target: &str) -> ConnectivityProbeResult {
        let (addresses, latency) = tokio::join!(self.resolve(target), self.ping(target));

        ConnectivityProbeResult {
            reachable: latency.is_some(),
            latency_ms: latency,
            dns_resolved: addresses.is_some(),
            resolved_addresses: addresses.unwrap_or_default(),
            connection_error: None,
        }
    }
}

/// Extract the round-trip time from ping output
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    PING_TIME
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Fake prober for deterministic testing. Unknown targets are unreachable
/// and unresolved.
#[derive(Default)]
pub struct FakeConnectivityProber {
    results: HashMap<String, ConnectivityProbeResult>,
    calls: AtomicUsize,
}

impl FakeConnectivityProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, target: &str, reachable: bool, dns_resolved: bool) -> Self {
        self.results.insert(
            target.to_string(),
            ConnectivityProbeResult {
                reachable,
                latency_ms: reachable.then_some(1.0),
                dns_resolved,
                resolved_addresses: Vec::new(),
                connection_error: None,
            },
        );
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProber for FakeConnectivityProber {
    async fn probe(&self, target: &str) -> ConnectivityProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results.get(target).cloned().unwrap_or_default()
    }
}
