//! netsleuthd - network troubleshooting orchestrator
//!
//! Runs one troubleshooting session from the command line and prints the
//! report on stdout. Logs go to stderr (`RUST_LOG`, default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use netsleuth_common::{AlarmDetails, Attachment, Report, TargetScope};
use netsleuthd::{CancelHandle, Config, TroubleshootingService};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netsleuthd")]
#[command(about = "Network troubleshooting orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: /etc/netsleuth/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value = "json", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Troubleshoot an alarm
    Alarm {
        #[arg(long)]
        description: String,

        /// Device in scope (repeatable)
        #[arg(long = "device", required = true)]
        devices: Vec<String>,

        #[arg(long)]
        severity: Option<String>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        component: Option<String>,

        /// Extra alarm attribute as key=value (repeatable)
        #[arg(long = "info", value_parser = parse_key_value)]
        info: Vec<(String, String)>,

        #[arg(long)]
        region: Option<String>,
    },

    /// Ask a troubleshooting question
    Query {
        text: String,

        /// Device in scope (repeatable)
        #[arg(long = "device")]
        devices: Vec<String>,

        /// Attach a text file (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,

        #[arg(long)]
        region: Option<String>,
    },

    /// List the operations the engine may request
    Capabilities,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn read_attachment(path: &PathBuf) -> Result<Attachment> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read attachment {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment {
        filename,
        content_type: None,
        content,
    })
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Markdown => print!("{}", report.to_markdown()),
    }
    Ok(())
}

fn scope(devices: Vec<String>, region: Option<String>) -> TargetScope {
    TargetScope { devices, region }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    info!("netsleuthd v{} starting", env!("CARGO_PKG_VERSION"));

    let service = TroubleshootingService::from_config(config)?;

    // Ctrl-C cancels the running session; the partial report is still printed
    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling session");
                cancel.cancel("interrupted by operator");
            }
        });
    }

    let report = match cli.command {
        Commands::Capabilities => {
            let snapshot = service.get_supported_capabilities()?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(());
        }
        Commands::Alarm {
            description,
            devices,
            severity,
            source,
            component,
            info,
            region,
        } => {
            let alarm = AlarmDetails {
                source,
                severity,
                component,
                description,
                additional_info: info.into_iter().collect(),
            };
            service
                .process_alarm_with_cancel(alarm, scope(devices, region), &cancel)
                .await
        }
        Commands::Query {
            text,
            devices,
            attachments,
            region,
        } => {
            let attachments = attachments
                .iter()
                .map(read_attachment)
                .collect::<Result<Vec<_>>>()?;
            service
                .process_user_query_with_cancel(&text, scope(devices, region), vec![], attachments, &cancel)
                .await
        }
    };

    if cancel.is_cancelled() {
        warn!("Session was cancelled, report is partial");
    }
    print_report(&report, cli.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("ifIndex=3").unwrap(),
            ("ifIndex".to_string(), "3".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_parses_alarm() {
        let cli = Cli::try_parse_from([
            "netsleuthd",
            "--format",
            "markdown",
            "alarm",
            "--description",
            "link down",
            "--device",
            "core-router-1",
            "--severity",
            "critical",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Markdown));
        match cli.command {
            Commands::Alarm { devices, severity, .. } => {
                assert_eq!(devices, vec!["core-router-1"]);
                assert_eq!(severity.as_deref(), Some("critical"));
            }
            _ => panic!("expected alarm"),
        }
    }

    #[test]
    fn test_cli_alarm_requires_device() {
        assert!(Cli::try_parse_from(["netsleuthd", "alarm", "--description", "x"]).is_err());
    }
}
