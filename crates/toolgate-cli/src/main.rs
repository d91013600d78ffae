//! `toolgate`: validate guard configs and run test calls through the gates.

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use toolgate_core::{CallerIdentity, ToolError};
use toolgate_proxy::{CallOrchestrator, GuardConfig, Tool};
use toolgate_security::{AuditSink, MemoryAuditSink, TracingAuditSink};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolgate", about = "Toolgate: access, rate and output guard for tool calls")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "toolgate.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config file and print a summary
    Check,
    /// Run a text-echo tool through the configured gates
    Probe {
        /// Tool name to call
        tool: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        session: Option<String>,
        /// Text the tool returns
        #[arg(long, default_value = "")]
        text: String,
        /// Number of back-to-back calls
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,
        /// Send audit events to the log instead of printing them
        #[arg(long)]
        trace_audit: bool,
    },
}

/// Returns its `text` argument.
struct EchoTool {
    name: String,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        Ok(arguments["text"].clone())
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check(config: &GuardConfig) -> anyhow::Result<()> {
    // Compiles rules as a side effect.
    CallOrchestrator::from_config(config, Arc::new(MemoryAuditSink::new()))?;

    println!("Config OK");
    if config.allowed_tools.is_empty() {
        println!("  allowed tools: none (every call is denied)");
    } else {
        println!("  allowed tools: {}", config.allowed_tools.join(", "));
    }
    match &config.rate_limit {
        Some(rate) => println!(
            "  rate limit: {}/min, burst {}",
            rate.requests_per_minute(),
            rate.burst_size()
        ),
        None => println!("  rate limit: off"),
    }
    match &config.sanitizer {
        Some(s) => println!(
            "  sanitizer: {} rule(s), max length {}, html escape {}, strip control {}",
            s.rules.len(),
            s.max_length,
            s.html_escape,
            s.strip_control_chars
        ),
        None => println!("  sanitizer: off"),
    }
    println!("  caller key: {:?}", config.caller_key);
    Ok(())
}

async fn probe(
    config: &GuardConfig,
    tool: String,
    identity: CallerIdentity,
    text: String,
    repeat: u32,
    trace_audit: bool,
) -> anyhow::Result<()> {
    let memory = Arc::new(MemoryAuditSink::new());
    let sink: Arc<dyn AuditSink> = if trace_audit {
        Arc::new(TracingAuditSink::new(config.audit_component.clone()))
    } else {
        memory.clone()
    };
    let guard = CallOrchestrator::from_config(config, sink)?;
    let echo = EchoTool { name: tool };
    info!(
        tool = %echo.name,
        caller_key = %guard.caller_key(&identity, &echo.name),
        repeat,
        "Probing"
    );

    for attempt in 1..=repeat {
        match guard
            .invoke_tool(&echo, json!({ "text": text }), &identity)
            .await
        {
            Ok(value) => println!("#{attempt} ok: {value}"),
            Err(e) => println!("#{attempt} error: {e}"),
        }
    }

    if !trace_audit {
        println!("\nAudit events:");
        for event in memory.events() {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = GuardConfig::load(&cli.config)
        .with_context(|| format!("Failed to load '{}'", cli.config.display()))?;

    match cli.command {
        Commands::Check => check(&config),
        Commands::Probe {
            tool,
            user,
            session,
            text,
            repeat,
            trace_audit,
        } => {
            let identity = CallerIdentity {
                user_id: user,
                session_id: session,
            };
            probe(&config, tool, identity, text, repeat, trace_audit).await
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_probe() {
        let cli = Cli::try_parse_from([
            "toolgate", "--config", "g.toml", "probe", "search", "--user", "u1", "--text", "hi",
            "-n", "3",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("g.toml"));
        match cli.command {
            Commands::Probe {
                tool, user, repeat, ..
            } => {
                assert_eq!(tool, "search");
                assert_eq!(user.as_deref(), Some("u1"));
                assert_eq!(repeat, 3);
            }
            Commands::Check => panic!("expected probe"),
        }
    }

    #[test]
    fn test_check_accepts_valid_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "allowed_tools = [\"search\"]").unwrap();
        let config = GuardConfig::load(tmp.path()).unwrap();
        assert!(check(&config).is_ok());
    }

    #[tokio::test]
    async fn test_echo_tool_returns_text() {
        let echo = EchoTool {
            name: "search".to_string(),
        };
        let out = echo.call(json!({"text": "hello"})).await.unwrap();
        assert_eq!(out, Value::String("hello".to_string()));
    }
}
