//! `streamloop run`: run the agent loop on a single message.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use streamloop_agent::{AgentLoop, LoopOutcome, Termination};
use streamloop_config::{AppConfig, ConfigError};
use streamloop_core::{AgentEvent, ChannelSink, Message, ToolRegistry};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// The user message to send
    #[arg(short, long)]
    pub message: String,

    /// Provider override (anthropic, openai, gemini)
    #[arg(long)]
    pub provider: Option<String>,

    /// Model override
    #[arg(long)]
    pub model: Option<String>,

    /// Halt once cumulative input + output tokens exceed this
    #[arg(long)]
    pub token_budget: Option<u64>,

    /// Halt once cumulative cost exceeds this many USD
    #[arg(long)]
    pub cost_budget: Option<f64>,

    /// Maximum provider requests
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Config file (defaults to ~/.streamloop/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print every event as a JSON line instead of plain text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args, |key| std::env::var(key).ok())
        .map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    STREAMLOOP_API_KEY");
        eprintln!("    {}", config.provider.api_key_env());
        eprintln!();
        eprintln!("  Or add api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let (adapter, transport) = streamloop_providers::build_from_config(&config)?;
    let tools = Arc::new(ToolRegistry::new());
    let agent_config = config.agent_config(tools.definitions());

    let (sink, mut events) = ChannelSink::new();
    let json = args.json;
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            if let Err(e) = render_event(&event, json, &mut stdout) {
                tracing::warn!(error = %e, "Failed to write event");
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut agent =
        AgentLoop::new(adapter, Arc::new(transport), tools).with_sink(Arc::new(sink));
    let outcome = agent
        .run(Vec::new(), Message::user(args.message), &agent_config, cancel)
        .await;

    // Dropping the agent closes the event channel so the printer drains and exits
    drop(agent);
    printer.await?;

    if !json {
        eprintln!();
        eprintln!("{}", summarize(&outcome));
    }

    match outcome.termination {
        Termination::Failed { error } => Err(error.into()),
        _ => Ok(()),
    }
}

/// File, then environment, then command-line flags.
fn resolve_config(
    args: &RunArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    let mut config = AppConfig::load_from(&path)?;

    // The flag decides the provider before keys are looked up per vendor
    if let Some(provider) = &args.provider {
        config.provider = provider.parse()?;
    }
    let provider_flag = args.provider.is_some();
    config.apply_env_overrides(|key| {
        if provider_flag && key == "STREAMLOOP_PROVIDER" {
            None
        } else {
            lookup(key)
        }
    })?;

    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(tokens) = args.token_budget {
        config.budget.token_budget = Some(tokens);
    }
    if let Some(usd) = args.cost_budget {
        config.budget.cost_budget_usd = Some(usd);
    }
    if let Some(max) = args.max_iterations {
        config.budget.max_iterations = max;
    }

    config.validate()?;
    Ok(config)
}

fn render_event(event: &AgentEvent, json: bool, out: &mut impl Write) -> std::io::Result<()> {
    if json {
        let line = serde_json::to_string(event)?;
        writeln!(out, "{line}")?;
        return out.flush();
    }

    match event {
        AgentEvent::TextDelta { text } => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        AgentEvent::TextDone { .. } => writeln!(out)?,
        AgentEvent::ToolUseStart { tool_name, .. } => eprintln!("  [tool] {tool_name}"),
        AgentEvent::ToolResult {
            content, is_error, ..
        } => {
            let label = if *is_error { "tool error" } else { "tool result" };
            eprintln!("  [{label}] {}", preview(content, 200));
        }
        AgentEvent::Error { error } => eprintln!("  [error] {error}"),
        AgentEvent::BudgetExceeded { message, .. } => eprintln!("  [budget] {message}"),
        _ => {}
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn summarize(outcome: &LoopOutcome) -> String {
    let status = match &outcome.termination {
        Termination::Completed { stop_reason } => format!("completed ({stop_reason})"),
        Termination::BudgetExceeded { reason } => format!("halted ({reason})"),
        Termination::Failed { .. } => "failed".to_string(),
    };
    let cost = outcome
        .cost
        .map(|c| format!("${:.6}", c.total_cost_usd))
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        "📊 {status} · {} request(s) · {} in / {} out tokens · cost {cost}",
        outcome.iterations, outcome.usage.input_tokens, outcome.usage.output_tokens,
    )
}
