//! Run a search agent from the command line and print the UI chunk stream.
//!
//! Usage:
//!   OPENAI_API_KEY=sk-... JINA_API_KEY=jina_... SEARXNG_URL=http://localhost:8888 \
//!     cargo run --example search -- "what is tokio"
//!   BRAVE_API_KEY=... cargo run --example search -- --agent tools "rust async runtimes"
//!
//! Set RUST_LOG=nexus_search=debug to see what the agent is doing.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use futures::StreamExt;
use nexus_search::{
    AgentConfig, FixedPipelineAgent, HttpSearch, JinaReader, OpenAiProvider, SearchAgent,
    ToolDrivenAgent, UiStreamWriter, WebSearch,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, ValueEnum)]
enum AgentKind {
    /// Plan, search, read, judge, answer
    Fixed,
    /// Let the model call search and read tools
    Tools,
}

#[derive(Parser)]
#[command(name = "search", about = "Answer a question from the web")]
struct Cli {
    /// The question to answer
    query: String,

    #[arg(long, value_enum, default_value = "fixed")]
    agent: AgentKind,

    /// Model to use
    #[arg(long, default_value = "gpt-5-mini")]
    model: String,

    /// OpenAI-compatible API base URL
    #[arg(long, default_value = "https://api.openai.com")]
    base_url: String,

    /// Max output tokens per generation
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Send the output limit as `max_tokens` for servers that predate
    /// `max_completion_tokens`
    #[arg(long)]
    legacy_max_tokens: bool,

    /// Stop the fixed pipeline after this many search rounds
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Model steps for the tool-driven agent
    #[arg(long, default_value_t = 10)]
    max_steps: usize,

    /// SearXNG base URL (falls back to SEARXNG_URL, then Brave)
    #[arg(long)]
    searxng_url: Option<String>,
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn build_search(cli: &Cli) -> Arc<dyn WebSearch> {
    if let Some(url) = cli.searxng_url.clone().or_else(|| env("SEARXNG_URL")) {
        return Arc::new(HttpSearch::searxng(url));
    }
    match env("BRAVE_API_KEY") {
        Some(key) => Arc::new(HttpSearch::brave(key)),
        None => {
            eprintln!("error: set --searxng-url, SEARXNG_URL or BRAVE_API_KEY");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut provider = OpenAiProvider::new(cli.base_url.clone());
    if let Some(key) = env("OPENAI_API_KEY") {
        provider = provider.with_api_key(key);
    }
    if cli.legacy_max_tokens {
        provider = provider.with_legacy_max_tokens();
    }
    let provider = Arc::new(provider);

    let jina_key = env("JINA_API_KEY").unwrap_or_else(|| {
        eprintln!("error: JINA_API_KEY not set");
        std::process::exit(1);
    });
    let fetcher = Arc::new(JinaReader::new(jina_key));
    let search = build_search(&cli);

    let config = AgentConfig {
        model: cli.model.clone(),
        max_tokens: cli.max_tokens,
        max_rounds: cli.max_rounds,
        tool_max_steps: cli.max_steps,
    };

    let agent = match cli.agent {
        AgentKind::Fixed => SearchAgent::FixedPipeline(FixedPipelineAgent::new(
            provider, search, fetcher, config,
        )),
        AgentKind::Tools => {
            SearchAgent::ToolDriven(ToolDrivenAgent::new(provider, search, fetcher, config))
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut writer = UiStreamWriter::new();
    let mut events = agent.run_with_cancel(cli.query.clone(), cancel);
    let mut failed = false;

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                for chunk in writer.push(event) {
                    match serde_json::to_string(&chunk) {
                        Ok(line) => println!("{line}"),
                        Err(e) => eprintln!("error: could not encode chunk: {e}"),
                    }
                }
            }
            Err(e) => {
                eprintln!("\x1b[1;31merror:\x1b[0m {e}");
                failed = true;
            }
        }
    }

    if let Some(end) = writer.finish() {
        if let Ok(line) = serde_json::to_string(&end) {
            println!("{line}");
        }
    }

    if failed {
        std::process::exit(1);
    }
}
