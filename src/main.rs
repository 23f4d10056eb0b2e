//! `quorum` CLI: a thin driver over the library for smoke-testing a
//! configuration from the shell.

use anyhow::Result;
use clap::{Parser, Subcommand};
use quorum_engine::agent::{Agent, HealthStatus};
use quorum_engine::audit::FileStore;
use quorum_engine::backend::{Backend, CompletionRequest, Credentials, Message};
use quorum_engine::config::Settings;
use quorum_engine::consensus::ConsensusEngine;
use quorum_engine::dispatch::Dispatcher;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quorum",
    about = "Multi-backend AI dispatch and consensus engine",
    version
)]
struct Args {
    /// Directory for the audit store (defaults to the platform cache dir)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured backends in priority order
    Backends,
    /// Send one prompt through the fallback dispatcher
    Ask {
        prompt: String,
        /// Preferred backend to try first
        #[arg(short, long)]
        backend: Option<Backend>,
    },
    /// Fan one prompt out to every backend and print the verdict
    Analyze { prompt: String },
    /// Probe every configured backend
    Health,
}

fn store_dir(args: &Args) -> PathBuf {
    args.store_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("quorum")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quorum_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = Settings::load();
    let credentials = Credentials::from_env();

    match &args.command {
        Command::Backends => {
            let available = credentials.available();
            if available.is_empty() {
                eprintln!("No backends configured. Set one of:");
                for backend in quorum_engine::backend::PRIORITY {
                    eprintln!("  {}", backend.env_key());
                }
            } else {
                for backend in &available {
                    println!("{}", backend);
                }
            }
        }
        Command::Ask { prompt, backend } => {
            let dispatcher = Dispatcher::from_credentials(&credentials, &settings);
            let mut request = CompletionRequest::new(vec![Message::user(prompt.clone())]);
            if let Some(backend) = backend {
                request = request.with_preferred_backend(*backend);
            }
            let result = dispatcher.dispatch(&request).await?;
            eprintln!(
                "[{} / {}, {} tokens]",
                result.backend, result.model, result.usage.total_tokens
            );
            println!("{}", result.content);
        }
        Command::Analyze { prompt } => {
            let engine = ConsensusEngine::from_credentials(&credentials, &settings);
            let verdict = engine.evaluate(prompt).await;
            for outcome in &verdict.outcomes {
                eprintln!(
                    "  {} responded in {}ms (approved: {}, confidence: {:.2})",
                    outcome.backend,
                    outcome.elapsed.as_millis(),
                    outcome.approved,
                    outcome.confidence
                );
            }
            for failure in &verdict.failures {
                eprintln!("  {} failed: {}", failure.backend, failure.error);
            }
            println!(
                "consensus: {} ({}/{} approved, confidence {:.2})",
                if verdict.approved { "APPROVED" } else { "NOT APPROVED" },
                verdict.approval_count,
                verdict.total_responses,
                verdict.confidence
            );
            println!("\n{}", verdict.primary_response);
        }
        Command::Health => {
            let agent = Agent::new(
                &credentials,
                &settings,
                Box::new(FileStore::new(&store_dir(&args))),
            );
            let report = agent.health_check().await;
            for (backend, ok) in &report.services {
                println!("{:<12} {}", backend.to_string(), if *ok { "ok" } else { "unavailable" });
            }
            let status = match report.status {
                HealthStatus::Healthy => "healthy",
                HealthStatus::Degraded => "degraded",
                HealthStatus::Down => "down",
            };
            println!("status: {}", status);
            if report.status == HealthStatus::Down {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
