//! Ensemble - send one prompt to several LLMs, compare their answers and
//! synthesize a consensus.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ensemble::consensus::{Strategy, StrategyKind};
use ensemble::ensemble::{ResponseStatus, ResponseUpdate};
use ensemble::llm::{ClientMode, ProviderClient};
use ensemble::{Config, EnsembleSession};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ask several LLMs at once and build a consensus answer", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt to the ensemble and print responses, agreement and consensus
    Run {
        /// Prompt to send to every model
        #[arg(short, long)]
        prompt: String,

        /// Model as provider:model (or just provider for its default model)
        #[arg(short, long = "model", required = true)]
        models: Vec<String>,

        /// Extra response written by hand, as LABEL=TEXT
        #[arg(long = "manual")]
        manual: Vec<String>,

        /// Model that writes the consensus answer
        #[arg(long)]
        summarizer: Option<String>,

        /// Model that judges pairs for ELO ranking (defaults to the summarizer)
        #[arg(long)]
        judge: Option<String>,

        /// Consensus strategy: standard or elo
        #[arg(long)]
        strategy: Option<StrategyKind>,

        /// Responses kept after ELO ranking
        #[arg(long)]
        top_n: Option<usize>,

        /// Provider used for embeddings
        #[arg(long)]
        embedding_provider: Option<String>,

        /// Client mode: mock, direct or backend
        #[arg(long)]
        mode: Option<ClientMode>,

        /// Skip the consensus step
        #[arg(long, default_value_t = false)]
        no_consensus: bool,

        /// Print the session snapshot as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List models available through the registry
    Models {
        /// Only this provider
        #[arg(long)]
        provider: Option<String>,

        /// Client mode: mock, direct or backend
        #[arg(long)]
        mode: Option<ClientMode>,
    },

    /// Check an API key against a provider
    Validate {
        #[arg(long)]
        provider: String,

        #[arg(long)]
        key: String,

        /// Client mode: mock, direct or backend
        #[arg(long)]
        mode: Option<ClientMode>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only results
    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = Config::load(args.config.as_deref()).context("loading config")?;

    match args.command {
        Command::Run {
            prompt,
            models,
            manual,
            summarizer,
            judge,
            strategy,
            top_n,
            embedding_provider,
            mode,
            no_consensus,
            json,
        } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(provider) = embedding_provider {
                config.ensemble.embedding_provider = provider;
            }
            if let Some(top_n) = top_n {
                config.elo.top_n = top_n;
            }
            let strategy = strategy.unwrap_or(config.ensemble.strategy);

            let session = EnsembleSession::new(&config)?;
            if summarizer.is_some() {
                session.set_summarizer(summarizer.as_deref());
            }
            session.set_judge(judge.as_deref());

            for arg in &models {
                let (provider, model) = parse_model(&config, arg)?;
                session.add_model(&provider, &model);
            }
            for entry in &manual {
                let Some((label, text)) = entry.split_once('=') else {
                    bail!("manual response `{entry}` must look like LABEL=TEXT");
                };
                session.add_manual_response(label.trim(), text.trim());
            }

            let progress = tokio::spawn(report_progress(session.subscribe()));
            session.run(&prompt).await;
            progress.abort();

            if let Err(e) = session.refresh_agreement().await {
                tracing::warn!(error = %e, "agreement analysis failed");
            }

            if !no_consensus {
                if let Err(e) = session.generate_consensus(session.strategy(strategy)).await {
                    tracing::warn!(error = %e, "consensus failed");
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
            } else {
                print_report(&session);
            }
        }

        Command::Models { provider, mode } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            let session = EnsembleSession::new(&config)?;
            let registry = session.registry();
            let providers = match provider {
                Some(p) => vec![p],
                None => registry.providers(config.mode),
            };

            for name in providers {
                let client = registry.get(&name, config.mode)?;
                match client.list_available_models().await {
                    Ok(models) => {
                        for m in models {
                            println!("{:<12} {:<36} {}", m.provider, m.id, m.display_name);
                        }
                    }
                    Err(e) => eprintln!("{name}: {e}"),
                }
            }
        }

        Command::Validate {
            provider,
            key,
            mode,
        } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            let session = EnsembleSession::new(&config)?;
            let client = session.registry().get(&provider, config.mode)?;
            let result = client.validate_api_key(&key).await;
            if result.valid {
                println!("{provider}: key is valid");
            } else {
                println!(
                    "{provider}: key rejected ({})",
                    result.error.as_deref().unwrap_or("no reason given")
                );
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Split `provider:model`, falling back to the provider's default model
fn parse_model(config: &Config, arg: &str) -> Result<(String, String)> {
    match arg.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider.to_string(), model.to_string()))
        }
        Some(_) => bail!("model `{arg}` must look like provider:model"),
        None => match config.default_model(arg) {
            Some(model) => Ok((arg.to_string(), model.to_string())),
            None => bail!("unknown provider `{arg}` and no model given"),
        },
    }
}

async fn report_progress(mut updates: tokio::sync::broadcast::Receiver<ResponseUpdate>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match updates.recv().await {
            Ok(ResponseUpdate::Started { model_id }) => eprintln!("  started   {model_id}"),
            Ok(ResponseUpdate::Completed { model_id }) => eprintln!("  complete  {model_id}"),
            Ok(ResponseUpdate::Failed { model_id, error }) => {
                eprintln!("  failed    {model_id}: {error}")
            }
            Ok(ResponseUpdate::Chunk { .. }) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_report(session: &EnsembleSession) {
    for response in session.responses() {
        println!("=== {} ===", response.label());
        match response.status() {
            ResponseStatus::Errored => {
                println!("[error] {}", response.error.as_deref().unwrap_or("unknown error"))
            }
            _ => println!("{}", response.content.trim()),
        }
        if let Some(ms) = response.response_time_ms {
            let tokens = response
                .token_count
                .map(|t| format!(", {t} tokens"))
                .unwrap_or_default();
            println!("({ms} ms{tokens})");
        }
        println!();
    }

    for manual in session.manual_responses() {
        println!("=== {} (manual) ===\n{}\n", manual.label, manual.text.trim());
    }

    let agreement = session.agreement();
    if let Some(stats) = agreement.stats {
        println!(
            "Agreement: mean {:.3}, median {:.3}",
            stats.mean, stats.median
        );
        for pair in &agreement.comparisons {
            println!(
                "  {} <> {}: {:.3} ({:?})",
                pair.model1, pair.model2, pair.similarity, pair.confidence
            );
        }
        println!();
    }

    if let Some(result) = session.consensus_result() {
        println!(
            "=== Consensus ({}, by {}) ===\n{}",
            result.strategy,
            result.summarizer_model,
            result.text.trim()
        );
        if let Some(ranking) = &result.ranking {
            println!("\nRanking:");
            for (i, r) in ranking.iter().enumerate() {
                println!("  {}. {} ({:.0})", i + 1, r.label, r.rating);
            }
        }
    }
}
