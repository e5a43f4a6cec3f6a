//! cr - Ask questions about a pull request from the command line
//!
//! Thin wrapper over the review engine: loads the PR, runs one session,
//! and prints the answer in the requested format.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cr_core::llm::GeminiClient;
use cr_core::registry::LoadedReview;
use cr_core::rlm::{AskParams, Controller, SessionEvent};
use cr_core::types::BlockKind;
use cr_core::Config;
use cr_providers::Gateway;

/// Ask questions about a pull/merge request
#[derive(Parser, Debug)]
#[command(name = "cr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Review a pull request with a question
    Review {
        /// Pull/merge request URL
        #[arg(long)]
        url: String,

        /// Question to answer about the change
        #[arg(long, short)]
        question: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,

        /// Override the controller model
        #[arg(long)]
        model: Option<String>,

        /// Suppress iteration progress on stderr
        #[arg(long)]
        quiet: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Markdown,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let Commands::Review {
        url,
        question,
        output,
        model,
        quiet,
    } = cli.command;

    match run_review(&url, &question, output, model, quiet).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &cr_core::Error) -> u8 {
    match err.code() {
        "url_invalid" => 2,
        "unauthorized" => 3,
        "rate_limited" => 4,
        _ => 1,
    }
}

async fn run_review(
    url: &str,
    question: &str,
    output: OutputFormat,
    model: Option<String>,
    quiet: bool,
) -> Result<(), cr_core::Error> {
    let mut config = Config::load()?;
    if let Some(model) = model {
        config.llm.main_model = model;
    }

    let api_key = config.require_api_key()?.to_string();
    let llm = Arc::new(GeminiClient::new(api_key, config.llm.api_base.clone())?);
    let gateway = Arc::new(Gateway::new(config.gateway_config())?);

    if !quiet {
        eprintln!("loading {url}");
    }
    let (pr_ref, pr_info) = gateway.load_pr(url).await?;
    if !quiet {
        eprintln!(
            "PR #{}: {} ({} files, +{} -{})",
            pr_info.number,
            pr_info.title,
            pr_info.files.len(),
            pr_info.additions,
            pr_info.deletions
        );
    }
    let loaded = Arc::new(LoadedReview {
        pr_ref,
        created_at: chrono::Utc::now(),
        pr_info,
    });

    let controller = Controller::new(llm, Arc::clone(&gateway), config);
    let mut events = controller.ask(
        loaded,
        AskParams::question(question),
        CancellationToken::new(),
    );

    let mut blocks = Vec::new();
    let mut citations = Vec::new();
    let mut failure: Option<(String, String)> = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Start { .. } => {}
            SessionEvent::Iteration(iteration) => {
                if !quiet {
                    eprintln!(
                        "[iteration {}/{}] {}",
                        iteration.index,
                        iteration.max,
                        one_line(&iteration.reasoning)
                    );
                    if let Some(error) = &iteration.error {
                        eprintln!("  error: {}", one_line(error));
                    }
                }
            }
            SessionEvent::Block { block, .. } => blocks.push(block),
            SessionEvent::Error { error, message } => failure = Some((error, message)),
            SessionEvent::End {
                citations: session_citations,
            } => citations = session_citations,
        }
    }

    if blocks.is_empty() {
        if let Some((code, message)) = failure {
            return Err(match code.as_str() {
                "unauthorized" => {
                    cr_core::Error::Provider(cr_providers::Error::Unauthorized(message))
                }
                "rate_limited" => cr_core::Error::Provider(cr_providers::Error::RateLimited {
                    retry_after_secs: None,
                }),
                _ => cr_core::Error::Llm(message),
            });
        }
    }

    print_answer(&blocks, &citations, output)?;
    Ok(())
}

fn print_answer(
    blocks: &[cr_core::AnswerBlock],
    citations: &[cr_core::DiffCitation],
    output: OutputFormat,
) -> Result<(), cr_core::Error> {
    match output {
        OutputFormat::Text => {
            for block in blocks {
                println!("{}", block.content);
                println!();
            }
            if !citations.is_empty() {
                println!("Citations:");
                for citation in citations {
                    println!(
                        "  {}:{}-{}",
                        citation.path, citation.start_line, citation.end_line
                    );
                }
            }
        }
        OutputFormat::Markdown => {
            for block in blocks {
                match block.kind {
                    BlockKind::Markdown => println!("{}\n", block.content),
                    BlockKind::Code => {
                        let language = block.language.as_deref().unwrap_or("");
                        println!("```{language}\n{}\n```\n", block.content);
                    }
                }
            }
        }
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "answerBlocks": blocks,
                "citations": citations,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }
    Ok(())
}

fn one_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 100 {
        let truncated: String = line.chars().take(100).collect();
        format!("{truncated}...")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_review_command() {
        let cli = Cli::try_parse_from([
            "cr",
            "review",
            "--url",
            "https://github.com/o/r/pull/1",
            "--question",
            "Any bugs?",
            "--output",
            "json",
            "--quiet",
        ])
        .unwrap();
        let Commands::Review {
            url,
            question,
            output,
            quiet,
            model,
        } = cli.command;
        assert_eq!(url, "https://github.com/o/r/pull/1");
        assert_eq!(question, "Any bugs?");
        assert!(matches!(output, OutputFormat::Json));
        assert!(quiet);
        assert!(model.is_none());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            exit_code_for(&cr_core::Error::Provider(
                cr_providers::Error::UrlInvalid("x".into())
            )),
            2
        );
        assert_eq!(
            exit_code_for(&cr_core::Error::Provider(
                cr_providers::Error::Unauthorized("x".into())
            )),
            3
        );
        assert_eq!(
            exit_code_for(&cr_core::Error::Provider(cr_providers::Error::RateLimited {
                retry_after_secs: None
            })),
            4
        );
        assert_eq!(exit_code_for(&cr_core::Error::Llm("x".into())), 1);
    }

    #[test]
    fn test_one_line_truncates() {
        assert_eq!(one_line("short"), "short");
        assert_eq!(one_line("first\nsecond"), "first");
        let long = "x".repeat(200);
        assert!(one_line(&long).ends_with("..."));
    }
}
