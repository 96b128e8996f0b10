//! Repogrill CLI
//!
//! Runs the repository intelligence pipeline from the command line:
//! analyzes a public repository and prints the generated interview
//! questions. Designed for local use and for smoke-testing deployments.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use repogrill::cache::{CacheLayer, DistributedLock};
use repogrill::github::GitHubClient;
use repogrill::llm::OpenAiCompatClient;
use repogrill::pipeline::{GenerateOptions, Pipeline};
use repogrill::types::{Difficulty, QuestionType};
use repogrill::RepogrillConfig;

#[derive(Parser)]
#[command(name = "repogrill")]
#[command(about = "Generate code-grounded interview questions from a repository", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Commands {
    /// Analyze a repository and generate questions
    Analyze {
        /// Repository URL or owner/name
        #[arg(value_name = "REPO")]
        repository: String,

        /// Number of questions to generate
        #[arg(short, long, default_value = "9")]
        questions: usize,

        /// Difficulty: easy, medium, hard
        #[arg(short, long, default_value = "medium")]
        difficulty: String,

        /// Comma-separated question types
        #[arg(long, default_value = "tech_stack,architecture,code_analysis")]
        types: String,

        /// Print the full analysis as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Show which files the selector would pick, without calling the LLM
    Select {
        /// Repository URL or owner/name
        #[arg(value_name = "REPO")]
        repository: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = RepogrillConfig::from_env()?;

    match cli.command {
        Commands::Analyze {
            repository,
            questions,
            difficulty,
            types,
            json,
        } => {
            let pipeline = build_pipeline(&config)?;
            let opts = GenerateOptions {
                question_count: questions,
                difficulty: Difficulty::parse(&difficulty)?,
                types: types
                    .split(',')
                    .map(QuestionType::parse)
                    .collect::<Result<Vec<_>, _>>()?,
                analysis_id: None,
                wait_for_lock: true,
            };

            info!("Analyzing {}", repository);
            let result = pipeline.analyze_and_generate(&repository, opts).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!(
                "\n{} {} ({} files, primary language: {})",
                "Repository:".bold(),
                format!("{}/{}", result.repository.owner, result.repository.name).cyan(),
                result.repository.file_count,
                result
                    .repository
                    .primary_language
                    .as_deref()
                    .unwrap_or("unknown")
            );

            println!("\n{}", "Key files:".bold());
            for file in &result.key_files {
                println!(
                    "  {:.3}  {}  [{}]",
                    file.record.importance_score,
                    file.record.path.green(),
                    file.reasons.join(", ").dimmed()
                );
            }

            println!("\n{}", "Questions:".bold());
            for (i, question) in result.questions.iter().enumerate() {
                println!(
                    "\n{} {} {} {}",
                    format!("{}.", i + 1).bold(),
                    format!("[{}]", question.question_type.as_str()).yellow(),
                    format!("({})", question.time_estimate).dimmed(),
                    question.file_path.dimmed()
                );
                println!("   {}", question.headline);
            }

            if !result.warnings.is_empty() {
                println!("\n{}", "Warnings:".bold().yellow());
                for warning in &result.warnings {
                    println!("  - {}", warning);
                }
            }
        }

        Commands::Select { repository } => {
            let pipeline = build_pipeline(&config)?;
            let opts = GenerateOptions {
                question_count: 1,
                ..Default::default()
            };
            // A full run with a single question keeps the output focused
            // on the selection itself.
            let result = pipeline.analyze_and_generate(&repository, opts).await?;
            for file in &result.key_files {
                println!(
                    "{:.3}\t{:?}\t{}",
                    file.record.importance_score, file.reason, file.record.path
                );
            }
        }
    }

    Ok(())
}

fn build_pipeline(config: &RepogrillConfig) -> anyhow::Result<Pipeline> {
    let host = Arc::new(GitHubClient::with_config(config.github.clone())?);
    let model = Arc::new(
        OpenAiCompatClient::new(
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
        ),
    );
    let cache = Arc::new(CacheLayer::new(config.cache.clone())?);
    let lock = DistributedLock::new(&config.cache);

    Ok(Pipeline::new(
        host,
        model,
        cache,
        lock,
        config.extractor.clone(),
        config.selector.clone(),
        config.composer.clone(),
        config.pipeline.clone(),
    )
    .with_cancellation(CancellationToken::new()))
}
