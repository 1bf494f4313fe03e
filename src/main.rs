use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use space::chat;
use space::constants::DEFAULT_PORT;
use space::questions::{self, EXAMPLE_PROMPTS, SEED_QUESTION};
use space::web_server;
use space::{ChatStore, ConversationConfig};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web UI.
    Serve {
        #[arg(long, env = "SPACE_PORT", default_value_t = DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, help = "JSON file with replacement clarification questions.")]
        questions: Option<PathBuf>,
    },
    /// Build a prototype from a text-based chat session.
    Chat {
        #[arg(long, help = "Opening prompt; skips the example picker.")]
        prompt: Option<String>,
        #[arg(long, help = "JSON file with replacement clarification questions.")]
        questions: Option<PathBuf>,
    },
    /// List the example prompts offered on the landing page.
    Examples,
    /// List the clarification question bank.
    Questions {
        #[arg(long, help = "JSON file with replacement clarification questions.")]
        questions: Option<PathBuf>,
    },
}

fn conversation_config(questions: Option<&PathBuf>) -> Result<ConversationConfig> {
    let config = ConversationConfig::default();
    match questions {
        Some(path) => Ok(config.with_question_bank(questions::load_bank(path)?)),
        None => Ok(config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for SPACE_* settings)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,space=debug); stderr keeps chat output clean
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("Space starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Serve { port, questions } => {
            let config = Arc::new(conversation_config(questions.as_ref())?);
            let store = ChatStore::new();

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(port, store, config).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { prompt, questions } => {
            let config = Arc::new(conversation_config(questions.as_ref())?);
            chat::run_chat_session(ChatStore::new(), config, prompt)
                .await
                .context("Chat session failed")?;
        }
        Commands::Examples => {
            for example in EXAMPLE_PROMPTS {
                println!("{}", example);
            }
        }
        Commands::Questions { questions } => {
            let config = conversation_config(questions.as_ref())?;
            println!("Seed: {}", SEED_QUESTION);
            for (i, question) in config.question_bank.iter().enumerate() {
                println!("{:>2}. {}", i + 1, question);
            }
        }
    }

    Ok(())
}
