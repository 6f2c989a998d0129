//! Command-line interface parsing and handling

pub mod chat;
pub mod render;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::chat::run_chat;
use crate::cli::say::run_say;
use crate::core::app::{session_registry, AppInitConfig};
use crate::core::config::data::{path_display, Config};
use crate::core::config::defaults::{BASE_URL_ENV, CONFIG_KEYS};
use crate::core::mode::ChatMode;

pub const LOG_ENV: &str = "TROUPE_LOG";

#[derive(Parser)]
#[command(name = "troupe")]
#[command(about = "A terminal client for multi-agent chat backends")]
#[command(
    long_about = "Troupe talks to a chat backend that streams replies over Server-Sent Events. \
In testcase mode a team of agents answers together, and an agent may pause to ask for \
your feedback before the team continues.\n\n\
Modes:\n\
  normal           Single assistant\n\
  orchestration    Orchestrated assistant with its own session header\n\
  testcase         Agent team; replies are shown per agent\n\n\
Environment Variables:\n\
  TROUPE_API_URL    Backend URL (overrides base-url in config.toml)\n\
  TROUPE_LOG        Diagnostic log filter, e.g. debug or troupe=trace\n\n\
Commands inside chat:\n\
  /help             List chat commands\n\
  /approve          Approve the agent waiting for feedback\n\
  /mode <name>      Switch modes\n\
  Ctrl+C            Cancel a streaming reply, or quit at the prompt"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Chat mode: normal, orchestration or testcase
    #[arg(short = 'm', long, global = true)]
    pub mode: Option<ChatMode>,

    /// Backend URL for this run
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Append the transcript to this file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send one message, print the reply and exit
    Say {
        /// Files to upload and attach to the message
        #[arg(short = 'f', long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
        /// Message text
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Show or clear stored backend session ids
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set (gate takes a mode followed by agent names)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Option<Vec<String>>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
        /// Mode whose gate to remove (gate only)
        value: Option<String>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum SessionCommands {
    /// Print the session id stored for each mode
    Show,
    /// Forget the session id for the selected mode, or every mode with --all
    Clear {
        #[arg(long)]
        all: bool,
    },
}

impl Args {
    fn init_config(&self) -> AppInitConfig {
        AppInitConfig {
            mode: self.mode,
            base_url: self.base_url.clone(),
            log_file: self.log.clone(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let init = args.init_config();

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(init).await,
        Commands::Say { files, prompt } => run_say(init, prompt, files).await,
        Commands::Session { command } => {
            let config = Config::load()?;
            run_session(command, init.mode, &config)
        }
        Commands::Set { key, value } => {
            let mut config = Config::load()?;
            match value {
                Some(value) if !value.is_empty() => {
                    config.set_value(&key, &value)?;
                    let path = config.save()?;
                    println!("✅ Set {key} in {}", path_display(path));
                }
                _ => {
                    config.print_all();
                    println!("\nKeys: {}", CONFIG_KEYS.join(", "));
                    println!("{BASE_URL_ENV} overrides base-url when set.");
                }
            }
            Ok(())
        }
        Commands::Unset { key, value } => {
            let mut config = Config::load()?;
            config.unset_value(&key, value.as_deref())?;
            config.save()?;
            println!("✅ Unset {key}");
            Ok(())
        }
    }
}

fn run_session(
    command: SessionCommands,
    mode: Option<ChatMode>,
    config: &Config,
) -> Result<(), Box<dyn Error>> {
    let registry = session_registry(config);
    match command {
        SessionCommands::Show => {
            for mode in ChatMode::ALL {
                match registry.get(mode) {
                    Some(id) => println!("{mode}: {id}"),
                    None => println!("{mode}: (none)"),
                }
            }
        }
        SessionCommands::Clear { all } => {
            let modes = if all {
                ChatMode::ALL.to_vec()
            } else {
                vec![match mode {
                    Some(mode) => mode,
                    None => config.default_mode()?,
                }]
            };
            for mode in modes {
                registry.clear(mode)?;
                println!("✅ Cleared {mode} session");
            }
        }
    }
    Ok(())
}
