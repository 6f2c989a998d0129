//! One-shot "say" command: send a message, stream the reply, exit.

use std::error::Error;
use std::io;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::cli::render::{outcome_message, StreamPrinter};
use crate::core::app::{self, AppInitConfig, TurnRequest};
use crate::core::attachments::ParseState;
use crate::core::chat_stream::TurnOutcome;
use crate::core::config::data::Config;

pub async fn run_say(
    init: AppInitConfig,
    prompt: Vec<String>,
    files: Vec<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        return Err("Usage: troupe say <prompt>".into());
    }

    let config = Config::load()?;
    let mut app = app::new_with_config(init, &config)?;

    for file in files {
        app.attachments.add(file);
    }
    if !app.attachments.is_empty() {
        app.upload_attachments().await?;
        for item in app.attachments.items() {
            if let ParseState::Failed(reason) = &item.parse_state {
                eprintln!("⚠️  {} was not attached: {reason}", item.display_name);
            }
        }
    }

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut printer = StreamPrinter::new(io::stdout());
    let result = app
        .run_turn(TurnRequest::Message(prompt), cancel, &mut printer)
        .await;
    watcher.abort();
    printer.finish()?;

    let outcome = result?;
    match &outcome {
        TurnOutcome::Completed => Ok(()),
        TurnOutcome::AwaitingFeedback(_) => {
            if let Some(message) = outcome_message(&outcome) {
                println!("{message}");
            }
            Ok(())
        }
        TurnOutcome::BackendError(text) => Err(text.clone().into()),
        TurnOutcome::Cancelled | TurnOutcome::TimedOut | TurnOutcome::Failed(_) => {
            Err(outcome_message(&outcome)
                .unwrap_or_else(|| "Request failed".to_string())
                .into())
        }
    }
}
