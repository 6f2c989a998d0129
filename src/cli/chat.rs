//! Line-based interactive chat.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::cli::render::{outcome_message, StreamPrinter};
use crate::commands::{process_input, CommandResult};
use crate::core::app::{self, App, AppInitConfig, TurnRequest};
use crate::core::attachments::ParseState;
use crate::core::config::data::Config;
use crate::core::mention::short_agent_name;

pub async fn run_chat(init: AppInitConfig) -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let mut app = app::new_with_config(init, &config)?;

    println!(
        "troupe: {} mode, backend {}. Type /help for commands.",
        app.mode(),
        app.orchestrator().client().base_url()
    );
    print_status(&mut app);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(&app)?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = process_input(&mut app, &line);
        print_status(&mut app);
        match result {
            CommandResult::Continue => {}
            CommandResult::Quit => break,
            CommandResult::ProcessAsMessage(text) => {
                stream_turn(&mut app, TurnRequest::Message(text)).await
            }
            CommandResult::Turn(request) => stream_turn(&mut app, request).await,
            CommandResult::UploadAttachments => upload(&mut app).await,
        }
    }
    Ok(())
}

fn print_prompt(app: &App) -> io::Result<()> {
    let waiting = app
        .conversation()
        .and_then(|conversation| conversation.awaiting_feedback());
    let mut stdout = io::stdout();
    match waiting {
        Some(pending) => write!(
            stdout,
            "feedback for {}> ",
            short_agent_name(&pending.request.agent_name)
        )?,
        None => write!(stdout, "{}> ", app.mode())?,
    }
    stdout.flush()
}

fn print_status(app: &mut App) {
    for status in app.take_status() {
        println!("{status}");
    }
}

/// Run a turn with Ctrl+C bound to cancelling it.
async fn stream_turn(app: &mut App, request: TurnRequest) {
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
    let result = app.run_turn(request, cancel, &mut printer).await;
    watcher.abort();
    let _ = printer.finish();

    match result {
        Ok(outcome) => {
            if let Some(message) = outcome_message(&outcome) {
                println!("{message}");
            }
        }
        Err(err) => eprintln!("❌ {err}"),
    }
    print_status(app);
}

async fn upload(app: &mut App) {
    match app.upload_attachments().await {
        Ok(parsed) => println!("Parsed {parsed} attachment(s)."),
        Err(err) => eprintln!("❌ {err}"),
    }
    for item in app.attachments.items() {
        if let ParseState::Failed(reason) = &item.parse_state {
            eprintln!("  [{}] {}: {reason}", item.client_id, item.display_name);
        }
    }
}
