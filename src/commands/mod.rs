mod registry;

pub use registry::{all_commands, CommandInvocation};

use crate::core::app::{App, TurnRequest};
use crate::core::attachments::ParseState;
use crate::core::config::data::path_display;
use crate::core::mention::short_agent_name;
use crate::core::message::MessageId;
use crate::core::mode::ChatMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Continue,
    ProcessAsMessage(String),
    Turn(TurnRequest),
    UploadAttachments,
    Quit,
}

pub fn process_input(app: &mut App, input: &str) -> CommandResult {
    let trimmed = input.trim();

    let Some(rest) = trimmed.strip_prefix('/') else {
        return CommandResult::ProcessAsMessage(input.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command_name = match parts.next() {
        Some(name) if !name.is_empty() => name,
        _ => return CommandResult::ProcessAsMessage(input.to_string()),
    };
    let args = parts.next().unwrap_or("").trim();

    match registry::find_command(command_name) {
        Some(command) => {
            let invocation = CommandInvocation {
                input: trimmed,
                args,
            };
            (command.handler)(app, invocation)
        }
        None => {
            app.set_status(format!("Unknown command: /{command_name}. Try /help."));
            CommandResult::Continue
        }
    }
}

pub(super) fn handle_help(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    let mut help = String::from("Commands:");
    for command in all_commands() {
        help.push_str(&format!("\n  {:<40} {}", command.usage, command.help));
    }
    help.push_str("\nCtrl+C cancels a streaming reply; at the prompt it quits.");
    app.set_status(help);
    CommandResult::Continue
}

pub(super) fn handle_mode(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    if invocation.args.is_empty() {
        app.set_status(format!("Mode: {}", app.mode()));
        return CommandResult::Continue;
    }
    match ChatMode::try_from(invocation.args) {
        Ok(mode) => {
            app.switch_mode(mode);
            app.set_status(format!("Switched to {mode} mode"));
        }
        Err(err) => app.set_status(err),
    }
    CommandResult::Continue
}

pub(super) fn handle_session(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    let status = match app.session_id() {
        Some(id) => format!("{} session: {id}", app.mode()),
        None => format!("{} session: (none yet)", app.mode()),
    };
    app.set_status(status);
    CommandResult::Continue
}

pub(super) fn handle_clear(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    app.clear_conversation();
    app.set_status(format!("Started a new {} conversation", app.mode()));
    CommandResult::Continue
}

pub(super) fn handle_approve(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    let waiting = app
        .conversation()
        .is_some_and(|conversation| conversation.awaiting_feedback().is_some());
    if !waiting {
        app.set_status("No agent is waiting for feedback.");
        return CommandResult::Continue;
    }
    CommandResult::Turn(TurnRequest::Approve)
}

pub(super) fn handle_to(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    let mut parts = invocation.args.splitn(2, char::is_whitespace);
    let agent = parts.next().unwrap_or("").trim_start_matches('@');
    let text = parts.next().unwrap_or("").trim();
    if agent.is_empty() || text.is_empty() {
        app.set_status("Usage: /to <agent> <feedback>");
        return CommandResult::Continue;
    }

    let Some(available) = app
        .conversation()
        .and_then(|conversation| conversation.awaiting_feedback())
        .map(|pending| pending.request.available_agents.clone())
    else {
        app.set_status("No agent is waiting for feedback.");
        return CommandResult::Continue;
    };
    let target = if available.is_empty() {
        Some(agent.to_string())
    } else {
        available
            .iter()
            .find(|name| {
                name.eq_ignore_ascii_case(agent) || short_agent_name(name).eq_ignore_ascii_case(agent)
            })
            .cloned()
    };

    match target {
        Some(target_agent) => CommandResult::Turn(TurnRequest::Feedback {
            text: text.to_string(),
            target_agent,
        }),
        None => {
            let names: Vec<&str> = available.iter().map(|name| short_agent_name(name)).collect();
            app.set_status(format!(
                "Unknown agent: {agent}. Waiting agents: {}",
                names.join(", ")
            ));
            CommandResult::Continue
        }
    }
}

pub(super) fn handle_history(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    let lines: Vec<String> = app
        .conversation()
        .map(|conversation| {
            conversation
                .messages()
                .iter()
                .filter(|message| message.is_user())
                .map(|message| format!("  [{}] {}", message.id, first_line(&message.content)))
                .collect()
        })
        .unwrap_or_default();

    if lines.is_empty() {
        app.set_status("No messages yet.");
    } else {
        app.set_status(format!("Your messages:\n{}", lines.join("\n")));
    }
    CommandResult::Continue
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn parse_message_id(app: &mut App, raw: &str) -> Option<MessageId> {
    match raw.parse::<MessageId>() {
        Ok(id) => Some(id),
        Err(_) => {
            app.set_status(format!("Not a message id: {raw}. See /history."));
            None
        }
    }
}

pub(super) fn handle_resend(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    let id = if invocation.args.is_empty() {
        app.conversation()
            .and_then(|conversation| conversation.last_user_message())
            .map(|message| message.id)
    } else {
        parse_message_id(app, invocation.args)
    };

    match id {
        Some(id) => CommandResult::Turn(TurnRequest::Resend(id)),
        None => {
            if invocation.args.is_empty() {
                app.set_status("Nothing to resend yet.");
            }
            CommandResult::Continue
        }
    }
}

pub(super) fn handle_edit(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    let mut parts = invocation.args.splitn(2, char::is_whitespace);
    let raw_id = parts.next().unwrap_or("");
    let text = parts.next().unwrap_or("").trim();
    if raw_id.is_empty() || text.is_empty() {
        app.set_status("Usage: /edit <id> <text>");
        return CommandResult::Continue;
    }
    match parse_message_id(app, raw_id) {
        Some(id) => CommandResult::Turn(TurnRequest::Edit {
            id,
            text: text.to_string(),
        }),
        None => CommandResult::Continue,
    }
}

pub(super) fn handle_attach(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    if invocation.args.is_empty() {
        app.set_status("Usage: /attach <path>");
        return CommandResult::Continue;
    }
    let id = app.attachments.add(invocation.args);
    app.set_status(format!("Uploading attachment {id}: {}", invocation.args));
    CommandResult::UploadAttachments
}

pub(super) fn handle_detach(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    match invocation.args.parse::<u64>() {
        Ok(id) if app.attachments.remove(id) => app.set_status(format!("Removed attachment {id}")),
        Ok(id) => app.set_status(format!("No attachment {id}")),
        Err(_) => app.set_status("Usage: /detach <id>"),
    }
    CommandResult::Continue
}

pub(super) fn handle_files(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    if app.attachments.is_empty() {
        app.set_status("No attachments queued.");
        return CommandResult::Continue;
    }
    let lines: Vec<String> = app
        .attachments
        .items()
        .iter()
        .map(|item| {
            let state = match &item.parse_state {
                ParseState::Pending => "uploading".to_string(),
                ParseState::Success(_) => "ready".to_string(),
                ParseState::Failed(reason) => format!("failed: {reason}"),
            };
            format!("  [{}] {} ({state})", item.client_id, item.display_name)
        })
        .collect();
    app.set_status(format!("Attachments:\n{}", lines.join("\n")));
    CommandResult::Continue
}

pub(super) fn handle_save(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    let status = match app.save_last_reply() {
        Ok(path) => format!("Saved reply to {}", path_display(path)),
        Err(err) => format!("Save failed: {err}"),
    };
    app.set_status(status);
    CommandResult::Continue
}

pub(super) fn handle_log(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    let parts: Vec<&str> = invocation.input.split_whitespace().collect();

    let status = match parts.len() {
        1 => match app.logging.toggle("Logging paused") {
            Ok(message) => message,
            Err(e) => format!("Log error: {e}"),
        },
        2 => match app.logging.set_log_file(parts[1]) {
            Ok(message) => message,
            Err(e) => format!("Logfile error: {e}"),
        },
        _ => "Usage: /log [filename]".to_string(),
    };
    app.set_status(status);
    CommandResult::Continue
}

pub(super) fn handle_quit(_app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    CommandResult::Quit
}
