use super::CommandResult;
use crate::core::app::App;

pub type CommandHandler = fn(&mut App, CommandInvocation<'_>) -> CommandResult;

pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub handler: CommandHandler,
}

#[derive(Clone, Copy)]
pub struct CommandInvocation<'a> {
    pub input: &'a str,
    pub args: &'a str,
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

pub fn find_command(name: &str) -> Option<&'static Command> {
    all_commands()
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        usage: "/help",
        help: "Show available commands.",
        handler: super::handle_help,
    },
    Command {
        name: "mode",
        usage: "/mode [normal|orchestration|testcase]",
        help: "Show or switch the chat mode. Each mode keeps its own conversation.",
        handler: super::handle_mode,
    },
    Command {
        name: "session",
        usage: "/session",
        help: "Show the backend session id for the current mode.",
        handler: super::handle_session,
    },
    Command {
        name: "clear",
        usage: "/clear",
        help: "Start over: drop this mode's history and forget its session.",
        handler: super::handle_clear,
    },
    Command {
        name: "approve",
        usage: "/approve",
        help: "Approve the work an agent is waiting on.",
        handler: super::handle_approve,
    },
    Command {
        name: "to",
        usage: "/to <agent> <feedback>",
        help: "Send feedback addressed to one agent.",
        handler: super::handle_to,
    },
    Command {
        name: "history",
        usage: "/history",
        help: "List your messages with the ids used by /resend and /edit.",
        handler: super::handle_history,
    },
    Command {
        name: "resend",
        usage: "/resend [id]",
        help: "Send an earlier message again (default: the last one).",
        handler: super::handle_resend,
    },
    Command {
        name: "edit",
        usage: "/edit <id> <text>",
        help: "Rewrite an earlier message and send it again.",
        handler: super::handle_edit,
    },
    Command {
        name: "attach",
        usage: "/attach <path>",
        help: "Upload a file for parsing; it is sent with your next message.",
        handler: super::handle_attach,
    },
    Command {
        name: "detach",
        usage: "/detach <id>",
        help: "Remove a queued attachment.",
        handler: super::handle_detach,
    },
    Command {
        name: "files",
        usage: "/files",
        help: "List queued attachments and their parse state.",
        handler: super::handle_files,
    },
    Command {
        name: "save",
        usage: "/save",
        help: "Save the latest reply as a markdown file.",
        handler: super::handle_save,
    },
    Command {
        name: "log",
        usage: "/log [filename]",
        help: "Set the transcript file, or pause and resume logging.",
        handler: super::handle_log,
    },
    Command {
        name: "quit",
        usage: "/quit",
        help: "Leave the chat.",
        handler: super::handle_quit,
    },
];
