//! Slash commands for interactive mode

/// Result of parsing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Clear the conversation
    Clear,
    /// Summarize a document
    Summarize(String),
    /// Switch the document index questions go to
    SetIndex(String),
    /// Print the conversation so far
    History,
    /// Show a message to the user (not sent to the backend)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for plain questions.
pub fn parse_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "history" => CommandResult::History,

        "summarize" | "sum" => {
            if args.is_empty() {
                CommandResult::Message("Usage: /summarize <file>".to_string())
            } else {
                CommandResult::Summarize(args.to_string())
            }
        }

        "index" | "i" => {
            if args.is_empty() {
                CommandResult::Message("Usage: /index <name>".to_string())
            } else {
                CommandResult::SetIndex(args.to_string())
            }
        }

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?            Show this help message
  /index, /i <name>        Ask questions against another document index
  /summarize, /sum <file>  Summarize an uploaded document
  /history                 Show the conversation so far
  /clear, /c               Clear the conversation
  /quit, /exit, /q         Exit

Anything else is sent as a question. Ctrl-C cancels a running answer."#
        .to_string()
}
