//! pagechat - ask questions about an uploaded document from the terminal

mod commands;
mod config;

use clap::Parser;
use pagechat_chat::{
    Chat, ChatConfig, ChatEvent, ConversationEntry, EntryStatus, HttpTransport, Outcome, ReplySource, Role,
};
use pagechat_wire::MetadataPlacement;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, broadcast::error::RecvError, mpsc};

/// pagechat - ask questions about an uploaded document
#[derive(Parser, Debug)]
#[command(name = "pagechat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL (default: http://localhost:5000)
    #[arg(short, long)]
    server: Option<String>,

    /// Document index to ask questions against
    #[arg(short, long)]
    index: Option<String>,

    /// Your field of study
    #[arg(short, long)]
    major: Option<String>,

    /// API key forwarded to the backend
    #[arg(long)]
    api_key: Option<String>,

    /// Ask a single question and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Summarize a document and exit
    #[arg(long, value_name = "FILE")]
    summarize: Option<String>,

    /// Expect the metadata before the answer text
    #[arg(long)]
    leading_metadata: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pagechat=debug,pagechat_chat=debug,pagechat_wire=debug")
            .with_writer(io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut cfg = config::Config::load();

    // CLI args take precedence over the config file
    if args.api_key.is_some() {
        cfg.api_key = args.api_key.clone();
    }
    let server = args
        .server
        .clone()
        .or(cfg.server_url.clone())
        .unwrap_or_else(|| "http://localhost:5000".to_string());

    let mut decoder = cfg.decoder_config();
    if args.leading_metadata {
        decoder.placement = MetadataPlacement::Leading;
    }

    let transport = match HttpTransport::new(&server) {
        Ok(t) => Arc::new(t.with_retry_config(cfg.retry_config())),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let chat_config = ChatConfig {
        index: args.index.clone().or(cfg.index.clone()),
        credentials: cfg.credentials(args.major.clone()),
        decoder,
    };
    let mut chat = Chat::new(chat_config, transport);
    chat.on_reply_complete(|source| {
        if let Some(source) = source.source() {
            tracing::debug!(document = ?source.document_id, page = ?source.page, "reply source");
        }
    });

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(chat.subscribe(), done_tx));

    if let Some(file) = args.summarize {
        run_exchange(&chat, Request::Summarize(&file), &mut done_rx).await;
    } else if let Some(question) = args.command {
        println!("pagechat> {}", question);
        println!();
        run_exchange(&chat, Request::Ask(&question), &mut done_rx).await;
    } else {
        run_interactive(&mut chat, &server, &mut done_rx).await?;
    }

    printer.abort();
    Ok(())
}

enum Request<'a> {
    Ask(&'a str),
    Summarize(&'a str),
}

/// Run one exchange, aborting it on Ctrl-C, and wait for its output to be printed
async fn run_exchange(chat: &Chat, request: Request<'_>, done_rx: &mut mpsc::UnboundedReceiver<()>) {
    // Drop acknowledgements left over from resets
    while done_rx.try_recv().is_ok() {}

    let exchange = async {
        match request {
            Request::Ask(question) => chat.ask(question).await,
            Request::Summarize(file) => chat.summarize(file).await,
        }
    };
    tokio::pin!(exchange);

    let finished = tokio::select! {
        result = &mut exchange => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            chat.abort();
            exchange.await
        }
    };

    match result {
        Ok(outcome) => {
            // Every outcome is announced by exactly one terminal event, unless
            // the printer lagged past it
            let _ = tokio::time::timeout(Duration::from_secs(2), done_rx.recv()).await;
            tracing::debug!(?outcome, "exchange finished");
            if let Outcome::Failed(_) = outcome {
                println!("(partial answer kept in /history)");
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_missing_config() {
                eprintln!("Set it with a command-line flag or in the config file: pagechat --init-config");
            }
        }
    }
}

async fn print_events(mut receiver: broadcast::Receiver<ChatEvent>, done_tx: mpsc::UnboundedSender<()>) {
    let is_tty = std::io::IsTerminal::is_terminal(&io::stdout());
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event printer lagged, {} events skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let terminal = event.is_terminal();
        match event {
            ChatEvent::ExchangeStarted { question, .. } => {
                tracing::debug!(%question, "exchange started");
            }
            ChatEvent::AnswerUpdated { delta, .. } => {
                print!("{}", delta);
                io::stdout().flush().ok();
            }
            ChatEvent::ReplyCompleted { cost, source, .. } => {
                println!();
                if is_tty {
                    println!("[{} | ${:.4}]", describe_source(&source), cost);
                }
            }
            ChatEvent::ExchangeFailed { message, .. } => {
                println!();
                eprintln!("Error: {}", message);
            }
            ChatEvent::ConversationReset => {}
        }
        if terminal && done_tx.send(()).is_err() {
            break;
        }
    }
}

fn describe_source(source: &ReplySource) -> String {
    match source.source() {
        Some(s) => {
            let document = s.document_id.as_deref().unwrap_or("document");
            match s.page {
                Some(page) => format!("{}, page {}", document, page),
                None => document.to_string(),
            }
        }
        None => "no sources".to_string(),
    }
}

fn print_history(entries: &[ConversationEntry]) {
    if entries.is_empty() {
        println!("No messages yet.");
        return;
    }
    for (i, entry) in entries.iter().enumerate() {
        let role = match entry.role {
            Role::Question => "you",
            Role::Answer => "assistant",
        };
        let preview: String = entry.text.chars().take(60).collect();
        let preview = preview.replace('\n', " ");
        if entry.status == EntryStatus::Complete {
            println!("  {}: [{}] {}", i, role, preview);
        } else {
            println!("  {}: [{}, {}] {}", i, role, entry.status, preview);
        }
    }
}

async fn run_interactive(
    chat: &mut Chat,
    server: &str,
    done_rx: &mut mpsc::UnboundedReceiver<()>,
) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        match chat.config().index.as_deref() {
            Some(index) => eprintln!("pagechat ({}) index: {}", server, index),
            None => eprintln!("pagechat ({}) no index selected, use /index <name>", server),
        }
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::parse_command(input) {
            match result {
                commands::CommandResult::Clear => {
                    chat.reset();
                    println!("Cleared conversation.");
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::History => {
                    print_history(&chat.entries());
                }
                commands::CommandResult::SetIndex(index) => {
                    println!("Asking questions against: {}", index);
                    chat.set_index(index);
                }
                commands::CommandResult::Summarize(file) => {
                    println!();
                    run_exchange(chat, Request::Summarize(&file), done_rx).await;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        run_exchange(chat, Request::Ask(input), done_rx).await;
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagechat_wire::SourceRef;

    #[test]
    fn test_describe_source() {
        let source = ReplySource::Source(SourceRef::document("notes.pdf").with_page(4));
        assert_eq!(describe_source(&source), "notes.pdf, page 4");
        assert_eq!(describe_source(&ReplySource::NoSources), "no sources");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["pagechat", "--index", "notes", "-m", "Biology", "--leading-metadata"]);
        assert_eq!(args.index.as_deref(), Some("notes"));
        assert_eq!(args.major.as_deref(), Some("Biology"));
        assert!(args.leading_metadata);
        assert!(args.command.is_none());
    }

    #[tokio::test]
    async fn test_printer_keeps_acknowledging_after_lag() {
        let (tx, rx) = broadcast::channel(1);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        for delta in ["a", "b", "c"] {
            tx.send(ChatEvent::AnswerUpdated {
                index: 1,
                delta: delta.into(),
            })
            .unwrap();
        }
        let printer = tokio::spawn(print_events(rx, done_tx));

        tx.send(ChatEvent::ExchangeFailed {
            index: 1,
            message: "request aborted".into(),
        })
        .unwrap();
        let acked = tokio::time::timeout(Duration::from_secs(1), done_rx.recv()).await;
        assert_eq!(acked.unwrap(), Some(()));

        drop(tx);
        printer.await.unwrap();
    }
}
