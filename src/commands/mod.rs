//! Operator commands.
//!
//! Commands are plain text lines (`/add_keyword sell+iphone`). Parsing is
//! pure; [`execute`] applies a command to a [`RelayContext`] and returns
//! the reply text.

pub mod cli;

use std::fmt::Write as _;

use tracing::error;

use crate::context::RelayContext;
use crate::error::{ConfigError, Error};

pub use cli::CliCommands;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Channels,
    AddChannel { id: String, name: Option<String> },
    RemoveChannel(String),
    Keywords,
    AddKeyword(String),
    RemoveKeyword(String),
    StopWords,
    AddStopWord(String),
    RemoveStopWord(String),
    Reset(String),
    Help,
    Quit,
}

/// Why a line could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    MissingArgument { command: &'static str, usage: &'static str },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(cmd) => write!(f, "Unknown command {cmd}. Type /help for the list."),
            Self::MissingArgument { command, usage } => write!(f, "{command} needs an argument: {usage}"),
        }
    }
}

pub const HELP: &str = "\
/start                      start monitoring
/stop                       stop monitoring
/status                     show relay status
/channels                   list source channels
/add_channel <id> [name]    add a channel (@handle, t.me link or numeric id)
/remove_channel <id>        remove a channel
/keywords                   list keywords
/add_keyword <word>         add a keyword (a+b needs both parts)
/remove_keyword <word>      remove a keyword
/stopwords                  list stop-words
/add_stopword <word>        add a stop-word
/remove_stopword <word>     remove a stop-word
/reset <id>                 forget processed messages of a channel
/help                       this list
/quit                       exit";

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let arg = |command: &'static str, usage: &'static str| {
            if rest.is_empty() {
                Err(ParseError::MissingArgument { command, usage })
            } else {
                Ok(rest.to_string())
            }
        };

        Ok(match head.to_lowercase().as_str() {
            "/start" => Self::Start,
            "/stop" => Self::Stop,
            "/status" => Self::Status,
            "/channels" => Self::Channels,
            "/add_channel" => {
                let rest = arg("/add_channel", "/add_channel <id> [name]")?;
                match rest.split_once(char::is_whitespace) {
                    Some((id, name)) => Self::AddChannel {
                        id: id.to_string(),
                        name: Some(name.trim().to_string()),
                    },
                    None => Self::AddChannel { id: rest, name: None },
                }
            }
            "/remove_channel" => Self::RemoveChannel(arg("/remove_channel", "/remove_channel <id>")?),
            "/keywords" => Self::Keywords,
            "/add_keyword" => Self::AddKeyword(arg("/add_keyword", "/add_keyword <word>")?),
            "/remove_keyword" => Self::RemoveKeyword(arg("/remove_keyword", "/remove_keyword <word>")?),
            "/stopwords" => Self::StopWords,
            "/add_stopword" => Self::AddStopWord(arg("/add_stopword", "/add_stopword <word>")?),
            "/remove_stopword" => {
                Self::RemoveStopWord(arg("/remove_stopword", "/remove_stopword <word>")?)
            }
            "/reset" => Self::Reset(arg("/reset", "/reset <id>")?),
            "/help" => Self::Help,
            "/quit" | "/exit" | "/shutdown" => Self::Quit,
            _ => return Err(ParseError::Unknown(head.to_string())),
        })
    }
}

/// Apply a command and render the reply. Errors become reply text.
pub async fn execute(ctx: &RelayContext, command: Command) -> String {
    match run(ctx, command).await {
        Ok(reply) => reply,
        Err(Error::Config(e @ (ConfigError::InvalidChannel(_) | ConfigError::BlankEntry { .. }))) => {
            format!("Rejected: {e}")
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            format!("Error: {e}")
        }
    }
}

async fn run(ctx: &RelayContext, command: Command) -> Result<String, Error> {
    Ok(match command {
        Command::Start => {
            if ctx.start().await {
                "Monitoring started.".into()
            } else {
                "Monitoring is already running.".into()
            }
        }
        Command::Stop => {
            if ctx.stop().await {
                "Monitoring stopped. The current channel will finish first.".into()
            } else {
                "Monitoring is not running.".into()
            }
        }
        Command::Status => ctx.status().await?.to_string(),
        Command::Channels => {
            let channels = ctx.channels().await?;
            if channels.is_empty() {
                return Ok("No channels configured.".into());
            }
            let mut out = format!("Channels ({}):", channels.len());
            for channel in &channels {
                let _ = match &channel.name {
                    Some(name) => write!(out, "\n  {} ({name})", channel.id),
                    None => write!(out, "\n  {}", channel.id),
                };
            }
            out
        }
        Command::AddChannel { id, name } => {
            let id = ctx.add_channel(&id, name.as_deref()).await?;
            format!("Channel {id} added.")
        }
        Command::RemoveChannel(id) => removed(ctx.remove_channel(&id).await?, "Channel", &id),
        Command::Keywords => list("Keywords", ctx.keywords().await?.into_iter().map(|k| k.text)),
        Command::AddKeyword(text) => format!("Keyword \"{}\" added.", ctx.add_keyword(&text).await?),
        Command::RemoveKeyword(text) => removed(ctx.remove_keyword(&text).await?, "Keyword", &text),
        Command::StopWords => list("Stop-words", ctx.stopwords().await?.into_iter().map(|s| s.text)),
        Command::AddStopWord(text) => {
            format!("Stop-word \"{}\" added.", ctx.add_stopword(&text).await?)
        }
        Command::RemoveStopWord(text) => {
            removed(ctx.remove_stopword(&text).await?, "Stop-word", &text)
        }
        Command::Reset(id) => {
            let count = ctx.reset_channel(&id).await?;
            format!("Forgot {count} processed message(s) for {id}.")
        }
        Command::Help => HELP.to_string(),
        Command::Quit => "Bye.".into(),
    })
}

fn removed(found: bool, what: &str, name: &str) -> String {
    if found {
        format!("{what} {name} removed.")
    } else {
        format!("{what} {name} not found.")
    }
}

fn list(title: &str, items: impl Iterator<Item = String>) -> String {
    let items: Vec<String> = items.collect();
    if items.is_empty() {
        return format!("{title}: none.");
    }
    let mut out = format!("{title} ({}):", items.len());
    for item in items {
        out.push_str("\n  ");
        out.push_str(&item);
    }
    out
}
