//! CLI command surface: stdin/stdout REPL for operating the relay.

use std::io::Write;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use crate::commands::{Command, execute};
use crate::context::RelayContext;

const PROMPT: &str = "> ";

/// Reads operator commands from stdin and prints replies to stdout.
pub struct CliCommands {
    ctx: Arc<RelayContext>,
}

impl CliCommands {
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        Self { ctx }
    }

    /// Serve commands until `/quit` or EOF. Returns `true` on `/quit`.
    pub async fn run(&self) -> bool {
        match self.serve(stdin_lines(), &mut std::io::stdout()).await {
            Ok(quit) => quit,
            Err(e) => {
                error!("Error writing to stdout: {}", e);
                false
            }
        }
    }

    /// Answer each line of `lines` on `out`, prompting once per line read.
    async fn serve<W: Write>(
        &self,
        lines: impl Stream<Item = String>,
        out: &mut W,
    ) -> std::io::Result<bool> {
        let mut lines = Box::pin(lines);
        prompt(out)?;
        while let Some(line) = lines.next().await {
            let line = line.trim();
            if !line.is_empty() {
                match Command::parse(line) {
                    Ok(Command::Quit) => return Ok(true),
                    Ok(command) => writeln!(out, "{}\n", execute(&self.ctx, command).await)?,
                    Err(e) => writeln!(out, "{e}\n")?,
                }
            }
            prompt(out)?;
        }
        Ok(false)
    }
}

fn prompt<W: Write>(out: &mut W) -> std::io::Result<()> {
    out.write_all(PROMPT.as_bytes())?;
    out.flush()
}

/// Raw stdin lines. Ends on EOF or a read error.
fn stdin_lines() -> impl Stream<Item = String> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|line| (line, rx)) })
}
