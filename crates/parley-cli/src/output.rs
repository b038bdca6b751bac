use std::io::Write;

use futures::StreamExt;
use parley::stream::{ReplyEvent, ReplyStream};

use crate::error::{CliError, CliResult};

#[derive(Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Shorten `s` to at most `max_len` characters, marking the cut with "..."
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Show whether a secret is present without printing it
pub fn secret_status(value: Option<&str>) -> &'static str {
    match value {
        Some(v) if !v.trim().is_empty() => "set",
        _ => "(not set)",
    }
}

/// Print reply chunks to stdout as they arrive and return the final text.
///
/// A retry notice goes to stderr; the replayed reply then starts on a new
/// line.
pub async fn print_stream(mut stream: ReplyStream) -> CliResult<String> {
    let mut stdout = std::io::stdout();

    while let Some(event) = stream.next().await {
        match event {
            ReplyEvent::Chunk(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            ReplyEvent::Retrying { attempt, .. } => {
                writeln!(stdout)?;
                eprintln!("[connection interrupted, retrying (attempt {attempt})]");
            }
            ReplyEvent::Completed(text) => {
                writeln!(stdout)?;
                return Ok(text);
            }
            ReplyEvent::Failed(e) => {
                writeln!(stdout)?;
                return Err(e.into());
            }
        }
    }

    Err(CliError::from("Reply stream ended unexpectedly"))
}
