use std::io::Write;

use clap::Parser;
use parley::chat::ChatMessage;
use parley::orchestrator::Orchestrator;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::CliResult;
use crate::output::{OutputFormat, print_stream};

#[derive(Parser)]
pub struct ChatCommand {
    #[clap(long, short, help = "Start with web search enabled (toggle with /search)")]
    pub search: bool,

    #[clap(long, help = "Wait for whole replies instead of streaming them")]
    pub no_stream: bool,
}

/// One line of REPL input
#[derive(Debug, PartialEq, Eq)]
pub enum ReplInput {
    Message(String),
    ToggleSearch,
    Clear,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ReplInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ReplInput::Empty;
        }

        match trimmed {
            "/quit" | "/exit" => ReplInput::Quit,
            "/search" => ReplInput::ToggleSearch,
            "/clear" => ReplInput::Clear,
            "/help" => ReplInput::Help,
            cmd if cmd.starts_with('/') => ReplInput::Unknown(cmd.to_string()),
            text => ReplInput::Message(text.to_string()),
        }
    }
}

/// Input prompt, written to stderr. JSON mode shows none so stdout carries
/// only JSON lines.
fn repl_prompt(format: OutputFormat) -> Option<&'static str> {
    match format {
        OutputFormat::Table => Some("> "),
        OutputFormat::Json => None,
    }
}

const HELP: &str = "Commands: /search toggles web search, /clear resets the conversation, /quit exits";

impl ChatCommand {
    pub async fn execute(&self, orchestrator: &Orchestrator, format: OutputFormat) -> CliResult<()> {
        let mut history: Vec<ChatMessage> = Vec::new();
        let mut use_search = self.search;
        let stream_replies = !self.no_stream && !orchestrator.is_delegating();

        eprintln!(
            "Chatting with {} (search {}). {HELP}",
            orchestrator.provider_kind(),
            if use_search { "on" } else { "off" }
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            if let Some(prompt) = repl_prompt(format) {
                eprint!("{prompt}");
                std::io::stderr().flush()?;
            }

            let Some(line) = lines.next_line().await? else {
                break;
            };

            match ReplInput::parse(&line) {
                ReplInput::Empty => continue,
                ReplInput::Quit => break,
                ReplInput::Help => eprintln!("{HELP}"),
                ReplInput::Unknown(cmd) => eprintln!("Unknown command {cmd}. {HELP}"),
                ReplInput::Clear => {
                    history.clear();
                    eprintln!("Conversation cleared");
                }
                ReplInput::ToggleSearch => {
                    use_search = !use_search;
                    eprintln!("Web search {}", if use_search { "on" } else { "off" });
                }
                ReplInput::Message(text) => {
                    history.push(ChatMessage::user(text));

                    let outcome = self
                        .reply(orchestrator, &history, use_search, stream_replies, format)
                        .await;

                    match outcome {
                        Ok(reply) => history.push(ChatMessage::assistant(reply)),
                        Err(e) => {
                            // Keep history consistent so the turn can be retried.
                            history.pop();
                            eprintln!("Error: {e}");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn reply(
        &self,
        orchestrator: &Orchestrator,
        history: &[ChatMessage],
        use_search: bool,
        stream_replies: bool,
        format: OutputFormat,
    ) -> CliResult<String> {
        match format {
            OutputFormat::Json => {
                let reply = orchestrator.generate_reply(history, use_search).await?;
                println!("{}", serde_json::to_string(&reply)?);
                Ok(reply.reply)
            }
            OutputFormat::Table if stream_replies => {
                let stream = orchestrator.generate_response_streaming(history.to_vec(), use_search)?;
                print_stream(stream).await
            }
            OutputFormat::Table => {
                let reply = orchestrator.generate_response(history, use_search).await?;
                println!("{reply}");
                Ok(reply)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repl_input() {
        assert_eq!(ReplInput::parse("  "), ReplInput::Empty);
        assert_eq!(ReplInput::parse("/exit"), ReplInput::Quit);
        assert_eq!(ReplInput::parse("/quit\n"), ReplInput::Quit);
        assert_eq!(ReplInput::parse("/search"), ReplInput::ToggleSearch);
        assert_eq!(ReplInput::parse("/clear"), ReplInput::Clear);
        assert_eq!(
            ReplInput::parse("/nope"),
            ReplInput::Unknown("/nope".to_string())
        );
        assert_eq!(
            ReplInput::parse("  what's new in Rust?  "),
            ReplInput::Message("what's new in Rust?".to_string())
        );
    }

    #[test]
    fn test_json_mode_has_no_prompt() {
        assert_eq!(repl_prompt(OutputFormat::Json), None);
        assert_eq!(repl_prompt(OutputFormat::Table), Some("> "));
    }
}
