use clap::Parser;
use parley::chat::ChatMessage;
use parley::orchestrator::Orchestrator;

use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, print_stream};

#[derive(Parser)]
pub struct AskCommand {
    #[clap(required = true, help = "Question to ask")]
    pub prompt: Vec<String>,

    #[clap(long, short, help = "Augment the prompt with web search results")]
    pub search: bool,

    #[clap(long, help = "Wait for the whole reply instead of streaming it")]
    pub no_stream: bool,
}

impl AskCommand {
    pub async fn execute(&self, orchestrator: &Orchestrator, format: OutputFormat) -> CliResult<()> {
        let question = self.prompt.join(" ");
        if question.trim().is_empty() {
            return Err(CliError::from("Question must not be empty"));
        }
        let transcript = vec![ChatMessage::user(question)];

        match format {
            OutputFormat::Json => {
                let reply = orchestrator.generate_reply(&transcript, self.search).await?;
                println!("{}", serde_json::to_string_pretty(&reply)?);
            }
            OutputFormat::Table => {
                if self.no_stream || orchestrator.is_delegating() {
                    let reply = orchestrator
                        .generate_response(&transcript, self.search)
                        .await?;
                    println!("{reply}");
                } else {
                    let stream =
                        orchestrator.generate_response_streaming(transcript, self.search)?;
                    print_stream(stream).await?;
                }
            }
        }

        Ok(())
    }
}
