//! Command-line entry points.

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;
use crate::runtime::Runtime;

#[derive(Debug, Parser)]
#[command(name = "palaver", version, about = "Streaming conversational agent")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the agent (default).
    Run,
    /// Write a commented default config file.
    Init,
    /// Ask a single question and print the answer.
    Ask {
        /// The prompt to send.
        prompt: String,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command.unwrap_or(Command::Run) {
            Command::Run => {
                let runtime = Runtime::new(Config::load()?)?;
                runtime.run().await
            }
            Command::Init => {
                let path = Config::init()?;
                println!("wrote {}", path.display());
                Ok(())
            }
            Command::Ask { prompt } => {
                let runtime = Runtime::new(Config::load()?)?;
                let answer = runtime.ask(&prompt).await?;
                println!("{answer}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::parse_from(["palaver"]);
        assert!(matches!(cli.command, None));
    }

    #[test]
    fn parses_ask_with_prompt() {
        let cli = Cli::parse_from(["palaver", "ask", "what time is it"]);
        assert!(matches!(
            cli.command,
            Some(Command::Ask { prompt }) if prompt == "what time is it"
        ));
    }
}
