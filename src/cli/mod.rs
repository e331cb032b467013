// src/cli/mod.rs — CLI definition (clap derive)

pub mod chat;
pub mod progress;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "riff", about = "Live-code music by chatting with a model", version)]
pub struct Cli {
    /// Model to use (provider/model, e.g. anthropic/claude-sonnet-4-5-20250929)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Audio engine command (speaks JSON-RPC over stdio)
    #[arg(long)]
    pub player: Option<String>,

    /// Correction rounds after a pattern fails to evaluate
    #[arg(long)]
    pub max_corrections: Option<u32>,

    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive session (default)
    Chat,
    /// Print the pattern found in text read from stdin
    Extract {
        /// Accepted fence tags (repeatable); defaults to the configured set
        #[arg(short, long = "lang")]
        languages: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_chat() {
        let cli = Cli::parse_from(["riff"]);
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_overrides_parse() {
        let cli = Cli::parse_from([
            "riff",
            "--model",
            "openai/gpt-4.1",
            "--max-corrections",
            "0",
            "--player",
            "./engine",
        ]);
        assert_eq!(cli.model.as_deref(), Some("openai/gpt-4.1"));
        assert_eq!(cli.max_corrections, Some(0));
        assert_eq!(cli.player.as_deref(), Some("./engine"));
    }

    #[test]
    fn test_extract_languages() {
        let cli = Cli::parse_from(["riff", "extract", "--lang", "strudel", "-l", "tidal"]);
        match cli.command {
            Some(Commands::Extract { languages }) => assert_eq!(languages, vec!["strudel", "tidal"]),
            _ => panic!("expected extract"),
        }
    }
}
