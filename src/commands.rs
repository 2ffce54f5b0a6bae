//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a [`Cli`] struct that represents the parsed command-line arguments,
//! and a [`Commands`] enum with the available subcommands.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use anime_recommender::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Recommend { query, .. } = cli.command {
//!     println!("looking for {query}");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to `config.yaml`; defaults to the per-platform config directory.
    #[arg(long, short = 'c', global = true, env = "ANIMEREC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the sentence-embedding model files.
    #[arg(long, global = true, env = "ANIMEREC_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config file and prompt template.
    Init {
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },

    /// Process the raw catalog and build the vector index.
    #[clap(name = "build", alias = "b")]
    Build {
        /// Raw catalog CSV; overrides `raw_catalog_path`.
        #[arg(long)]
        raw: Option<PathBuf>,
    },

    /// Recommend anime for one query.
    #[clap(name = "recommend", alias = "r")]
    Recommend {
        /// What you feel like watching.
        query: String,

        /// Build the index first when it is missing.
        #[arg(long)]
        build_if_missing: bool,
    },

    /// Ask for recommendations in a loop until EOF or `exit`.
    #[clap(name = "interactive", alias = "i")]
    Interactive {
        /// Build the index first when it is missing.
        #[arg(long)]
        build_if_missing: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_recommend_alias() {
        let cli = Cli::try_parse_from(["animerec", "r", "dark fantasy", "--build-if-missing"]).unwrap();
        match cli.command {
            Commands::Recommend {
                query,
                build_if_missing,
            } => {
                assert_eq!(query, "dark fantasy");
                assert!(build_if_missing);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["animerec", "build", "--config", "/tmp/c.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert!(matches!(cli.command, Commands::Build { raw: None }));
    }
}
