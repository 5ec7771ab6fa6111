//! Convoy CLI definition
//!
//! Usage: convoy deploy <ENVIRONMENT> [--platform <P>] [--timeout <S>]
//! [--dirty] [--fast] [--check-only]

use clap::{Parser, Subcommand};

/// Convoy - dependency-ordered configuration deployment
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy an environment
    Deploy {
        /// Name of the environment to deploy
        environment: String,

        /// Platform override for the environment
        #[arg(long)]
        platform: Option<String>,

        /// Connection timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Deploy even when the working copy has uncommitted changes
        #[arg(long)]
        dirty: bool,

        /// Skip repository verification and synchronization
        #[arg(long)]
        fast: bool,

        /// Stop after configuring and bootstrapping the first host
        #[arg(long)]
        check_only: bool,
    },
}
