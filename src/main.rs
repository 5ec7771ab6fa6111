//! Convoy CLI - dependency-ordered configuration deployment
//!
//! Usage: convoy deploy <ENVIRONMENT>

use clap::Parser;

use convoy::cli::{Cli, Commands};
use convoy::deploy::{self, DeployOptions};

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Deploy {
            environment,
            platform,
            timeout,
            dirty,
            fast,
            check_only,
        } => {
            let mut options = DeployOptions::new(environment);
            options.platform = platform;
            options.timeout = timeout;
            options.dirty = dirty;
            options.fast = fast;
            options.check_only = check_only;
            options.verbose = cli.verbose > 0;
            deploy::run(options)
        }
    };

    std::process::exit(code);
}
