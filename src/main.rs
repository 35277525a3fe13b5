//! Command line entry point for the replication tooling

use harbor_replication::cli::{Args, Runner};
use harbor_replication::config::ReplicationConfig;
use harbor_replication::error::Result;
use harbor_replication::logging::{self, Console};

#[tokio::main]
async fn main() {
    let args = Args::parse_args();
    let console = if args.quiet {
        Console::new_quiet()
    } else {
        Console::new(args.verbose)
    };

    if let Err(e) = run(args).await {
        console.error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ReplicationConfig::from_file(path)?,
        None => ReplicationConfig::from_env()?,
    };
    if args.json_logs {
        config.logging.json = true;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    logging::init(&config.logging);

    Runner::new(args, config).run().await
}
