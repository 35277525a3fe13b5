//! Command-line argument parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "harbor-replication")]
#[command(about = "Inspect and dry-run container registry replication policies")]
#[command(version)]
pub struct Args {
    /// Configuration file path (JSON)
    #[arg(long = "config", global = true, help = "Path to configuration file")]
    pub config: Option<String>,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(long = "quiet", short = 'q', global = true, help = "Only print errors")]
    pub quiet: bool,

    /// Structured logs
    #[arg(long = "json-logs", global = true, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Match candidates against a name or tag pattern
    Match {
        /// Pattern such as `library/**` or `v1.{0,1}.?`
        pattern: String,
        /// Candidates to test
        #[arg(required = true)]
        candidates: Vec<String>,
    },
    /// Validate a replication policy
    CheckPolicy {
        #[arg(long = "policy", short = 'p', help = "Path to the policy JSON file")]
        policy: String,
    },
    /// Show the tasks a policy would create for a resource listing
    Plan {
        #[arg(long = "policy", short = 'p', help = "Path to the policy JSON file")]
        policy: String,
        #[arg(long = "resources", short = 'r', help = "Path to the resources JSON file")]
        resources: String,
    },
    /// Check whether a registry is reachable
    Health {
        #[arg(long = "registry", help = "Path to the registry JSON file")]
        registry: String,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("--verbose and --quiet cannot be used together".to_string());
        }
        let files: Vec<&String> = match &self.command {
            Command::Match { .. } => Vec::new(),
            Command::CheckPolicy { policy } => vec![policy],
            Command::Plan { policy, resources } => vec![policy, resources],
            Command::Health { registry } => vec![registry],
        };
        for file in files.into_iter().chain(self.config.iter()) {
            if !std::path::Path::new(file).exists() {
                return Err(format!("File does not exist: {}", file));
            }
        }
        Ok(())
    }
}
