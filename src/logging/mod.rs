//! Logging and console output
//!
//! Diagnostics go through `tracing`; [`init`] installs the subscriber once per
//! process. [`Console`] prints the user-facing output of the command line
//! tool and honours the quiet and verbose switches.

use crate::config::LoggingConfig;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber. `RUST_LOG` takes precedence over
/// the configured level. Later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        let result = if config.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        if let Err(e) = result {
            eprintln!("logging was already initialized: {}", e);
        }
    });
}

/// User-visible output of the command line tool
#[derive(Debug, Clone)]
pub struct Console {
    pub verbose: bool,
    pub quiet: bool,
}

impl Console {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }

    pub fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n=== {} ===", title);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("ℹ️  {}", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("✅ {}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("⚠️  WARNING: {}", message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("❌ ERROR: {}", message);
    }

    /// Only shown in verbose mode
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("   {}", message);
        }
    }

    pub fn list(&self, title: &str, items: &[String]) {
        if !self.quiet {
            for line in list_lines(title, items) {
                println!("{}", line);
            }
        }
    }

    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        if !self.quiet {
            println!("\n--- {} ---", title);
            for (key, value) in items {
                println!("  {}: {}", key, value);
            }
        }
    }
}

fn list_lines(title: &str, items: &[String]) -> Vec<String> {
    let mut lines = vec![format!("\n--- {} ---", title)];
    if items.is_empty() {
        lines.push("  (No items to display)".to_string());
    }
    lines.extend(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("  {}. {}", i + 1, item)),
    );
    lines
}

/// Human readable duration, e.g. `1m5s`, `250ms`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
