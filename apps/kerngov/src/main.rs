//! # kerngov
//!
//! Command-line driver for the Kernel governance engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              apps/kerngov (THE BINARY)        │
//! │                                               │
//! │   ┌──────────────┐      ┌─────────────────┐   │
//! │   │  CLI (clap)  │ ───▶ │  config (TOML)  │   │
//! │   └──────┬───────┘      └─────────────────┘   │
//! │          ▼                                    │
//! │   ┌──────────────────────────────────────┐    │
//! │   │   kerngov-core  Runtime::apply       │    │
//! │   │   ledger · registry · governance db  │    │
//! │   └──────────────────────────────────────┘    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! kerngov init
//! kerngov apply -f create-k1.json
//! kerngov review-evidence K1 E1 --status verified --reviewer bob
//! kerngov status
//! kerngov verify
//! ```

use clap::Parser;
use kerngov::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // KERNGOV_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("KERNGOV_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_env("KERNGOV_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "kerngov=info,kerngov_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
