use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engram_domain::config::Config;
use engram_gateway::bootstrap::{run_server, BindError};

// Exit codes: 0 success, 1 generic error, 64 bad usage, 69 service
// unavailable.
const EXIT_USAGE: i32 = 64;
const EXIT_UNAVAILABLE: i32 = 69;

#[derive(Parser)]
#[command(name = "engram", about = "Engram — persistent memory kernel for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (default).
    Serve,
    /// Create the data directory and run migrations, then exit.
    Init,
    /// Print the version.
    Version,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help/version requests are not usage errors.
            if err.use_stderr() {
                let _ = err.print();
                std::process::exit(EXIT_USAGE);
            }
            let _ = err.print();
            return;
        }
    };

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Arc::new(Config::from_env());
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("engram: failed to start runtime: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = runtime.block_on(run_server(config)) {
                let code = if e.chain().any(|cause| cause.is::<BindError>()) {
                    EXIT_UNAVAILABLE
                } else {
                    1
                };
                eprintln!("engram: {e:#}");
                std::process::exit(code);
            }
        }
        Some(Command::Init) => {
            init_tracing();
            let config = Config::from_env();
            match engram_store::Store::open(&config.db_path()) {
                Ok(_) => {
                    println!("initialized {}", config.data_dir.display());
                }
                Err(e) => {
                    eprintln!("engram: init failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Version) => {
            println!("engram {}", env!("CARGO_PKG_VERSION"));
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,engram_gateway=debug")),
        )
        .init();
}
