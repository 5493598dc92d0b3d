//! Realm server entry point.
//!
//! Parses the command line, sets up logging and hands control to the
//! bootstrap coordinator. This is the only place the process exits with a
//! failure status.

mod cli;
mod logging;
mod signals;

use cli::CliArgs;
use realm_bootstrap::{
    standard_pipeline, BootstrapCoordinator, ConfigSource, ErrorEscalation, ServerContext,
    EXIT_FAILURE,
};
use std::io::IsTerminal;
use std::process;
use tracing::{error, info};

fn main() {
    let args = CliArgs::parse();

    if let Err(e) = logging::setup_logging(&args.log_level, args.json_logs) {
        eprintln!("Failed to initialize logging: {:#}", e);
        process::exit(EXIT_FAILURE);
    }

    let interactive = !args.non_interactive && std::io::stdin().is_terminal();
    let escalation = ErrorEscalation::new(interactive);

    let coordinator = BootstrapCoordinator::new();
    let context = ServerContext::new(
        ConfigSource {
            path: args.config_path,
            data_directory: args.data_dir,
        },
        coordinator.handles(),
    );

    match coordinator.run(standard_pipeline(), context, signals::shutdown_signal()) {
        Ok(()) => info!("Server shut down cleanly"),
        Err(e) if e.is_fatal() => escalation.escalate(&e),
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    }
}
