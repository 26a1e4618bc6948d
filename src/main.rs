//! meshcoord CLI entry point
//!
//! Started once per job member by the launcher (srun, aprun, mpirun...).

use meshcoord::config::{self, cli::Cli};
use meshcoord::job::{run_job, JobFailure};
use meshcoord::pmi::env::EnvLauncher;
use meshcoord::util::abort::{abort_pair, install_signal_handlers};
use std::io::Write;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(failure) => {
            eprintln!("{}", failure);
            1
        }
    };

    std::process::exit(code);
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the default level
fn init_logging(verbose: bool) {
    let default = if verbose { "meshcoord=debug" } else { "meshcoord=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<i32, JobFailure> {
    cli.validate().map_err(|e| JobFailure::new(None, e))?;
    let config = config::load(cli).map_err(|e| JobFailure::new(None, e))?;

    // Validated already, so a present map always parses
    let launcher = EnvLauncher::from_env().with_node_map(config.job.node_map.clone());

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| JobFailure::new(None, anyhow::Error::new(e).context("Failed to create tokio runtime")))?;

    runtime.block_on(async {
        let (trigger, signal) = abort_pair();
        install_signal_handlers(trigger);

        let mut sink = std::io::stdout();
        let code = run_job(Box::new(launcher), &config, signal, &mut sink).await;
        let _ = sink.flush();
        code
    })
}
