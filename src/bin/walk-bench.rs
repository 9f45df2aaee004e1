use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use sprint_bench::{cli::Cli, timer, DirEntry, WalkDir};
use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr, `warn` and up unless `RUST_LOG` says otherwise.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);
    tracing::debug!(path = %args.path.display(), repeat = args.repeat, "starting");

    let mut last_stats = None;
    let timing = timer::try_sample(args.repeat, || {
        let mut walk = WalkDir::new(&args.path).into_iter();
        let items: Vec<_> = walk.by_ref().map(DirEntry::into_path).collect();
        last_stats = Some(format!("{:?}", walk.stats()));
        writeln!(std::io::stdout().lock(), "items.count = {}", items.len())
    })
    .context("failed to write to stdout")?;

    if let Some(timing) = timing {
        writeln!(std::io::stdout().lock(), "{}", timing).context("failed to write to stdout")?;
    }

    if let (true, Some(stats)) = (args.stats, last_stats) {
        eprintln!("{}", stats);
    }

    Ok(())
}
