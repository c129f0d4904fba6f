//! Entry point for the `atlas` command-line interface.
#![forbid(unsafe_code)]

use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(report) = run() {
        report_failure(&report);
        std::process::exit(1);
    }
}

#[expect(
    clippy::print_stderr,
    reason = "the binary reports fatal errors on stderr before exiting"
)]
fn report_failure(report: &eyre::Report) {
    eprintln!("atlas: {report:#}");
}

fn run() -> eyre::Result<()> {
    // `log` records from the library crates reach this subscriber through
    // its log bridge. Output goes to stderr so stdout stays parseable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .try_init()
        .map_err(|err| eyre::eyre!("failed to install logging: {err}"))?;
    atlas_cli::run()?;
    Ok(())
}
