mod config;
mod launcher;

use clap::Parser;
use config::LauncherConfig;
use launcher::Launcher;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Launch a workload under a batch-mode process monitor, wait for the
/// workload to exit, then stop the monitor and print what it captured.
#[derive(Parser, Debug)]
#[command(name = "profile-launcher", version, about)]
pub struct Cli {
    /// Launcher config file (default: built-in target and monitor)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the resolved target and monitor commands, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (spawn details, monitor exit status)
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn default_filter(cli: &Cli) -> &'static str {
    if cli.quiet {
        "profile_launcher=error"
    } else if cli.verbose {
        "profile_launcher=debug"
    } else {
        "profile_launcher=info"
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout is reserved for the relayed monitor output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(&cli))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match &cli.config {
        Some(path) => match config::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        },
        None => LauncherConfig::default(),
    };
    let launcher = Launcher::new(config);

    if cli.dry_run {
        let target = launcher.target();
        let monitor = launcher.monitor();
        println!(
            "target:  {} {}",
            target.command.display(),
            target.args.join(" ")
        );
        println!(
            "monitor: {} {}",
            monitor.command.display(),
            monitor.args.join(" ")
        );
        return;
    }

    let mut stdout = tokio::io::stdout();
    match launcher.run(&mut stdout).await {
        Ok(report) => {
            // Exit statuses are reported, never propagated.
            tracing::debug!(
                target_pid = report.target_pid,
                monitor_pid = report.monitor_pid,
                monitor_args = ?report.monitor_args,
                target_exit_code = ?report.target_exit_code,
                target_signal = ?report.target_signal,
                monitor_signal = ?report.monitor_signal,
                target_started_at = %report.target_started_at,
                monitor_started_at = %report.monitor_started_at,
                target_exited_at = %report.target_exited_at,
                monitor_killed_at = %report.monitor_killed_at,
                lines_relayed = report.lines_relayed,
                duration_ms = report.duration.as_millis() as u64,
                "run complete"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "launcher failed");
            std::process::exit(1);
        }
    }
}
