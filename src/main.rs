//! Hitron - command-line front end
//!
//! Logs in, then runs whichever of `--status`, `--test` and `--reboot` were
//! given. A reboot without a failing test needs `--force`.

use anyhow::{Context, Result};
use clap::Parser;
use console::Term;
use hitron::config::{Config, RecoveryMode};
use hitron::models::StatusSummary;
use hitron::reboot::RebootReport;
use hitron::utils::human_time;
use hitron::Device;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hitron")]
#[command(about = "Communicates with Hitron CGNV4 routers", long_about = None)]
#[command(arg_required_else_help = true)]
struct Args {
    /// Trigger reboot
    #[arg(long)]
    reboot: bool,

    /// Show router status
    #[arg(long)]
    status: bool,

    /// Ping test to <destination-ip>
    #[arg(long, value_name = "DESTINATION_IP")]
    test: Option<String>,

    /// IP or hostname of Hitron router
    #[arg(long)]
    host: Option<String>,

    /// Username for admin account on Hitron router
    #[arg(long)]
    user: Option<String>,

    /// Password for admin account on Hitron router
    #[arg(long)]
    pw: Option<String>,

    /// Forces --reboot without testing
    #[arg(long)]
    force: bool,

    /// Use HTTPS instead of default HTTP
    #[arg(long)]
    https: bool,

    /// Attempts to login (default: 2)
    #[arg(long)]
    retry: Option<u32>,

    /// Only report phase changes while the router recovers
    #[arg(short, long)]
    quiet: bool,

    /// Skip the DOCSIS and tunnel waits after a reboot
    #[arg(long)]
    basic: bool,

    /// Config file path (default: hitron.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut cfg = Config::load(args.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    apply_args(&mut cfg, &args)?;

    let mut device = Device::new(&cfg).context("Failed to set up HTTP client")?;
    device
        .connect()
        .await
        .with_context(|| format!("Router login failed for {}", device.host()))?;
    tracing::info!("Logged in to {}", device.host());

    if args.status {
        report_status(&device.status().await);
    }

    match (args.reboot, args.test.as_deref()) {
        (true, Some(target)) => {
            if !ping(&mut device, target).await {
                tracing::warn!("Ping test failed, attempting reboot");
                recover(&mut device, target).await?;
            } else if args.force {
                tracing::info!("Ping test succeeded, but forced reboot requested");
                recover(&mut device, target).await?;
            } else {
                tracing::info!("Ping test succeeded, skipping reboot");
            }
        }
        (true, None) => {
            if args.force {
                tracing::info!("Forced reboot requested without testing");
                device.reboot().await.context("Reboot request failed")?;
                tracing::info!("Reboot requested");
            } else {
                tracing::warn!("Please run with --force to permit reboot without testing");
            }
        }
        (false, Some(target)) => {
            if ping(&mut device, target).await {
                tracing::info!("Ping test completed successfully");
            } else {
                tracing::warn!("All ping tests failed, you may want to \"--reboot\"");
            }
        }
        (false, None) => {}
    }

    Ok(())
}

/// Fold command-line flags into the loaded config, prompting for anything
/// still missing
fn apply_args(cfg: &mut Config, args: &Args) -> Result<()> {
    if let Some(host) = &args.host {
        cfg.device.host = host.clone();
    }
    if let Some(user) = &args.user {
        cfg.device.username = user.clone();
    }
    if let Some(pw) = &args.pw {
        cfg.device.password = pw.clone();
    }
    if let Some(retry) = args.retry {
        cfg.device.retry = retry;
    }
    if args.https {
        cfg.device.https = true;
    }
    if args.quiet {
        cfg.reboot.narrate = false;
    }
    if args.basic {
        cfg.reboot.mode = RecoveryMode::Basic;
    }

    if cfg.device.host.is_empty() {
        cfg.device.host = prompt("Hostname or IP of router: ")?;
    }
    if cfg.device.username.is_empty() {
        cfg.device.username = prompt("Username for admin account: ")?;
    }
    if cfg.device.password.is_empty() {
        cfg.device.password = prompt_hidden("Password for admin account: ")?;
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// Read a line without echoing it to the terminal
fn prompt_hidden(label: &str) -> Result<String> {
    let term = Term::stderr();
    term.write_str(label)?;
    let line = term
        .read_secure_line()
        .context("Failed to read password from terminal")?;
    Ok(line.trim().to_string())
}

async fn ping(device: &mut Device, target: &str) -> bool {
    match device.ping(target).await {
        Ok(result) => {
            tracing::info!("{}% packet loss over 4 pings to {}", result.loss, target);
            result.passed
        }
        Err(e) => {
            tracing::warn!("Ping test to {} failed: {}", target, e);
            false
        }
    }
}

async fn recover(device: &mut Device, target: &str) -> Result<()> {
    let report: RebootReport = device.reboot_and_recover(Some(target)).await;
    tracing::info!(
        "Reboot run finished after {}: {:?}",
        human_time(report.elapsed.as_secs()),
        report.outcome
    );
    if !report.succeeded() {
        anyhow::bail!("Router did not recover: {:?}", report.outcome);
    }
    Ok(())
}

fn report_status(status: &StatusSummary) {
    match status.uptime_secs {
        Some(secs) => tracing::info!("Device booted {} ago", human_time(secs)),
        None => tracing::warn!("Device uptime unavailable"),
    }

    match &status.docsis {
        Some(docsis) if docsis.registered() => {
            tracing::info!("DOCSIS appears online, {}", docsis.message())
        }
        Some(docsis) => tracing::warn!("DOCSIS appears offline, {}", docsis.message()),
        None => tracing::error!("Error reading DOCSIS status"),
    }

    match &status.wan_ip {
        Some(ip) => tracing::info!("WAN connected to exchange with IP {}", ip),
        None => tracing::warn!("Device does not appear to have a WAN IP"),
    }

    if let Some(tunnel) = &status.tunnel {
        match &tunnel.address {
            Some(range) if tunnel.up() => {
                tracing::info!("VMB GRE tunnel configured and online with range {}", range)
            }
            _ => tracing::warn!("VMB GRE tunnel configured but currently down"),
        }
    }
}
