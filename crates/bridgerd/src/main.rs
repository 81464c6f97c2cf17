//! bridgerd - Bridge Flow Offload Daemon
//!
//! Runs the flow manager against the in-memory device registry, forwarding
//! database and datapath described by the `[topology]` section of the
//! configuration file.

mod config;

use anyhow::Context;
use bridger_flow::sim::SoftDatapath;
use bridger_flow::{FlowHandle, FlowManager, FlowScheduler, PendingFlow};
use clap::Parser;
use config::{BridgerConfig, DEFAULT_CONFIG_PATH};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Bridge flow offload daemon
#[derive(Parser, Debug)]
#[command(name = "bridgerd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Pending flow notifications to feed at startup, one JSON object per line
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Seconds between status reports
    #[arg(long, default_value = "10")]
    status_interval: u64,

    /// Number of flows listed in each status report
    #[arg(long, default_value = "5")]
    top: usize,
}

/// Initializes tracing/logging subsystem
///
/// `RUST_LOG` takes precedence over `--log-level`.
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("bridgerd: Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("--- Starting bridgerd ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("bridgerd: Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = BridgerConfig::load_or_default(&args.config)?;
    config.validate()?;

    let (devices, fdb) = config.topology.build();
    info!(
        devices = devices.len(),
        fdb_entries = fdb.len(),
        "bridgerd: Topology loaded"
    );

    let manager = FlowManager::new(
        config.flow.clone(),
        Arc::new(devices),
        Arc::new(fdb),
        Arc::new(SoftDatapath::new()),
    )?;
    let mut scheduler = FlowScheduler::spawn(manager);
    let handle = scheduler.handle();

    if let Some(path) = &args.replay {
        let count = replay(&handle, path).await?;
        info!(count, "bridgerd: Replayed pending flows from {}", path.display());
    }

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));

    let stopped = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("bridgerd: Received SIGINT");
                break None;
            }
            result = &mut scheduler => {
                break Some(result);
            }
            _ = status.tick() => {
                // A failed report means the scheduler stopped; the next
                // iteration collects its result.
                let _ = report_status(&handle, args.top).await;
            }
        }
    };

    let outcome = match stopped {
        Some(result) => result,
        None => {
            // Fails only if the scheduler already stopped on its own.
            let _ = handle.shutdown().await;
            drop(handle);
            scheduler.join().await
        }
    };

    let stats = outcome.context("flow scheduler failed")?;
    info!(
        created = stats.flows_created,
        removed = stats.flows_removed,
        passes = stats.maintenance_passes,
        "bridgerd: Graceful shutdown complete"
    );
    Ok(())
}

/// Sends every pending flow listed in `path` to the scheduler.
async fn replay(handle: &FlowHandle, path: &Path) -> anyhow::Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;

    let mut count = 0;
    for pending in parse_pending(&content)
        .with_context(|| format!("invalid replay file {}", path.display()))?
    {
        handle.send_pending(pending).await?;
        count += 1;
    }
    Ok(count)
}

/// Parses one JSON pending flow per non-empty line. Lines starting with `#`
/// are skipped.
fn parse_pending(content: &str) -> anyhow::Result<Vec<PendingFlow>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .map(|(n, line)| {
            serde_json::from_str::<PendingFlow>(line).with_context(|| format!("line {}", n + 1))
        })
        .collect()
}

async fn report_status(handle: &FlowHandle, top: usize) -> bridger_flow::Result<()> {
    let stats = handle.stats().await?;
    info!(
        created = stats.flows_created,
        replaced = stats.flows_replaced,
        removed = stats.flows_removed,
        rejected = stats.rejections,
        install_failures = stats.install_failures,
        passes = stats.maintenance_passes,
        "bridgerd: Flow table status"
    );

    for flow in handle.hottest(top).await? {
        debug!(
            flow = %serde_json::to_string(&flow).unwrap_or_default(),
            "bridgerd: Hot flow"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["bridgerd"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.log_level, "info");
        assert_eq!(args.status_interval, 10);
        assert!(args.replay.is_none());
    }

    #[test]
    fn test_parse_pending_lines() {
        let content = r#"
# captured on lan1
{"key": {"ifindex": 2, "src": "11:22:33:44:55:66", "dest": "aa:bb:cc:dd:ee:ff", "vlan": 10}, "packets": 5}

{"key": {"ifindex": 3, "src": "aa:bb:cc:dd:ee:ff", "dest": "11:22:33:44:55:66", "vlan": 0}, "packets": 1}
"#;
        let flows = parse_pending(content).unwrap();

        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].key.ifindex, 2);
        assert_eq!(flows[0].key.vlan.id(), 10);
        assert_eq!(flows[0].packets, 5);
        assert_eq!(flows[1].key.dest.to_string(), "11:22:33:44:55:66");
    }

    #[test]
    fn test_parse_pending_reports_line() {
        let err = parse_pending("{}\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
    }

    #[tokio::test]
    async fn test_replay_feeds_scheduler() {
        use bridger_flow::sim::TopologyConfig;
        use std::io::Write;

        let topology: TopologyConfig = toml::from_str(
            r#"
[[device]]
ifindex = 1
name = "br-lan"
addr = "02:00:00:00:00:01"
bridge = true

[[device]]
ifindex = 2
name = "lan1"
addr = "02:00:00:00:00:02"
master = 1

[[device]]
ifindex = 3
name = "lan2"
addr = "02:00:00:00:00:03"
master = 1

[[fdb]]
bridge = 1
addr = "11:22:33:44:55:66"
vlan = 10
device = 2

[[fdb]]
bridge = 1
addr = "aa:bb:cc:dd:ee:ff"
vlan = 10
device = 3
"#,
        )
        .unwrap();
        let (devices, fdb) = topology.build();
        let manager = FlowManager::new(
            Default::default(),
            Arc::new(devices),
            Arc::new(fdb),
            Arc::new(SoftDatapath::new()),
        )
        .unwrap();
        let scheduler = FlowScheduler::spawn(manager);
        let handle = scheduler.handle();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"key": {{"ifindex": 2, "src": "11:22:33:44:55:66", "dest": "aa:bb:cc:dd:ee:ff", "vlan": 10}}, "packets": 5}}"#
        )
        .unwrap();

        assert_eq!(replay(&handle, file.path()).await.unwrap(), 1);
        let hottest = handle.hottest(1).await.unwrap();
        assert_eq!(hottest[0].target_port, 3);

        handle.shutdown().await.unwrap();
        let stats = scheduler.join().await.unwrap();
        assert_eq!(stats.flows_created, 1);
    }

    #[tokio::test]
    async fn test_run_exits_when_flow_table_fills() {
        use bridger_flow::FlowError;
        use std::io::Write;

        let mut config = tempfile::NamedTempFile::new().unwrap();
        config
            .write_all(
                br#"
[flow]
max_flows = 1

[[topology.device]]
ifindex = 1
name = "br-lan"
addr = "02:00:00:00:00:01"
bridge = true

[[topology.device]]
ifindex = 2
name = "lan1"
addr = "02:00:00:00:00:02"
master = 1

[[topology.device]]
ifindex = 3
name = "lan2"
addr = "02:00:00:00:00:03"
master = 1

[[topology.fdb]]
bridge = 1
addr = "11:22:33:44:55:66"
vlan = 10
device = 2

[[topology.fdb]]
bridge = 1
addr = "aa:bb:cc:dd:ee:01"
vlan = 10
device = 3

[[topology.fdb]]
bridge = 1
addr = "aa:bb:cc:dd:ee:02"
vlan = 10
device = 3
"#,
            )
            .unwrap();

        let mut flows = tempfile::NamedTempFile::new().unwrap();
        for dest in ["aa:bb:cc:dd:ee:01", "aa:bb:cc:dd:ee:02"] {
            writeln!(
                flows,
                r#"{{"key": {{"ifindex": 2, "src": "11:22:33:44:55:66", "dest": "{}", "vlan": 10}}, "packets": 1}}"#,
                dest
            )
            .unwrap();
        }

        let args = Args::parse_from([
            "bridgerd".to_string(),
            "--config".to_string(),
            config.path().display().to_string(),
            "--replay".to_string(),
            flows.path().display().to_string(),
            "--status-interval".to_string(),
            "3600".to_string(),
        ]);

        let err = tokio::time::timeout(Duration::from_secs(10), run(args))
            .await
            .expect("run must return without waiting for a signal or status tick")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FlowError>(),
            Some(FlowError::TableFull { limit: 1 })
        ));
    }
}
