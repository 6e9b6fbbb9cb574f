//! Main entry point for the Cohort simulator.
//!
//! `cohort scenario` runs the deterministic partition/heal walkthrough;
//! `cohort run` starts the async actor cluster for a fixed duration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cohort_common::DEFAULT_LATENCY_MS;
use cohort_naming::{HeartbeatMonitor, LoadBalancer, ServiceInstance};
use cohort_server::{
    ActorCluster, ConfigArgs, Configuration,
    coordinator::instance_id,
    metrics,
    scenario::run_partition_walkthrough,
    startup::{self, LoggingConfig, ShutdownSignal},
};

#[derive(Debug, Parser)]
#[command(name = "cohort", version, about = "Simulated distributed coordination core")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the five-step partition/heal walkthrough and print the JSON report
    Scenario,
    /// Run the async node actors and report the elected leader
    Run {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::new(&cli.config).context("failed to load configuration")?;

    let logging_config = LoggingConfig::from_config(
        configuration.log_dir(),
        configuration.log_console(),
        configuration.log_file(),
        &configuration.log_level(),
    );
    let _logging_guard = startup::init_logging(&logging_config)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;
    metrics::init_metrics();

    match cli.command {
        Command::Scenario => scenario(&configuration),
        Command::Run { seconds } => run(&configuration, Duration::from_secs(seconds)).await,
    }
}

fn scenario(configuration: &Configuration) -> anyhow::Result<()> {
    let report = run_partition_walkthrough(configuration).context("scenario failed")?;
    if let Some(status) = report.final_status() {
        metrics::record_cluster_status(status);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(configuration: &Configuration, duration: Duration) -> anyhow::Result<()> {
    let shutdown = ShutdownSignal::new();
    startup::listen_for_os_signals(shutdown.clone());

    let ids = configuration.cluster_nodes()?;
    let cluster = ActorCluster::spawn(
        ids.iter().cloned(),
        Duration::from_millis(DEFAULT_LATENCY_MS),
        configuration.raft_config()?,
        configuration.bus_config()?,
        shutdown.clone(),
    )?;

    let service_name = configuration.service_name();
    let balancer = Arc::new(LoadBalancer::new(configuration.balancing_algorithm()?));
    for id in &ids {
        balancer.register_instance(ServiceInstance::new(
            instance_id(&service_name, id),
            id.clone(),
            service_name.as_str(),
        ))?;
    }
    metrics::set_instance_count(balancer.instance_count());
    let monitor = Arc::new(HeartbeatMonitor::new(
        balancer.clone(),
        configuration.heartbeat_config()?,
    ));
    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.start().await })
    };

    info!("Running {} nodes for {:?}", ids.len(), duration);
    let completed =
        startup::run_with_shutdown(tokio::time::sleep(duration), shutdown.subscribe()).await;
    if completed.is_none() {
        warn!("Interrupted before the run completed");
    }

    let status = cluster.status().await?;
    metrics::record_cluster_status(&status);
    match &status.leader {
        Some(leader) => {
            info!("Leader {} in term {}", leader, status.term);
            match balancer.select_instance(&service_name) {
                Ok(instance) => info!("Selected instance {}", instance.instance_id),
                Err(e) => warn!("No instance to route to: {}", e),
            }
        }
        None => warn!("No leader elected within {:?}", duration),
    }
    println!("{}", serde_json::to_string_pretty(&status)?);

    monitor.stop();
    monitor_task.abort();
    cluster.shutdown().await;
    Ok(())
}
