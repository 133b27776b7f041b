mod config;
mod sandbox;
mod simulation;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use scenesync::{LinkSimulation, ObserverSettings, ReplicationSettings};

use config::SandboxConfig;
use sandbox::Sandbox;

#[derive(Parser)]
#[command(name = "scenesync-sandbox")]
#[command(about = "Authority and observers replicating a scene over a simulated link")]
struct Args {
    #[arg(short, long, default_value_t = 2)]
    observers: u32,

    #[arg(short, long, default_value_t = 30, help = "Network frames per second")]
    frequency: u32,

    #[arg(long, default_value_t = 60, help = "Requested follower simulation rate")]
    follower_frequency: u32,

    #[arg(long, default_value_t = 16, help = "Objects nobody owns")]
    shared_objects: usize,

    #[arg(long, default_value_t = 1, help = "Objects owned by each observer")]
    owned_objects: usize,

    #[arg(short, long, default_value_t = 10, help = "Seconds to run, 0 runs forever")]
    duration: u64,

    #[arg(long, default_value_t = 0.1, help = "Seconds replicas render behind the authority")]
    interpolation_delay: f32,

    #[arg(long, help = "Enable link loss and latency simulation")]
    simulate_link: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SandboxConfig {
        replication: ReplicationSettings {
            update_frequency: args.frequency,
            follower_frequency: args.follower_frequency,
            ..Default::default()
        },
        observer: ObserverSettings {
            interpolation_delay: args.interpolation_delay,
            ..Default::default()
        },
        observers: args.observers,
        shared_objects: args.shared_objects,
        owned_per_observer: args.owned_objects,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        link: LinkSimulation {
            enabled: args.simulate_link,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency.max(args.min_latency),
            jitter_ms: args.jitter,
        },
        ..Default::default()
    };

    let mut sandbox = Sandbox::new(config)?;
    log::info!(
        "Sandbox started: {} observers at {} Hz",
        args.observers,
        args.frequency
    );
    sandbox.run();
    log::info!("Sandbox shutting down");

    Ok(())
}
