//! Session Server binary.
//!
//! Usage:
//!   simgate-server
//!   simgate-server --bind 127.0.0.1:6000 --task PointMassReach --num-envs 4 --log-level debug

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use clap::builder::PossibleValuesParser;
use simgate_server::{DEFAULT_BIND_ADDR, DEFAULT_PROBE_ACTOR, Server, ServerConfig};
use simgate_sim::{
    DEFAULT_EPISODE_LENGTH, DEFAULT_OBJECT_MASS, PointMassReach, TASKS, TaskConfig, build_task,
};
use simgate_wire::DEFAULT_MAX_FRAME_LEN;

#[derive(Parser)]
#[command(name = "simgate-server")]
#[command(about = "Serve one simulation session over a request/response protocol")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = DEFAULT_BIND_ADDR)]
    bind: SocketAddr,

    /// Task to simulate
    #[arg(
        long,
        default_value = PointMassReach::NAME,
        value_parser = PossibleValuesParser::new(TASKS.iter().copied()),
    )]
    task: String,

    /// Open a viewer instead of running headless
    #[arg(long)]
    render: bool,

    /// Steps per episode
    #[arg(long, default_value_t = DEFAULT_EPISODE_LENGTH)]
    episode_length: u32,

    /// Asset directory; relative paths are resolved against the working directory
    #[arg(long)]
    asset_root: Option<PathBuf>,

    /// Compute device identifier
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Replicas simulated by the backend (only replica 0 is reported)
    #[arg(long, default_value_t = 1)]
    num_envs: usize,

    /// Seed for task randomization
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Mass of the manipulated object (kg)
    #[arg(long, default_value_t = DEFAULT_OBJECT_MASS)]
    object_mass: f32,

    /// Actor whose mass is reported with each step
    #[arg(long, default_value = DEFAULT_PROBE_ACTOR)]
    probe_actor: String,

    /// Largest accepted request frame in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    max_frame_bytes: usize,

    /// Log verbosity: error, warn, info, debug, trace
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

impl Args {
    fn task_config(&self) -> Result<TaskConfig> {
        let mut task = TaskConfig {
            task: self.task.clone(),
            headless: !self.render,
            episode_length: self.episode_length,
            asset_root: self.asset_root.clone(),
            device: self.device.clone(),
            num_replicas: self.num_envs,
            seed: self.seed,
            object_mass: self.object_mass,
        };
        let cwd = std::env::current_dir().context("Failed to read working directory")?;
        task.resolve_asset_root(&cwd);
        Ok(task)
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            max_frame_len: self.max_frame_bytes,
            probe_actor: self.probe_actor.clone(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let code = match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    };
    tracing::info!("Server shutdown complete");
    code
}

fn run(args: &Args) -> Result<()> {
    let task = args.task_config()?;
    let config = args.server_config();

    tracing::info!(
        task = %task.task,
        headless = task.headless,
        episode_length = task.episode_length,
        asset_root = ?task.asset_root,
        device = %task.device,
        replicas = task.num_replicas,
        "Task configured"
    );

    let mut server = Server::start(config, || build_task(&task))?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || shutdown.trigger()).context("Failed to install interrupt handler")?;

    let reason = server.serve()?;
    tracing::info!(reason = reason.as_str(), "Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["simgate-server"]).unwrap();
        assert_eq!(args.bind, DEFAULT_BIND_ADDR);
        assert_eq!(args.task, PointMassReach::NAME);
        assert!(!args.render);
        assert_eq!(args.episode_length, 75);
        assert_eq!(args.num_envs, 1);
        assert_eq!(args.log_level, tracing::Level::INFO);
    }

    #[test]
    fn test_unknown_task_rejected_at_parse() {
        assert!(Args::try_parse_from(["simgate-server", "--task", "ShadowHandOver"]).is_err());
    }

    #[test]
    fn test_render_flag_disables_headless() {
        let args = Args::try_parse_from(["simgate-server", "--render"]).unwrap();
        assert!(!args.task_config().unwrap().headless);
    }
}
