use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "boifi", about = "Fault-injection control for service meshes", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control-plane API server (Policy Store + Distributor + Policy API).
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        #[arg(long, value_enum, default_value = "memory")]
        store: StoreArg,

        /// Required when `--store postgres`.
        #[arg(long, env = "BOIFI_DATABASE_URL")]
        database_url: Option<String>,

        #[arg(long, env = "BOIFI_AUTH_TOKEN")]
        auth_token: String,

        #[arg(long, default_value_t = 256)]
        subscriber_queue_capacity: usize,

        #[arg(long, default_value_t = 5)]
        max_consecutive_drops: u32,
    },

    /// Run the Service Discovery pipeline, once or on a recurring schedule.
    Discovery {
        #[arg(long)]
        trace_dependencies_url: String,

        #[arg(long)]
        kv_base_url: String,

        #[arg(long, env = "BOIFI_AUTH_TOKEN")]
        auth_token: String,

        /// Template containing `{service}`/`{namespace}`, probed for OpenAPI docs.
        #[arg(long)]
        service_base_url_template: Option<String>,

        #[arg(long, default_value = "boifi/service-map")]
        service_map_key: String,

        #[arg(long, default_value = "boifi-service-map-updates")]
        notify_channel: String,

        #[arg(long, default_value_t = 300)]
        interval_secs: u64,

        #[arg(long, default_value_t = 3600)]
        lookback_secs: u64,

        /// Run a single tick and exit instead of looping on `--interval-secs`.
        #[arg(long)]
        once: bool,
    },

    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Create a new optimization session.
    Create {
        #[arg(long)]
        service: String,

        /// Path to a JSON-encoded `SearchSpaceConfig`.
        #[arg(long)]
        search_space: PathBuf,

        #[arg(long, default_value_t = 50)]
        max_trials: u32,

        #[arg(long, default_value_t = 3600)]
        time_budget_secs: u64,

        #[arg(long, default_value = "./boifi-sessions")]
        storage_dir: PathBuf,
    },

    /// List known sessions.
    List {
        #[arg(long, default_value = "./boifi-sessions")]
        storage_dir: PathBuf,
    },

    /// Show one session's full detail, including its best result so far.
    Status {
        id: Uuid,

        #[arg(long, default_value = "./boifi-sessions")]
        storage_dir: PathBuf,
    },

    /// Request a running session stop after its current trial.
    Stop {
        id: Uuid,

        #[arg(long, default_value = "./boifi-sessions")]
        storage_dir: PathBuf,
    },

    /// Drive a session's trial loop to completion.
    Run {
        id: Uuid,

        #[arg(long, default_value = "./boifi-sessions")]
        storage_dir: PathBuf,

        #[arg(long)]
        control_plane_base: String,

        #[arg(long)]
        observation_base: String,

        #[arg(long, env = "BOIFI_AUTH_TOKEN")]
        auth_token: String,

        #[arg(long, default_value_t = 30)]
        fault_duration_secs: u64,

        #[arg(long, default_value_t = 10)]
        settle_buffer_secs: u64,

        #[arg(long, default_value_t = 10)]
        n_initial_cold_start: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Debug, Clone, ValueEnum)]
pub enum StoreArg {
    Memory,
    Postgres,
}
