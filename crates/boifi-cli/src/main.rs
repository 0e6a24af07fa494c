mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, SessionCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            store,
            database_url,
            auth_token,
            subscriber_queue_capacity,
            max_consecutive_drops,
        } => {
            commands::serve(bind, store, database_url, auth_token, subscriber_queue_capacity, max_consecutive_drops).await
        }
        Command::Discovery {
            trace_dependencies_url,
            kv_base_url,
            auth_token,
            service_base_url_template,
            service_map_key,
            notify_channel,
            interval_secs,
            lookback_secs,
            once,
        } => {
            commands::discovery(
                trace_dependencies_url,
                kv_base_url,
                auth_token,
                service_base_url_template,
                service_map_key,
                notify_channel,
                interval_secs,
                lookback_secs,
                once,
            )
            .await
        }
        Command::Session(session_cmd) => match session_cmd {
            SessionCommand::Create { service, search_space, max_trials, time_budget_secs, storage_dir } => {
                commands::session_create(service, search_space, max_trials, time_budget_secs, storage_dir).await
            }
            SessionCommand::List { storage_dir } => commands::session_list(storage_dir).await,
            SessionCommand::Status { id, storage_dir } => commands::session_status(id, storage_dir).await,
            SessionCommand::Stop { id, storage_dir } => commands::session_stop(id, storage_dir).await,
            SessionCommand::Run {
                id,
                storage_dir,
                control_plane_base,
                observation_base,
                auth_token,
                fault_duration_secs,
                settle_buffer_secs,
                n_initial_cold_start,
                seed,
            } => {
                commands::session_run(
                    id,
                    storage_dir,
                    control_plane_base,
                    observation_base,
                    auth_token,
                    fault_duration_secs,
                    settle_buffer_secs,
                    n_initial_cold_start,
                    seed,
                )
                .await
            }
        },
    }
}
