mod acceptor;
mod board_resolver;
mod config;
mod control;
mod dictionary;
mod game_state;
mod game_store;
mod rack_resolver;
mod sensor_pool;
mod socket_session;
mod tile_bag;

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::load_config;
use crate::control::ControlState;
use crate::dictionary::Dictionary;
use crate::game_store::GameStateStore;
use crate::sensor_pool::SensorPool;

#[tokio::main]
/// Activates tracing, loads config and dictionary, spawns a watchdog that
/// sweeps dead sensors out of the pool, then runs the sensor acceptor and
/// the HTTP control surface side by side.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    let config = load_config().await;
    tracing::info!(?config, "Starting match data server");

    let dictionary = Arc::new(Dictionary::load(Path::new(&config.dictionary_path)).await);
    let store = Arc::new(GameStateStore::new());
    let pool = Arc::new(SensorPool::new(store.clone()));

    let watchdog_pool = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            watchdog_pool.sweep_stale().await;
            let (boards, racks) = watchdog_pool.available_counts().await;
            tracing::debug!(boards, racks, "Available sensor pool");
        }
    });

    let control_state = Arc::new(ControlState::new(store, pool.clone(), dictionary));

    let sensor_server = acceptor::run(config.tcp_port, pool);
    let control_server = control::run(config.http_port, control_state);

    let (sensor_result, control_result) = tokio::join!(sensor_server, control_server);
    for result in [sensor_result, control_result] {
        if let Err(message) = result {
            tracing::error!(message, "Server terminated");
            panic!("Server terminated: {}", message);
        }
    }
}
