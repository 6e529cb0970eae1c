//! The TCP acceptor for the sensor fleet: one spawned session per
//! connection, with the pool notified once a session winds down.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::sensor_pool::SensorPool;
use crate::socket_session::{self, SensorLink};

pub async fn run(port: u16, pool: Arc<SensorPool>) -> Result<(), String> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| format!("Failed to bind sensor port {port}: {e}"))?;
    tracing::info!(port, "Sensor acceptor listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::error!(%error, "Failed to accept sensor connection");
                continue;
            }
        };
        tracing::info!(%peer, "New sensor connection");

        let pool = pool.clone();
        tokio::spawn(async move {
            let (link, outbound_rx) = SensorLink::new(peer);
            socket_session::serve(stream, link.clone(), outbound_rx, pool.clone()).await;
            pool.on_disconnect(&link).await;
            tracing::info!(%peer, "Sensor connection closed");
        });
    }
}
