//! One TCP connection to one sensor: a framed bidirectional RPC endpoint.
//!
//! Three tasks cooperate per connection: a reader that decodes inbound
//! frames and dispatches them, a writer that drains the outbound queue into
//! the socket, and a heartbeat watcher that closes the connection when the
//! sensor stops pulsing. All three observe the shared `retry` flag within a
//! second of it clearing; `serve` joins them before returning.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, timeout};

use protocol::{Call, CallId, Frame, MacAddr, Reply, SensorKind};

use crate::sensor_pool::SensorPool;

/// How often the watcher checks for a missed pulse. Sensors are required to
/// pulse at least this often.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2500);

/// Silence longer than this closes the connection.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on how long a task sleeps before re-checking `retry`.
const LOOP_WAIT: Duration = Duration::from_secs(1);

const OUTBOUND_QUEUE_SIZE: usize = 64;

/// What a sensor told us about itself on `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub mac: MacAddr,
    pub kind: SensorKind,
}

/// The shared handle onto one sensor connection. The connection tasks and
/// the sensor pool both hold it; it survives the socket so the pool can
/// still see `is_connected == false` after a drop.
pub struct SensorLink {
    peer: SocketAddr,
    outbound: mpsc::Sender<Frame>,
    pending: StdMutex<HashMap<CallId, oneshot::Sender<Reply>>>,
    next_call_id: AtomicU64,
    last_pulse: StdMutex<Instant>,
    retry: AtomicBool,
    connected: AtomicBool,
    registration: StdMutex<Option<Registration>>,
}

impl SensorLink {
    pub fn new(peer: SocketAddr) -> (Arc<SensorLink>, mpsc::Receiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let link = Arc::new(SensorLink {
            peer,
            outbound,
            pending: StdMutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(0),
            last_pulse: StdMutex::new(Instant::now()),
            retry: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            registration: StdMutex::new(None),
        });
        (link, outbound_rx)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn registration(&self) -> Option<Registration> {
        *self.registration.lock().expect("registration lock poisoned")
    }

    /// Asks the connection tasks to wind down at their next loop iteration.
    pub fn shutdown(&self) {
        self.retry.store(false, Ordering::SeqCst);
    }

    fn running(&self) -> bool {
        self.retry.load(Ordering::SeqCst)
    }

    fn mark_registered(&self, mac: MacAddr, kind: SensorKind) {
        *self.registration.lock().expect("registration lock poisoned") =
            Some(Registration { mac, kind });
    }

    fn touch_pulse(&self) {
        *self.last_pulse.lock().expect("pulse lock poisoned") = Instant::now();
    }

    fn pulse_age(&self) -> Duration {
        self.last_pulse.lock().expect("pulse lock poisoned").elapsed()
    }

    /// Issues a request to the sensor and waits for the matching response.
    /// The deadline covers queueing, transmission and the sensor's answer;
    /// on expiry the pending call is abandoned.
    pub async fn call(&self, call: Call, wait: Duration) -> Result<Reply, String> {
        if !self.is_connected() {
            return Err("Sensor is not connected".into());
        }
        let id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().expect("pending lock poisoned").insert(id, reply_tx);

        if self.outbound.send(Frame::Request { id, call }).await.is_err() {
            self.pending.lock().expect("pending lock poisoned").remove(&id);
            return Err("Sensor connection is closed".into());
        }

        match timeout(wait, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err("Sensor disconnected while waiting for a reply".into()),
            Err(_) => {
                self.pending.lock().expect("pending lock poisoned").remove(&id);
                Err("Sensor call timed out".into())
            }
        }
    }

    async fn respond(&self, id: CallId, reply: Reply) {
        if self.outbound.send(Frame::Response { id, reply }).await.is_err() {
            tracing::debug!(peer = %self.peer, "Dropping response for closed connection");
        }
    }

    pub(crate) fn complete(&self, id: CallId, reply: Reply) {
        let waiter = self.pending.lock().expect("pending lock poisoned").remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => {
                tracing::warn!(peer = %self.peer, id, "Response without a pending call");
            }
        }
    }

    /// Flags the link dead and wakes every waiter with an error.
    pub(crate) fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown();
        self.pending.lock().expect("pending lock poisoned").clear();
    }
}

/// Runs the connection until EOF, protocol corruption or heartbeat expiry.
pub async fn serve<S>(
    stream: S,
    link: Arc<SensorLink>,
    outbound_rx: mpsc::Receiver<Frame>,
    pool: Arc<SensorPool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);

    let writer = tokio::spawn(writer_task(write_half, outbound_rx, link.clone()));
    let watcher = tokio::spawn(heartbeat_task(link.clone()));

    reader_task(read_half, link.clone(), pool).await;
    link.disconnect();

    // Wind the helper tasks down before handing the link back.
    let _ = tokio::join!(writer, watcher);
}

/// Pumps bytes off the socket, slices them into frames and dispatches them.
async fn reader_task<R>(mut read_half: R, link: Arc<SensorLink>, pool: Arc<SensorPool>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(8192);
    while link.running() {
        loop {
            match Frame::extract(&mut buf) {
                Ok(Some(frame)) => dispatch(frame, &link, &pool).await,
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(peer = %link.peer, error, "Corrupt frame stream");
                    return;
                }
            }
        }
        match timeout(LOOP_WAIT, read_half.read_buf(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                tracing::debug!(peer = %link.peer, "Socket reached EOF");
                return;
            }
            Ok(Ok(_)) => {}
            Ok(Err(error)) => {
                tracing::error!(peer = %link.peer, %error, "Socket read failed");
                return;
            }
        }
    }
}

/// Drains the outbound queue into the socket, flushing whatever is still
/// queued when the link shuts down.
async fn writer_task<W>(mut write_half: W, mut outbound_rx: mpsc::Receiver<Frame>, link: Arc<SensorLink>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        if !link.running() {
            while let Ok(frame) = outbound_rx.try_recv() {
                if !write_frame(&mut write_half, &frame, &link).await {
                    return;
                }
            }
            return;
        }
        match timeout(LOOP_WAIT, outbound_rx.recv()).await {
            Err(_) => continue,
            Ok(None) => return,
            Ok(Some(frame)) => {
                if !write_frame(&mut write_half, &frame, &link).await {
                    link.shutdown();
                    return;
                }
            }
        }
    }
}

async fn write_frame<W>(write_half: &mut W, frame: &Frame, link: &SensorLink) -> bool
where
    W: AsyncWrite + Unpin,
{
    let encoded = match frame.encode() {
        Ok(encoded) => encoded,
        Err(error) => {
            tracing::error!(peer = %link.peer, error, "Failed to encode outbound frame");
            return false;
        }
    };
    if let Err(error) = write_half.write_all(&encoded).await {
        tracing::debug!(peer = %link.peer, %error, "Socket write failed");
        return false;
    }
    true
}

/// Closes the connection once the sensor goes quiet for longer than
/// [`HEARTBEAT_TIMEOUT`].
async fn heartbeat_task(link: Arc<SensorLink>) {
    while link.running() {
        sleep(HEARTBEAT_INTERVAL).await;
        if link.pulse_age() > HEARTBEAT_TIMEOUT {
            tracing::warn!(peer = %link.peer, "Heartbeat expired, closing connection");
            link.shutdown();
        }
    }
}

/// Handles one inbound frame. Requests run to completion before the next
/// frame is looked at, which keeps one sensor's deltas in arrival order.
async fn dispatch(frame: Frame, link: &Arc<SensorLink>, pool: &Arc<SensorPool>) {
    let (id, call) = match frame {
        Frame::Response { id, reply } => {
            link.complete(id, reply);
            return;
        }
        Frame::Request { id, call } => (id, call),
    };

    match call {
        Call::Pulse => {
            link.touch_pulse();
            tracing::trace!(peer = %link.peer, "Pulse");
            link.respond(id, Reply::Ack).await;
        }
        Call::Register { mac_addr, kind } => {
            link.mark_registered(mac_addr, kind);
            let (feed, disconnect) = pool.register_sensor(link, mac_addr, kind).await;
            link.respond(id, Reply::Feed(feed)).await;
            if disconnect {
                link.shutdown();
            }
        }
        Call::SendRack { feed_id, tiles } => {
            let accepted = pool.feed_rack(link, feed_id, &tiles).await;
            link.respond(id, Reply::Accepted(accepted)).await;
        }
        Call::SendMove { feed_id, tiles } => {
            let accepted = pool.feed_move(link, feed_id, tiles).await;
            link.respond(id, Reply::Accepted(accepted)).await;
        }
        other => {
            tracing::warn!(peer = %link.peer, call = ?other, "Server-side call issued by a sensor");
            link.respond(id, Reply::Accepted(false)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_store::GameStateStore;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9189".parse().unwrap()
    }

    fn pool() -> Arc<SensorPool> {
        Arc::new(SensorPool::new(Arc::new(GameStateStore::new())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_expiry_closes_the_link() {
        let (link, _outbound_rx) = SensorLink::new(test_addr());

        let watcher = tokio::spawn(heartbeat_task(link.clone()));
        tokio::time::sleep(Duration::from_secs(6)).await;

        watcher.await.unwrap();
        assert!(!link.running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulses_keep_the_link_alive() {
        let (link, _outbound_rx) = SensorLink::new(test_addr());

        let watcher = tokio::spawn(heartbeat_task(link.clone()));
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            link.touch_pulse();
        }
        assert!(link.running());

        link.shutdown();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_times_out_without_a_response() {
        let (link, mut outbound_rx) = SensorLink::new(test_addr());

        let result = link.call(Call::GetFullBoardState, Duration::from_millis(50)).await;
        assert!(result.is_err());

        // The request itself was queued.
        let frame = outbound_rx.recv().await.unwrap();
        assert!(matches!(frame, Frame::Request { call: Call::GetFullBoardState, .. }));
        assert!(link.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_completes_through_the_pending_map() {
        let (link, mut outbound_rx) = SensorLink::new(test_addr());

        let caller = {
            let link = link.clone();
            tokio::spawn(async move {
                link.call(Call::GetFullBoardState, Duration::from_secs(1)).await
            })
        };

        let Some(Frame::Request { id, .. }) = outbound_rx.recv().await else {
            panic!("expected a queued request");
        };
        link.complete(id, Reply::BoardState(Vec::new()));

        assert_eq!(caller.await.unwrap(), Ok(Reply::BoardState(Vec::new())));
    }

    #[tokio::test]
    async fn test_session_registers_and_survives_until_eof() {
        let (server_side, mut client) = tokio::io::duplex(4096);
        let (link, outbound_rx) = SensorLink::new(test_addr());

        let session = tokio::spawn(serve(server_side, link.clone(), outbound_rx, pool()));

        let register = Frame::Request {
            id: 0,
            call: Call::Register { mac_addr: 0xAABB, kind: SensorKind::Rack },
        };
        client.write_all(&register.encode().unwrap()).await.unwrap();

        // Expect the "not yet in a match" feed response.
        let mut buf = BytesMut::new();
        let response = loop {
            if let Some(frame) = Frame::extract(&mut buf).unwrap() {
                break frame;
            }
            client.read_buf(&mut buf).await.unwrap();
        };
        assert_eq!(response, Frame::Response { id: 0, reply: Reply::Feed(None) });
        assert_eq!(
            link.registration(),
            Some(Registration { mac: 0xAABB, kind: SensorKind::Rack })
        );

        drop(client);
        session.await.unwrap();
        assert!(!link.is_connected());
    }
}
