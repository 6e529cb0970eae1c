//! The wire schema shared between the match server and the table sensors.
//! Every message travelling over the sensor TCP link is a [`Frame`], encoded
//! with postcard and prefixed by a little-endian `u32` payload length.
//!
//! The protocol is bidirectional: both endpoints may issue a
//! [`Frame::Request`] and must answer it with a [`Frame::Response`] that
//! echoes the request id. Sensors call `Register`, `Pulse`, `SendRack` and
//! `SendMove`; the server calls `AssignMatch`, `ConfirmMove` and
//! `GetFullBoardState`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Length prefix in front of every postcard payload. (u32, little endian)
pub const FRAME_HEADER_SIZE: usize = 4;

/// Upper bound for a single frame payload. Anything larger is treated as a
/// corrupt stream and terminates the connection.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default port for the sensor RPC link.
pub const DEFAULT_TCP_PORT: u16 = 9189;

/// Default port for the HTTP control surface.
pub const DEFAULT_HTTP_PORT: u16 = 9190;

/// Hardware address of a sensor, supplied by the sensor on registration.
/// Only the low 48 bits are meaningful.
pub type MacAddr = u64;

/// Correlation id for request/response matching, unique per connection
/// and direction.
pub type CallId = u64;

/// Server-issued data-feed token, unique per assignment.
pub type FeedId = u64;

/// The two classes of hardware a table is equipped with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// The overhead board camera.
    Board,
    /// One of the two rack readers.
    Rack,
}

/// A board coordinate as transmitted by the board camera.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirePos {
    pub row: u8,
    pub col: u8,
}

/// One observed tile placement. `value` is the ASCII letter, or `b'?'` for a
/// blank tile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireTile {
    pub value: u8,
    pub pos: WirePos,
}

/// The per-match capability issued by the server to a sensor so it can stream
/// observations. A fresh token is issued on every assignment and on every
/// successful reconnection; stale tokens are rejected.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DataFeed {
    pub kind: SensorKind,
    pub match_id: String,
    pub feed_id: FeedId,
}

/// The callable RPC surface, both directions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Call {
    /// Sensor announces itself. Answered with [`Reply::Feed`]; the feed is
    /// `None` unless this registration completes a reconnection.
    Register { mac_addr: MacAddr, kind: SensorKind },
    /// Heartbeat. Must arrive at least every 2.5 s.
    Pulse,
    /// Full rack observation: case-insensitive letters `A`–`Z` and `?`.
    SendRack { feed_id: FeedId, tiles: String },
    /// Full observation of tiles newly visible on the board.
    SendMove { feed_id: FeedId, tiles: Vec<WireTile> },
    /// Server hands a sensor its data feed for a new match.
    AssignMatch { feed: DataFeed },
    /// Server informs the board camera of a committed move.
    ConfirmMove { tiles: Vec<WireTile> },
    /// Server requests the camera's complete view of the board.
    GetFullBoardState,
}

/// Responses, one shape per call family.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer to `Register`.
    Feed(Option<DataFeed>),
    /// Answer to `Pulse`.
    Ack,
    /// Answer to `SendRack`, `SendMove`, `AssignMatch` and `ConfirmMove`.
    Accepted(bool),
    /// Answer to `GetFullBoardState`.
    BoardState(Vec<WireTile>),
}

/// One framed message on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Frame {
    Request { id: CallId, call: Call },
    Response { id: CallId, reply: Reply },
}

impl Frame {
    /// Serializes the frame including its length prefix.
    pub fn encode(&self) -> Result<Bytes, String> {
        let payload =
            postcard::to_stdvec(self).map_err(|e| format!("Failed to encode frame: {e}"))?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(format!("Frame payload of {} bytes is too large", payload.len()));
        }
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Pops one complete frame off the front of `buf`, if one has fully
    /// arrived. Returns an error on an oversized length prefix or an
    /// undecodable payload; both mean the stream is unusable.
    pub fn extract(buf: &mut BytesMut) -> Result<Option<Frame>, String> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(format!("Frame length prefix {len} exceeds maximum"));
        }
        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(len);
        let frame =
            postcard::from_bytes(&payload).map_err(|e| format!("Failed to decode frame: {e}"))?;
        Ok(Some(frame))
    }
}
