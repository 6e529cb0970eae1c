//! The sensor fleet: registered-but-idle sensors, sensors assigned to
//! matches, and the routing of their observations by hardware address.
//!
//! A new match consumes one board and two rack sensors from the available
//! pool and hands each a fresh data feed. Assignment attempts that time out
//! do not return their sensors to the pool; the sensors are expected to
//! reconnect and register again. A sensor that drops while assigned keeps
//! its seat and may reclaim it by registering with the same mac.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use protocol::{Call, DataFeed, FeedId, MacAddr, Reply, SensorKind, WirePos, WireTile};
use scrabble::{Move, Pos, Tile};

use crate::board_resolver::BoardDelta;
use crate::game_state::{MoveConfirmer, SensorRole};
use crate::game_store::GameStateStore;
use crate::socket_session::SensorLink;
use crate::tile_bag;

/// Aggregate deadline for the three parallel `assignMatch` calls.
pub const ASSIGN_RPC_TIMEOUT: Duration = Duration::from_millis(1500);

/// Per-attempt deadline for `confirmMove`.
pub const CONFIRM_RPC_TIMEOUT: Duration = Duration::from_secs(1);

pub const CONFIRM_MAX_ATTEMPTS: u32 = 5;

/// Where an assigned sensor sits and which feed token is currently valid
/// for it.
struct Assignment {
    match_id: String,
    role: SensorRole,
    feed_id: FeedId,
}

/// The three connections serving one match.
struct MatchSensors {
    board: Arc<SensorLink>,
    player1: Arc<SensorLink>,
    player2: Arc<SensorLink>,
}

impl MatchSensors {
    fn get(&self, role: SensorRole) -> &Arc<SensorLink> {
        match role {
            SensorRole::Board => &self.board,
            SensorRole::Player1 => &self.player1,
            SensorRole::Player2 => &self.player2,
        }
    }

    fn set(&mut self, role: SensorRole, link: Arc<SensorLink>) {
        match role {
            SensorRole::Board => self.board = link,
            SensorRole::Player1 => self.player1 = link,
            SensorRole::Player2 => self.player2 = link,
        }
    }
}

#[derive(Default)]
struct PoolTables {
    available_boards: HashMap<MacAddr, Arc<SensorLink>>,
    available_racks: HashMap<MacAddr, Arc<SensorLink>>,
    assigned: HashMap<MacAddr, Assignment>,
    active: HashMap<String, MatchSensors>,
    next_feed_id: FeedId,
}

impl PoolTables {
    fn issue_feed_id(&mut self) -> FeedId {
        self.next_feed_id += 1;
        self.next_feed_id
    }

    fn available_mut(&mut self, kind: SensorKind) -> &mut HashMap<MacAddr, Arc<SensorLink>> {
        match kind {
            SensorKind::Board => &mut self.available_boards,
            SensorKind::Rack => &mut self.available_racks,
        }
    }
}

pub struct SensorPool {
    tables: Mutex<PoolTables>,
    store: Arc<GameStateStore>,
}

impl SensorPool {
    pub fn new(store: Arc<GameStateStore>) -> SensorPool {
        SensorPool { tables: Mutex::new(PoolTables::default()), store }
    }

    /// Handles a `register` call. Returns the data feed to answer with and
    /// whether the connection should be dropped after answering.
    ///
    /// A mac we already placed into a match is a reconnection attempt: it
    /// succeeds only if the seat's previous connection is gone and the
    /// hardware kind still fits the seat, and it earns a fresh feed token.
    /// A mac already idling in the pool is a duplicate registration.
    pub async fn register_sensor(
        &self,
        link: &Arc<SensorLink>,
        mac: MacAddr,
        kind: SensorKind,
    ) -> (Option<DataFeed>, bool) {
        let mut tables = self.tables.lock().await;

        if let Some(assignment) = tables.assigned.get(&mac) {
            let match_id = assignment.match_id.clone();
            let role = assignment.role;

            if !role.is_compatible(kind) {
                tracing::warn!(
                    mac = format!("{mac:#x}"),
                    ?kind,
                    %role,
                    "Sensor kind does not fit its assigned role, disconnecting"
                );
                return (None, true);
            }
            let Some(sensors) = tables.active.get(&match_id) else {
                tracing::error!(match_id, "Assigned sensor without active match, should never happen");
                return (None, true);
            };
            let prior = sensors.get(role);
            if prior.is_connected() || prior.registration().map(|r| r.mac) != Some(mac) {
                tracing::warn!(
                    mac = format!("{mac:#x}"),
                    match_id,
                    "Reconnection rejected, seat is still held"
                );
                return (None, true);
            }

            let feed_id = tables.issue_feed_id();
            if let Some(sensors) = tables.active.get_mut(&match_id) {
                sensors.set(role, link.clone());
            }
            if let Some(assignment) = tables.assigned.get_mut(&mac) {
                assignment.feed_id = feed_id;
            }
            tracing::info!(
                mac = format!("{mac:#x}"),
                match_id,
                %role,
                "Sensor reconnected to its match"
            );
            return (Some(DataFeed { kind, match_id, feed_id }), false);
        }

        if tables.available_boards.contains_key(&mac) || tables.available_racks.contains_key(&mac)
        {
            tracing::warn!(
                mac = format!("{mac:#x}"),
                "Duplicate registration for a pooled sensor, disconnecting"
            );
            return (None, true);
        }

        tables.available_mut(kind).insert(mac, link.clone());
        tracing::info!(mac = format!("{mac:#x}"), ?kind, "Sensor registered and pooled");
        (None, false)
    }

    /// Assigns one board and two rack sensors to a new match and creates its
    /// game state. Attempts run until the sensors respond or the pool runs
    /// dry; sensors consumed by a failed attempt are not returned.
    pub async fn assign_match(
        &self,
        match_id: &str,
        players: (String, String),
    ) -> Option<String> {
        loop {
            let (board, rack1, rack2, feed_ids) = {
                let mut tables = self.tables.lock().await;
                if tables.available_boards.is_empty() {
                    tracing::info!(match_id, "No available board sensor for match");
                    return Some("Insufficient available boards".into());
                }
                if tables.available_racks.len() < 2 {
                    tracing::info!(match_id, "Not enough available rack sensors for match");
                    return Some("Insufficient available racks".into());
                }
                let board = pop_any(&mut tables.available_boards);
                let rack1 = pop_any(&mut tables.available_racks);
                let rack2 = pop_any(&mut tables.available_racks);
                let feed_ids =
                    [tables.issue_feed_id(), tables.issue_feed_id(), tables.issue_feed_id()];
                (board, rack1, rack2, feed_ids)
            };

            let feed = |kind, feed_id| DataFeed { kind, match_id: match_id.to_string(), feed_id };
            let calls = vec![
                board.call(
                    Call::AssignMatch { feed: feed(SensorKind::Board, feed_ids[0]) },
                    ASSIGN_RPC_TIMEOUT,
                ),
                rack1.call(
                    Call::AssignMatch { feed: feed(SensorKind::Rack, feed_ids[1]) },
                    ASSIGN_RPC_TIMEOUT,
                ),
                rack2.call(
                    Call::AssignMatch { feed: feed(SensorKind::Rack, feed_ids[2]) },
                    ASSIGN_RPC_TIMEOUT,
                ),
            ];

            let all_accepted = match timeout(ASSIGN_RPC_TIMEOUT, join_all(calls)).await {
                Err(_) => {
                    tracing::warn!(match_id, "Aggregate timeout assigning sensors");
                    false
                }
                Ok(replies) => {
                    replies.iter().all(|reply| matches!(reply, Ok(Reply::Accepted(true))))
                }
            };
            let all_connected =
                board.is_connected() && rack1.is_connected() && rack2.is_connected();

            if !(all_accepted && all_connected) {
                tracing::warn!(
                    match_id,
                    "Assignment attempt failed, consumed sensors, retrying"
                );
                continue;
            }

            let seats = [
                (&board, SensorRole::Board, feed_ids[0]),
                (&rack1, SensorRole::Player1, feed_ids[1]),
                (&rack2, SensorRole::Player2, feed_ids[2]),
            ];
            {
                let mut tables = self.tables.lock().await;
                for (link, role, feed_id) in seats {
                    match link.registration() {
                        Some(registration) => {
                            tables.assigned.insert(
                                registration.mac,
                                Assignment { match_id: match_id.to_string(), role, feed_id },
                            );
                        }
                        None => {
                            tracing::error!(
                                match_id,
                                %role,
                                "Pooled sensor without registration, should never happen"
                            );
                        }
                    }
                }
                tables.active.insert(
                    match_id.to_string(),
                    MatchSensors {
                        board: board.clone(),
                        player1: rack1.clone(),
                        player2: rack2.clone(),
                    },
                );
            }

            self.store.create_new_match(match_id, players).await;
            tracing::info!(match_id, "Match assigned to sensor triple");
            return None;
        }
    }

    /// Routes a rack observation by the connection's mac. The feed token
    /// must be the one most recently issued for that seat.
    pub async fn feed_rack(&self, link: &Arc<SensorLink>, feed_id: FeedId, tiles: &str) -> bool {
        let Some((match_id, role)) = self.route(link, feed_id).await else {
            return false;
        };
        if role.player_index().is_none() {
            tracing::warn!(match_id, "Rack data from the board seat, dropping");
            return false;
        }
        let rack = match tile_bag::parse_rack(tiles) {
            Ok(rack) => rack,
            Err(error) => {
                tracing::warn!(match_id, %role, error, tiles, "Undecodable rack observation");
                return false;
            }
        };

        let Some(game) = self.store.get(&match_id).await else {
            tracing::error!(match_id, "Assigned sensor without game state, should never happen");
            return false;
        };
        let mut game = game.lock().await;
        game.process_rack_delta(role, rack)
    }

    /// Routes a board observation by the connection's mac.
    pub async fn feed_move(
        &self,
        link: &Arc<SensorLink>,
        feed_id: FeedId,
        tiles: Vec<WireTile>,
    ) -> bool {
        let Some((match_id, role)) = self.route(link, feed_id).await else {
            return false;
        };
        if role != SensorRole::Board {
            tracing::warn!(match_id, %role, "Board data from a rack seat, dropping");
            return false;
        }
        let delta = match parse_board_delta(&tiles) {
            Ok(delta) => delta,
            Err(error) => {
                tracing::warn!(match_id, error, "Undecodable board observation");
                return false;
            }
        };

        let Some(game) = self.store.get(&match_id).await else {
            tracing::error!(match_id, "Assigned sensor without game state, should never happen");
            return false;
        };
        let mut game = game.lock().await;
        game.process_board_delta(delta)
    }

    /// Informs the match's board sensor of a committed move, retrying
    /// across short outages until the attempt budget runs out.
    pub async fn confirm_move(&self, match_id: &str, mv: &Move) -> Result<(), String> {
        let tiles = move_to_wire(mv);

        for attempt in 1..=CONFIRM_MAX_ATTEMPTS {
            // Re-fetched every attempt: a reconnection swaps the link.
            let board = {
                let tables = self.tables.lock().await;
                match tables.active.get(match_id) {
                    Some(sensors) => sensors.board.clone(),
                    None => return Err("No active sensors for match".into()),
                }
            };

            if !board.is_connected() {
                tracing::warn!(match_id, attempt, "Board sensor disconnected, waiting");
                sleep(CONFIRM_RPC_TIMEOUT).await;
                continue;
            }

            match board.call(Call::ConfirmMove { tiles: tiles.clone() }, CONFIRM_RPC_TIMEOUT).await
            {
                Ok(Reply::Accepted(true)) => {
                    tracing::debug!(match_id, "Move confirmed by board sensor");
                    return Ok(());
                }
                Ok(other) => {
                    tracing::warn!(match_id, attempt, ?other, "Unexpected confirmMove response");
                }
                Err(error) => {
                    tracing::warn!(match_id, attempt, error, "confirmMove attempt failed");
                }
            }
        }

        tracing::error!(match_id, "Unable to confirm move, retry budget exhausted");
        Err("Unable to confirm move with the board sensor".into())
    }

    /// Called by the acceptor once a connection's `serve` has returned.
    /// Assigned sensors keep their seat so a reconnection can reclaim it.
    pub async fn on_disconnect(&self, link: &Arc<SensorLink>) {
        let Some(registration) = link.registration() else {
            tracing::debug!(peer = %link.peer(), "Unregistered connection closed");
            return;
        };

        let mut tables = self.tables.lock().await;
        if tables.assigned.contains_key(&registration.mac) {
            tracing::info!(
                mac = format!("{:#x}", registration.mac),
                "Assigned sensor lost, seat kept for reconnection"
            );
            return;
        }

        let pool = tables.available_mut(registration.kind);
        match pool.get(&registration.mac) {
            Some(existing) if Arc::ptr_eq(existing, link) => {
                pool.remove(&registration.mac);
                tracing::info!(
                    mac = format!("{:#x}", registration.mac),
                    "Sensor removed from the available pool"
                );
            }
            Some(_) => {
                tracing::debug!(
                    mac = format!("{:#x}", registration.mac),
                    "Another connection holds this mac, pool untouched"
                );
            }
            None => {
                tracing::debug!(
                    mac = format!("{:#x}", registration.mac),
                    "Disconnected sensor was not pooled"
                );
            }
        }
    }

    /// Fallback sweep removing pooled sensors whose sockets died without a
    /// clean disconnect. The per-connection teardown handles this already;
    /// this catches anything that slipped through.
    pub async fn sweep_stale(&self) {
        let mut tables = self.tables.lock().await;
        let tables = &mut *tables;
        for pool in [&mut tables.available_boards, &mut tables.available_racks] {
            pool.retain(|mac, link| {
                let alive = link.is_connected();
                if !alive {
                    tracing::info!(mac = format!("{mac:#x}"), "Sweeping dead sensor from pool");
                }
                alive
            });
        }
    }

    /// Counts of available (board, rack) sensors.
    pub async fn available_counts(&self) -> (usize, usize) {
        let tables = self.tables.lock().await;
        (tables.available_boards.len(), tables.available_racks.len())
    }

    /// Resolves a connection to its match and role, enforcing the feed
    /// token. Never holds the table lock beyond the lookup.
    async fn route(&self, link: &Arc<SensorLink>, feed_id: FeedId) -> Option<(String, SensorRole)> {
        let Some(registration) = link.registration() else {
            tracing::warn!(peer = %link.peer(), "Data from an unregistered connection");
            return None;
        };
        let tables = self.tables.lock().await;
        let Some(assignment) = tables.assigned.get(&registration.mac) else {
            tracing::warn!(
                mac = format!("{:#x}", registration.mac),
                "Data from a sensor that is not assigned to a match"
            );
            return None;
        };
        if assignment.feed_id != feed_id {
            tracing::warn!(
                mac = format!("{:#x}", registration.mac),
                match_id = assignment.match_id,
                stale = feed_id,
                current = assignment.feed_id,
                "Data with a stale feed token"
            );
            return None;
        }
        Some((assignment.match_id.clone(), assignment.role))
    }
}

impl MoveConfirmer for SensorPool {
    async fn confirm_move(&self, match_id: &str, mv: &Move) -> Result<(), String> {
        SensorPool::confirm_move(self, match_id, mv).await
    }
}

fn pop_any(pool: &mut HashMap<MacAddr, Arc<SensorLink>>) -> Arc<SensorLink> {
    let mac = *pool.keys().next().expect("pop_any on a checked non-empty pool");
    pool.remove(&mac).expect("key just observed")
}

/// Rebuilds a position→tile delta from the wire form, rejecting repeated
/// positions, invalid tile characters and off-board coordinates.
fn parse_board_delta(tiles: &[WireTile]) -> Result<BoardDelta, String> {
    let mut delta = BoardDelta::new();
    for wire in tiles {
        let Some(pos) = Pos::new(wire.pos.row, wire.pos.col) else {
            return Err(format!("Position ({}, {}) is off the board", wire.pos.row, wire.pos.col));
        };
        let tile = Tile::new(wire.value as char).map_err(|e| e.to_string())?;
        if delta.insert(pos, tile).is_some() {
            return Err(format!("Position {pos} repeats in the observation"));
        }
    }
    Ok(delta)
}

fn move_to_wire(mv: &Move) -> Vec<WireTile> {
    mv.tiles()
        .iter()
        .zip(mv.positions())
        .map(|(tile, pos)| WireTile {
            value: if tile.is_blank() { b'?' } else { tile.letter() as u8 },
            pos: WirePos { row: pos.row, col: pos.col },
        })
        .collect()
}
