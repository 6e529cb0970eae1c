//! Per-match orchestration: routes sensor deltas to the right resolver,
//! enforces turn order, and reconciles rack against board at end of turn to
//! classify it as a play, an exchange or a pass.

use serde::Serialize;

use protocol::SensorKind;
use scrabble::{Board, Move};

use crate::board_resolver::{BoardDelta, BoardDeltaResolver};
use crate::rack_resolver::{RackDeltaResolver, RackState};
use crate::tile_bag::{RACK_CAPACITY, TileBag, TileHistogram, histogram_from_tiles, tile_count};

/// The three seats a sensor can fill in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorRole {
    Board,
    Player1,
    Player2,
}

impl SensorRole {
    /// The other side of the table. The board faces itself.
    pub fn opposite(self) -> SensorRole {
        match self {
            SensorRole::Board => SensorRole::Board,
            SensorRole::Player1 => SensorRole::Player2,
            SensorRole::Player2 => SensorRole::Player1,
        }
    }

    /// Index into the per-player arrays, None for the board seat.
    pub fn player_index(self) -> Option<usize> {
        match self {
            SensorRole::Board => None,
            SensorRole::Player1 => Some(0),
            SensorRole::Player2 => Some(1),
        }
    }

    fn from_player_index(index: usize) -> SensorRole {
        if index == 0 { SensorRole::Player1 } else { SensorRole::Player2 }
    }

    /// Whether a sensor of the given hardware kind can fill this seat.
    pub fn is_compatible(self, kind: SensorKind) -> bool {
        match self {
            SensorRole::Board => kind == SensorKind::Board,
            SensorRole::Player1 | SensorRole::Player2 => kind == SensorKind::Rack,
        }
    }
}

impl std::fmt::Display for SensorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorRole::Board => write!(f, "board"),
            SensorRole::Player1 => write!(f, "player1"),
            SensorRole::Player2 => write!(f, "player2"),
        }
    }
}

/// Standing data about one player of a match.
#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub name: String,
    pub cumulative_score: u32,
    pub accumulated_time_ms: u64,
}

impl PlayerInfo {
    fn new(name: String) -> PlayerInfo {
        PlayerInfo { name, cumulative_score: 0, accumulated_time_ms: 0 }
    }
}

/// What the control surface gets back from a committed turn. A zero end-game
/// bonus is suppressed from the serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndOfTurnInfo {
    pub score: u32,
    pub blanks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_game_bonus: Option<u32>,
}

/// The seam through which a committed play is announced to the board sensor.
/// Implemented by the sensor pool; tests substitute a recorder.
pub trait MoveConfirmer {
    fn confirm_move(
        &self,
        match_id: &str,
        mv: &Move,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

#[derive(Debug)]
pub struct GameState {
    match_id: String,
    bag: TileBag,
    board: Board,
    board_resolver: BoardDeltaResolver,
    rack_resolvers: [RackDeltaResolver; 2],
    players: [PlayerInfo; 2],
    turn_n: u32,
}

impl GameState {
    pub fn new(match_id: String, players: (String, String)) -> GameState {
        GameState {
            match_id,
            bag: TileBag::new(),
            board: Board::new(),
            board_resolver: BoardDeltaResolver::new(),
            rack_resolvers: [RackDeltaResolver::new(), RackDeltaResolver::new()],
            players: [PlayerInfo::new(players.0), PlayerInfo::new(players.1)],
            turn_n: 0,
        }
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_n
    }

    /// Whose rack is playing tiles this turn.
    pub fn playing_role(&self) -> SensorRole {
        SensorRole::from_player_index((self.turn_n % 2) as usize)
    }

    /// Whose rack is drawing back up this turn.
    pub fn drawing_role(&self) -> SensorRole {
        self.playing_role().opposite()
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    pub fn player_info(&self, role: SensorRole) -> Option<&PlayerInfo> {
        role.player_index().map(|i| &self.players[i])
    }

    /// Feeds a rack observation to the named player's resolver.
    ///
    /// Start-of-game special case: player 1 fills their very first rack
    /// without any turn ending, so the moment that rack reaches seven tiles
    /// the draw is committed implicitly. A first draw beyond seven tiles is
    /// an attended-to misdraw and is rejected outright.
    pub fn process_rack_delta(&mut self, role: SensorRole, rack: TileHistogram) -> bool {
        let Some(index) = role.player_index() else {
            tracing::warn!(match_id = self.match_id, "Rack delta for the board seat, dropping");
            return false;
        };

        let initial_draw = self.turn_n == 0
            && role == SensorRole::Player1
            && self.rack_resolvers[0].state() == RackState::Drawing;

        if initial_draw && tile_count(&rack) > RACK_CAPACITY {
            tracing::error!(
                match_id = self.match_id,
                n_of_tiles = tile_count(&rack),
                "Start-of-game draw holds more than a full rack, rejecting"
            );
            return false;
        }

        let accepted = self.rack_resolvers[index].process_delta(rack, &self.bag);

        if accepted && initial_draw && self.rack_resolvers[0].n_of_tiles() == RACK_CAPACITY {
            // The server never sees an explicit end to the pre-game draw.
            tracing::info!(match_id = self.match_id, "Player 1 initial rack complete");
            if !self.rack_resolvers[0].end_turn(&mut self.bag) {
                tracing::error!(
                    match_id = self.match_id,
                    "Implicit end of the pre-game draw failed"
                );
            }
        }
        accepted
    }

    /// Feeds a board observation to the board resolver.
    pub fn process_board_delta(&mut self, delta: BoardDelta) -> bool {
        self.board_resolver.process_delta(delta, &self.board)
    }

    /// Commits the turn: resolves all three sensors against each other,
    /// classifies the turn as play, exchange or pass, and advances the
    /// turn counter.
    pub async fn end_turn(
        &mut self,
        player_time_ms: u64,
        confirmer: &impl MoveConfirmer,
    ) -> Result<EndOfTurnInfo, String> {
        let playing_role = self.playing_role();
        let drawing_role = self.drawing_role();
        let playing = (self.turn_n % 2) as usize;
        let drawing = 1 - playing;

        if self.rack_resolvers[playing].state() != RackState::Playing {
            tracing::error!(
                match_id = self.match_id,
                turn = self.turn_n,
                "Playing rack resolver has not finished drawing"
            );
            return Err("Rack state out of sync with turn".into());
        }
        if self.rack_resolvers[drawing].n_of_tiles() > RACK_CAPACITY {
            tracing::error!(
                match_id = self.match_id,
                n_of_tiles = self.rack_resolvers[drawing].n_of_tiles(),
                "Drawing rack holds more than a full rack"
            );
            return Err("Too many tiles on the drawing rack".into());
        }

        // All three deltas must reflect the same pre-commit moment.
        let playing_delta = self.rack_resolvers[playing].delta();
        let board_delta = self.board_resolver.delta().clone();

        if !self.rack_resolvers[playing].end_turn(&mut self.bag) {
            return Err("Unable to resolve the playing rack".into());
        }
        if !self.rack_resolvers[drawing].end_turn(&mut self.bag) {
            return Err("Unable to resolve the drawing rack".into());
        }
        if !self.board_resolver.end_turn(&mut self.board) {
            return Err("Unable to resolve the board".into());
        }

        let info = if board_delta.is_empty() {
            if tile_count(&playing_delta) > 0 {
                tracing::info!(
                    match_id = self.match_id,
                    turn = self.turn_n,
                    %playing_role,
                    tiles = ?playing_delta,
                    "Turn classified as an exchange"
                );
            } else {
                tracing::info!(
                    match_id = self.match_id,
                    turn = self.turn_n,
                    %playing_role,
                    "Turn classified as a pass"
                );
            }
            EndOfTurnInfo { score: self.board.get_score(), blanks: 0, end_game_bonus: None }
        } else {
            let board_tiles = histogram_from_tiles(board_delta.values().copied());
            if board_tiles != playing_delta {
                tracing::error!(
                    match_id = self.match_id,
                    ?board_tiles,
                    rack_tiles = ?playing_delta,
                    "Board delta does not agree with the tiles leaving the rack"
                );
                return Err("Board delta does not match rack delta".into());
            }

            let mv = BoardDeltaResolver::delta_to_move(&board_delta);
            confirmer.confirm_move(&self.match_id, &mv).await?;
            tracing::info!(
                match_id = self.match_id,
                turn = self.turn_n,
                %playing_role,
                %mv,
                "Turn classified as a play"
            );

            let end_game_bonus = if self.bag.n_of_tiles() == 0
                && self.rack_resolvers[playing].n_of_tiles() == 0
            {
                let leftover: u32 = self.rack_resolvers[drawing]
                    .current_rack()
                    .iter()
                    .map(|(tile, count)| tile.value() * count)
                    .sum();
                tracing::info!(
                    match_id = self.match_id,
                    %drawing_role,
                    leftover,
                    "Bag and winning rack are empty, applying end-game bonus"
                );
                Some(2 * leftover)
            } else {
                None
            };

            EndOfTurnInfo {
                score: self.board.get_score(),
                blanks: mv.n_of_unset_blanks(),
                end_game_bonus: end_game_bonus.filter(|bonus| *bonus > 0),
            }
        };

        self.players[playing].accumulated_time_ms = player_time_ms;
        self.turn_n += 1;
        Ok(info)
    }

    #[cfg(test)]
    pub(crate) fn bag_mut(&mut self) -> &mut TileBag {
        &mut self.bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_bag::parse_rack;
    use scrabble::{Pos, Tile};
    use std::sync::Mutex;

    fn to_rack(tiles: &str) -> TileHistogram {
        parse_rack(tiles).unwrap()
    }

    fn delta(entries: &[(u8, u8, char)]) -> BoardDelta {
        entries
            .iter()
            .map(|(row, col, c)| (Pos::new(*row, *col).unwrap(), Tile::new(*c).unwrap()))
            .collect()
    }

    #[derive(Default)]
    struct RecordingConfirmer {
        confirmed: Mutex<Vec<String>>,
    }

    impl RecordingConfirmer {
        fn n_of_calls(&self) -> usize {
            self.confirmed.lock().unwrap().len()
        }
    }

    impl MoveConfirmer for RecordingConfirmer {
        async fn confirm_move(&self, match_id: &str, _mv: &Move) -> Result<(), String> {
            self.confirmed.lock().unwrap().push(match_id.to_string());
            Ok(())
        }
    }

    fn game() -> GameState {
        GameState::new("TESTMTCH".into(), ("alice".into(), "bob".into()))
    }

    /// Runs both initial draws: player 1 tile by tile up to the implicit
    /// commit, player 2 in one reading.
    fn game_after_initial_draws(p1_rack: &str, p2_rack: &str) -> GameState {
        let mut game = game();
        let mut partial = String::new();
        for letter in p1_rack.chars() {
            partial.push(letter);
            assert!(game.process_rack_delta(SensorRole::Player1, to_rack(&partial)));
        }
        assert_eq!(game.rack_resolvers[0].state(), RackState::Playing);
        assert!(game.process_rack_delta(SensorRole::Player2, to_rack(p2_rack)));
        game
    }

    #[test]
    fn test_initial_draw_commits_implicitly_at_seven_tiles() {
        let mut game = game();

        let mut rack = String::new();
        for letter in "ABCDEFG".chars() {
            assert_eq!(game.rack_resolvers[0].state(), RackState::Drawing);
            rack.push(letter);
            assert!(game.process_rack_delta(SensorRole::Player1, to_rack(&rack)));
        }

        // The draw is committed, but no turn has passed.
        assert_eq!(game.rack_resolvers[0].state(), RackState::Playing);
        assert_eq!(game.turn_number(), 0);
        assert_eq!(game.bag_mut().n_of_tiles(), 93);
    }

    #[test]
    fn test_initial_misdraw_beyond_seven_is_rejected() {
        let mut game = game();
        assert!(!game.process_rack_delta(SensorRole::Player1, to_rack("ABCDEFGH")));
        assert_eq!(game.rack_resolvers[0].state(), RackState::Drawing);
        assert_eq!(game.rack_resolvers[0].n_of_tiles(), 0);
    }

    #[test]
    fn test_rack_delta_for_board_seat_is_dropped() {
        let mut game = game();
        assert!(!game.process_rack_delta(SensorRole::Board, to_rack("A")));
    }

    #[tokio::test]
    async fn test_play_turn_is_classified_and_confirmed() {
        let mut game = game_after_initial_draws("RATESCV", "DOGMILK");
        let confirmer = RecordingConfirmer::default();

        // Player 1 plays R A T E S through the center.
        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("CV")));
        assert!(game.process_board_delta(delta(&[
            (7, 7, 'R'),
            (7, 8, 'A'),
            (7, 9, 'T'),
            (7, 10, 'E'),
            (7, 11, 'S'),
        ])));

        let info = game.end_turn(1500, &confirmer).await.unwrap();
        assert_eq!(confirmer.n_of_calls(), 1);
        assert_eq!(info.score, 12);
        assert_eq!(info.blanks, 0);
        assert_eq!(info.end_game_bonus, None);
        assert_eq!(game.turn_number(), 1);
        assert_eq!(game.playing_role(), SensorRole::Player2);
        assert_eq!(game.player_info(SensorRole::Player1).unwrap().accumulated_time_ms, 1500);
        assert!(game.board().get_tile(Pos::new(7, 7).unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_play_with_blank_matches_by_tile_identity() {
        let mut game = game_after_initial_draws("RATES?V", "DOGMILK");
        let confirmer = RecordingConfirmer::default();

        // R and the blank leave the rack; the camera sees them at (7,7)/(7,8).
        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("ATESV")));
        assert!(game.process_board_delta(delta(&[(7, 7, 'R'), (7, 8, '?')])));

        let info = game.end_turn(900, &confirmer).await.unwrap();
        assert_eq!(confirmer.n_of_calls(), 1);
        assert_eq!(info.blanks, 1);
    }

    #[tokio::test]
    async fn test_exchange_turn_leaves_board_alone() {
        let mut game = game_after_initial_draws("RATESCV", "DOGMILK");
        let confirmer = RecordingConfirmer::default();

        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("RAT")));
        assert!(game.process_board_delta(BoardDelta::new()));

        let info = game.end_turn(700, &confirmer).await.unwrap();
        assert_eq!(confirmer.n_of_calls(), 0);
        assert_eq!(info.score, 0);
        assert_eq!(game.board().n_of_moves(), 0);
        assert_eq!(game.turn_number(), 1);
    }

    #[tokio::test]
    async fn test_pass_turn() {
        let mut game = game_after_initial_draws("RATESCV", "DOGMILK");
        let confirmer = RecordingConfirmer::default();

        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("RATESCV")));
        assert!(game.process_board_delta(BoardDelta::new()));

        let info = game.end_turn(300, &confirmer).await.unwrap();
        assert_eq!(confirmer.n_of_calls(), 0);
        assert_eq!(info.end_game_bonus, None);
        assert_eq!(game.turn_number(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_board_and_rack_deltas_fail() {
        let mut game = game_after_initial_draws("RATESCV", "DOGMILK");
        let confirmer = RecordingConfirmer::default();

        // Rack loses R and C, board claims R and A appeared.
        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("ATESV")));
        assert!(game.process_board_delta(delta(&[(7, 7, 'R'), (7, 8, 'A')])));

        assert!(game.end_turn(100, &confirmer).await.is_err());
        assert_eq!(confirmer.n_of_calls(), 0);
        assert_eq!(game.turn_number(), 0);
    }

    #[tokio::test]
    async fn test_end_turn_before_initial_draw_completes_is_desync() {
        let mut game = game();
        let confirmer = RecordingConfirmer::default();
        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("ABC")));

        let err = game.end_turn(100, &confirmer).await.unwrap_err();
        assert!(err.contains("out of sync"));
    }

    #[tokio::test]
    async fn test_overdrawn_drawing_rack_fails_end_turn() {
        let mut game = game_after_initial_draws("RATESCV", "DOGMILKS");
        let confirmer = RecordingConfirmer::default();

        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("RATESCV")));
        assert!(game.process_board_delta(BoardDelta::new()));

        let err = game.end_turn(100, &confirmer).await.unwrap_err();
        assert!(err.contains("Too many tiles"));
    }

    #[tokio::test]
    async fn test_final_play_earns_end_game_bonus() {
        let mut game = game_after_initial_draws("DOGMILK", "RATESCV");
        let confirmer = RecordingConfirmer::default();

        // Turn 0 is passed through so player 2's rack gets committed.
        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("DOGMILK")));
        assert!(game.process_board_delta(BoardDelta::new()));
        game.end_turn(100, &confirmer).await.unwrap();

        // Nothing left to draw; player 2 goes out with all seven tiles.
        game.bag_mut().empty();
        assert!(game.process_rack_delta(SensorRole::Player2, to_rack("")));
        assert!(game.process_rack_delta(SensorRole::Player1, to_rack("DOGMILK")));
        assert!(game.process_board_delta(delta(&[
            (7, 4, 'R'),
            (7, 5, 'A'),
            (7, 6, 'T'),
            (7, 7, 'E'),
            (7, 8, 'S'),
            (7, 9, 'C'),
            (7, 10, 'V'),
        ])));

        let info = game.end_turn(4000, &confirmer).await.unwrap();
        assert_eq!(confirmer.n_of_calls(), 1);
        // Twice the leftover D O G M I L K on the opposing rack.
        assert_eq!(info.end_game_bonus, Some(2 * (2 + 1 + 2 + 3 + 1 + 1 + 5)));
        assert_eq!(game.turn_number(), 2);
    }

    #[test]
    fn test_end_of_turn_body_suppresses_zero_bonus() {
        let with_bonus =
            EndOfTurnInfo { score: 33, blanks: 1, end_game_bonus: Some(12) };
        let value = serde_json::to_value(&with_bonus).unwrap();
        assert_eq!(value["end_game_bonus"], 12);

        let without =
            EndOfTurnInfo { score: 33, blanks: 0, end_game_bonus: None };
        let value = serde_json::to_value(&without).unwrap();
        assert!(value.get("end_game_bonus").is_none());
    }
}
