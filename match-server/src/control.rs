//! The HTTP control surface driven by the external match-management UI:
//! match setup, end of turn, word challenges and blank-tile resolution.
//!
//! Every response is HTTP 200 carrying either `{"body": …}` or
//! `{"error": …}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::dictionary::Dictionary;
use crate::game_state::GameState;
use crate::game_store::GameStateStore;
use crate::sensor_pool::SensorPool;

/// Points deducted from a losing challenger, per challenged word.
const PENALTY_PER_WORD: u32 = 5;

pub struct ControlState {
    store: Arc<GameStateStore>,
    pool: Arc<SensorPool>,
    dictionary: Arc<Dictionary>,
    /// Player pairs that already got a match, so a repeated setup request
    /// returns the running match instead of assigning a second one.
    pairings: Mutex<HashMap<(String, String), String>>,
}

impl ControlState {
    pub fn new(
        store: Arc<GameStateStore>,
        pool: Arc<SensorPool>,
        dictionary: Arc<Dictionary>,
    ) -> ControlState {
        ControlState { store, pool, dictionary, pairings: Mutex::new(HashMap::new()) }
    }
}

pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/setup", get(setup_match))
        .route("/end-turn", get(end_turn))
        .route("/challengeable-words", get(challengeable_words))
        .route("/challenge", get(challenge))
        .route("/blanks", post(update_blanks))
        .with_state(state)
}

pub async fn run(port: u16, state: Arc<ControlState>) -> Result<(), String> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| format!("Failed to bind control port {port}: {e}"))?;
    tracing::info!(port, "Control surface listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| format!("Control server failed: {e}"))
}

fn success(body: Value) -> Json<Value> {
    Json(json!({ "body": body }))
}

fn error(message: &str) -> Json<Value> {
    Json(json!({ "error": message }))
}

#[derive(Deserialize)]
struct SetupParams {
    p1: Option<String>,
    p2: Option<String>,
}

async fn setup_match(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<SetupParams>,
) -> Json<Value> {
    let (Some(p1), Some(p2)) = (params.p1, params.p2) else {
        return error("Missing player names");
    };
    tracing::info!(p1, p2, "Received match setup request");

    // Also serializes racing setups, so the same pair cannot be assigned
    // two matches.
    let mut pairings = state.pairings.lock().await;
    if let Some(match_id) = pairings.get(&(p1.clone(), p2.clone())) {
        tracing::info!(p1, p2, match_id, "Players already assigned to a match");
        return success(json!({ "match_id": match_id }));
    }

    let match_id = state.store.generate_new_match_id().await;
    match state.pool.assign_match(&match_id, (p1.clone(), p2.clone())).await {
        None => {
            pairings.insert((p1, p2), match_id.clone());
            success(json!({ "match_id": match_id }))
        }
        Some(message) => error(&message),
    }
}

#[derive(Deserialize)]
struct TurnParams {
    match_id: Option<String>,
    turn_number: Option<String>,
    player_time: Option<String>,
}

async fn end_turn(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<TurnParams>,
) -> Json<Value> {
    tracing::debug!(match_id = ?params.match_id, "Received end-turn request");

    let game = match validate(&state, params.match_id.as_deref(), params.turn_number.as_deref(), 0)
        .await
    {
        Ok(game) => game,
        Err(message) => return error(&message),
    };
    let Some(player_time) = params.player_time.and_then(|t| t.parse::<u64>().ok()) else {
        return error("Invalid player time");
    };

    let mut game = game.lock().await;
    match game.end_turn(player_time, state.pool.as_ref()).await {
        Ok(info) => match serde_json::to_value(&info) {
            Ok(body) => success(body),
            Err(e) => error(&format!("Failed to serialize turn result: {e}")),
        },
        Err(message) => error(&message),
    }
}

async fn challengeable_words(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<TurnParams>,
) -> Json<Value> {
    tracing::debug!(match_id = ?params.match_id, "Received challengeable-words request");

    // The words in question were formed by the turn that just ended.
    let game =
        match validate(&state, params.match_id.as_deref(), params.turn_number.as_deref(), -1).await
        {
            Ok(game) => game,
            Err(message) => return error(&message),
        };

    let game = game.lock().await;
    let words = game.board().get_challenge_words();
    if words.is_empty() { error("No challenge words") } else { success(json!({ "words": words })) }
}

async fn challenge(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<Value> {
    let find = |key: &str| {
        params.iter().find(|(k, _)| k == key).map(|(_, value)| value.as_str())
    };
    let words: Vec<String> = params
        .iter()
        .filter(|(key, _)| key == "words")
        .map(|(_, value)| value.to_ascii_uppercase())
        .collect();
    tracing::info!(match_id = ?find("match_id"), ?words, "Received challenge request");

    let game = match validate(&state, find("match_id"), find("turn_number"), -1).await {
        Ok(game) => game,
        Err(message) => return error(&message),
    };

    let mut game = game.lock().await;
    match run_challenge(&mut game, &state.dictionary, &words) {
        Ok(outcome) => success(json!({
            "successful": outcome.successful,
            "challenger_penalty": outcome.challenger_penalty,
            "undone_move_score": outcome.undone_move_score,
        })),
        Err(message) => error(&message),
    }
}

async fn update_blanks(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<TurnParams>,
    Json(body): Json<Vec<String>>,
) -> Json<Value> {
    tracing::debug!(match_id = ?params.match_id, ?body, "Received blank tile update");

    // Blanks belong to the move of the previous turn.
    let game =
        match validate(&state, params.match_id.as_deref(), params.turn_number.as_deref(), -1).await
        {
            Ok(game) => game,
            Err(message) => return error(&message),
        };

    let mut game = game.lock().await;
    if game.board_mut().set_blanks(&body.concat()) {
        success(json!({}))
    } else {
        error("Unable to set blanks")
    }
}

/// Resolves `match_id` and checks the caller's turn number against the
/// game, shifted by `turn_modifier` for endpoints that reference the
/// previous turn.
async fn validate(
    state: &ControlState,
    match_id: Option<&str>,
    turn_number: Option<&str>,
    turn_modifier: i64,
) -> Result<Arc<Mutex<GameState>>, String> {
    let Some(turn_number) = turn_number.and_then(|t| t.parse::<i64>().ok()) else {
        return Err("Invalid turn number".into());
    };
    let Some(match_id) = match_id else {
        return Err("Invalid match_id".into());
    };
    let Some(game) = state.store.get(match_id).await else {
        tracing::error!(match_id, "Request for a match without game state");
        return Err("Invalid match_id".into());
    };

    let current = game.lock().await.turn_number() as i64;
    if current + turn_modifier != turn_number {
        tracing::error!(
            match_id,
            requested = turn_number,
            current,
            turn_modifier,
            "Request with out-of-sync turn number"
        );
        return Err("Turn out of sync".into());
    }
    Ok(game)
}

#[derive(Debug)]
struct ChallengeOutcome {
    successful: bool,
    challenger_penalty: u32,
    undone_move_score: u32,
}

/// A challenge succeeds if any challenged word is missing from the
/// dictionary; success takes the move off the board again. The challenged
/// words must be among the words the previous move actually formed.
fn run_challenge(
    game: &mut GameState,
    dictionary: &Dictionary,
    words: &[String],
) -> Result<ChallengeOutcome, String> {
    if words.is_empty() {
        return Err("No challenge words provided".into());
    }
    let challengeable = game.board().get_challenge_words();
    if !words.iter().all(|w| challengeable.iter().any(|c| c.eq_ignore_ascii_case(w))) {
        tracing::error!(
            match_id = game.match_id(),
            ?words,
            ?challengeable,
            "Challenge on words the previous move did not form"
        );
        return Err("Invalid challenge words".into());
    }

    let successful = words.iter().any(|word| !dictionary.is_valid(word));
    let previous_score = game.board().get_score();
    if successful {
        tracing::info!(match_id = game.match_id(), "Challenge successful, undoing previous move");
        game.board_mut().undo_move();
    }

    Ok(ChallengeOutcome {
        successful,
        challenger_penalty: words.len() as u32 * PENALTY_PER_WORD,
        undone_move_score: previous_score,
    })
}
