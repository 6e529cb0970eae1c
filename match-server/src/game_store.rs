//! Process-wide registry of running matches, keyed by match id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::game_state::GameState;

const MATCH_ID_LEN: usize = 8;
const MATCH_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// All live matches. Passed around explicitly as an `Arc`; every match sits
/// behind its own mutex so concurrent matches never serialize each other.
pub struct GameStateStore {
    matches: Mutex<HashMap<String, Arc<Mutex<GameState>>>>,
}

impl GameStateStore {
    pub fn new() -> GameStateStore {
        GameStateStore { matches: Mutex::new(HashMap::new()) }
    }

    /// Draws a fresh 8-character alphanumeric id, re-rolling on collision
    /// with a live match.
    pub async fn generate_new_match_id(&self) -> String {
        loop {
            let candidate: String = {
                let mut rng = rand::rng();
                (0..MATCH_ID_LEN)
                    .map(|_| {
                        let i = rand::Rng::random_range(&mut rng, 0..MATCH_ID_ALPHABET.len());
                        MATCH_ID_ALPHABET[i] as char
                    })
                    .collect()
            };
            if !self.matches.lock().await.contains_key(&candidate) {
                return candidate;
            }
            tracing::warn!(candidate, "Match id collision, re-rolling");
        }
    }

    /// Registers a new match under a unique id. A duplicate id is a
    /// programming bug upstream.
    pub async fn create_new_match(
        &self,
        match_id: &str,
        players: (String, String),
    ) -> Arc<Mutex<GameState>> {
        let mut matches = self.matches.lock().await;
        assert!(
            !matches.contains_key(match_id),
            "Cannot start new match with match_id={match_id}, this id is already taken"
        );
        let game = Arc::new(Mutex::new(GameState::new(match_id.to_string(), players)));
        matches.insert(match_id.to_string(), game.clone());
        game
    }

    pub async fn get(&self, match_id: &str) -> Option<Arc<Mutex<GameState>>> {
        self.matches.lock().await.get(match_id).cloned()
    }
}

impl Default for GameStateStore {
    fn default() -> Self {
        GameStateStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_ids_are_well_formed() {
        let store = GameStateStore::new();
        for _ in 0..32 {
            let id = store.generate_new_match_id().await;
            assert_eq!(id.len(), MATCH_ID_LEN);
            assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = GameStateStore::new();
        assert!(store.get("ABCD1234").await.is_none());

        store.create_new_match("ABCD1234", ("alice".into(), "bob".into())).await;
        let game = store.get("ABCD1234").await.unwrap();
        assert_eq!(game.lock().await.match_id(), "ABCD1234");
    }

    #[tokio::test]
    #[should_panic(expected = "already taken")]
    async fn test_duplicate_match_id_is_a_bug() {
        let store = GameStateStore::new();
        store.create_new_match("ABCD1234", ("alice".into(), "bob".into())).await;
        store.create_new_match("ABCD1234", ("carol".into(), "dan".into())).await;
    }
}
