//! The tournament word list used to judge challenges.

use std::collections::HashSet;
use std::path::Path;

/// Case-insensitive word list. A missing or unreadable list degrades to an
/// empty dictionary (every challenge then succeeds) instead of refusing to
/// start the server.
pub struct Dictionary {
    valid_words: HashSet<String>,
}

impl Dictionary {
    /// Loads one word per line from `path`.
    pub async fn load(path: &Path) -> Dictionary {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let dictionary = Dictionary::from_words(content.lines());
                tracing::info!(
                    path = %path.display(),
                    n_of_words = dictionary.len(),
                    "Dictionary loaded"
                );
                dictionary
            }
            Err(error) => {
                tracing::error!(
                    %error,
                    path = %path.display(),
                    "Unable to read dictionary, starting with an empty word list"
                );
                Dictionary { valid_words: HashSet::new() }
            }
        }
    }

    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Dictionary {
        let valid_words = words
            .into_iter()
            .map(|w| w.trim().to_ascii_uppercase())
            .filter(|w| !w.is_empty())
            .collect();
        Dictionary { valid_words }
    }

    pub fn is_valid(&self, word: &str) -> bool {
        self.valid_words.contains(&word.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.valid_words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let dictionary = Dictionary::from_words(["cat", "RATES"]);
        assert!(dictionary.is_valid("CAT"));
        assert!(dictionary.is_valid("rates"));
        assert!(!dictionary.is_valid("ASDFQG"));
    }

    #[tokio::test]
    async fn test_missing_file_degrades_to_empty() {
        let dictionary = Dictionary::load(Path::new("/nonexistent/words.txt")).await;
        assert!(dictionary.is_empty());
        assert!(!dictionary.is_valid("CAT"));
    }
}
