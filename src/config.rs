use std::env;

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ImportError;

/// Multi-row insert size for voter history flushes.
pub const DEFAULT_HISTORY_BATCH_SIZE: usize = 1000;
/// Multi-row insert size for the precinct and voter replace imports.
pub const DEFAULT_REPLACE_BATCH_SIZE: usize = 1000;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Runtime configuration for the importers.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub table_prefix: String,
    pub max_connections: u32,
    pub history_batch_size: usize,
    pub replace_batch_size: usize,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            table_prefix: env_string("ELECTION_TABLE_PREFIX", ""),
            max_connections: env_u32("DATABASE_MAX_CONNECTIONS", 5),
            history_batch_size: env_usize("IMPORT_HISTORY_BATCH_SIZE", DEFAULT_HISTORY_BATCH_SIZE),
            replace_batch_size: env_usize("IMPORT_REPLACE_BATCH_SIZE", DEFAULT_REPLACE_BATCH_SIZE),
        }
    }

    /// Resolve the concrete table names for this configuration.
    pub fn table_names(&self) -> Result<TableNames, ImportError> {
        TableNames::with_prefix(&self.table_prefix)
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            max_connections: 5,
            history_batch_size: DEFAULT_HISTORY_BATCH_SIZE,
            replace_batch_size: DEFAULT_REPLACE_BATCH_SIZE,
        }
    }
}

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]*$").expect("static regex is valid"))
}

/// Concrete table names, derived once from the configured prefix.
///
/// Table names are interpolated into SQL text, so the prefix is restricted to
/// identifier characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub candidates: String,
    pub results: String,
    pub precincts: String,
    pub voters: String,
    pub voter_history: String,
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Result<Self, ImportError> {
        if !prefix_pattern().is_match(prefix) {
            return Err(ImportError::InvalidTablePrefix(prefix.to_string()));
        }

        Ok(Self {
            candidates: format!("{prefix}election_candidates"),
            results: format!("{prefix}election_results"),
            precincts: format!("{prefix}election_precincts"),
            voters: format!("{prefix}voters"),
            voter_history: format!("{prefix}voter_history"),
        })
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            candidates: "election_candidates".to_string(),
            results: "election_results".to_string(),
            precincts: "election_precincts".to_string(),
            voters: "voters".to_string(),
            voter_history: "voter_history".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_applied_to_every_table() {
        let names = TableNames::with_prefix("wp_").unwrap();
        assert_eq!(names.candidates, "wp_election_candidates");
        assert_eq!(names.results, "wp_election_results");
        assert_eq!(names.precincts, "wp_election_precincts");
        assert_eq!(names.voters, "wp_voters");
        assert_eq!(names.voter_history, "wp_voter_history");
    }

    #[test]
    fn empty_prefix_matches_default() {
        assert_eq!(TableNames::with_prefix("").unwrap(), TableNames::default());
    }

    #[test]
    fn prefix_rejects_sql_characters() {
        let err = TableNames::with_prefix("wp; DROP TABLE x; --").unwrap_err();
        assert!(matches!(err, ImportError::InvalidTablePrefix(_)));
        assert!(TableNames::with_prefix("wp-").is_err());
    }
}
