//! Structured outcomes returned by each importer.
//!
//! Field names mirror what the presentation layer renders, so they must stay
//! stable: `added/updated/skipped/errors/debug` for results and
//! `success/message/count` (plus `skipped/errors`) for the file replacements.

use serde::Serialize;
use std::fmt;

/// A problem with one row (or one batch) of input.
///
/// `line` is the physical line number in the input file when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub line: Option<u64>,
    pub message: String,
}

impl RowIssue {
    pub fn at(line: u64, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// An existing result whose vote count differed from the imported one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteChange {
    pub race: String,
    pub candidate: String,
    pub precinct_number: String,
    pub old_votes: i32,
    pub new_votes: i32,
}

impl fmt::Display for VoteChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote mismatch - Race: {}, Option: {}, Precinct: {}, Old: {}, New: {}",
            self.race, self.candidate, self.precinct_number, self.old_votes, self.new_votes
        )
    }
}

/// Outcome of an election-results import.
///
/// A non-empty `errors` list means the transaction was rolled back and the
/// counts describe what *would* have been written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultsOutcome {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<RowIssue>,
    pub debug: Vec<VoteChange>,
}

impl ResultsOutcome {
    pub fn committed(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn failed(error: impl fmt::Display) -> Self {
        Self {
            errors: vec![RowIssue::general(error.to_string())],
            ..Self::default()
        }
    }
}

/// Outcome of a full-replace import (precincts, voters).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaceOutcome {
    pub success: bool,
    pub message: String,
    pub count: usize,
    pub errors: Vec<RowIssue>,
}

impl ReplaceOutcome {
    pub(crate) fn failed(error: impl fmt::Display) -> Self {
        let message = error.to_string();
        Self {
            success: false,
            errors: vec![RowIssue::general(message.clone())],
            message,
            count: 0,
        }
    }
}

/// Outcome of a voter-history import.
///
/// `skipped` counts orphan and duplicate rows; those are not errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryOutcome {
    pub success: bool,
    pub message: String,
    pub count: usize,
    pub skipped: usize,
    pub errors: Vec<RowIssue>,
}

impl HistoryOutcome {
    pub(crate) fn failed(error: impl fmt::Display) -> Self {
        let message = error.to_string();
        Self {
            success: false,
            errors: vec![RowIssue::general(message.clone())],
            message,
            count: 0,
            skipped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_change_renders_old_and_new() {
        let change = VoteChange {
            race: "Mayor".into(),
            candidate: "Jane Doe".into(),
            precinct_number: "001".into(),
            old_votes: 120,
            new_votes: 125,
        };
        assert_eq!(
            change.to_string(),
            "Vote mismatch - Race: Mayor, Option: Jane Doe, Precinct: 001, Old: 120, New: 125"
        );
    }

    #[test]
    fn row_issue_includes_line_when_known() {
        assert_eq!(RowIssue::at(7, "bad row").to_string(), "Line 7: bad row");
        assert_eq!(RowIssue::general("bad file").to_string(), "bad file");
    }

    #[test]
    fn failed_outcomes_carry_single_error() {
        let outcome = ReplaceOutcome::failed("Could not open file");
        assert!(!outcome.success);
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.message, "Could not open file");

        let results = ResultsOutcome::failed("boom");
        assert!(!results.committed());
        assert_eq!(results.added, 0);
    }
}
