//! File importers.
//!
//! Every importer runs inside a single database transaction and returns a
//! structured outcome instead of an error. Row-level problems are collected on
//! the outcome; any of them rolls the whole file back.
//!
//! | File            | Format            | Strategy                         |
//! |-----------------|-------------------|----------------------------------|
//! | results         | CSV, no header    | reconcile row by row             |
//! | precincts       | CSV, header       | replace table, batched inserts   |
//! | voters          | pipe, header      | replace table, batched inserts   |
//! | voter history   | pipe, header      | append new ids, batched inserts  |

pub(crate) mod batch;
pub mod history;
pub mod outcome;
pub mod precincts;
pub mod reader;
pub mod results;
pub mod voters;

pub use history::{import_voter_history, import_voter_history_file};
pub use outcome::{HistoryOutcome, ReplaceOutcome, ResultsOutcome, RowIssue, VoteChange};
pub use precincts::{import_precincts, import_precincts_file};
pub use results::{import_results, import_results_file};
pub use voters::{import_voters, import_voters_file};
