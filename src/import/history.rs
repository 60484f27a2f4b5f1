//! Voter history import: cumulative, never truncated.
//!
//! Each row records that a voter took part in an election. Rows are only
//! inserted for voters currently registered, and a history id is only ever
//! stored once, so re-importing the same extract is a no-op. Inserts are
//! buffered and written in batches.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use sqlx::{Postgres, Transaction};

use crate::db::{ImportContext, RowSavepoint, lock_import};
use crate::error::ImportError;
use crate::import::batch::{ColumnarBatch, HistoryData, flush_batch};
use crate::import::outcome::{HistoryOutcome, RowIssue};
use crate::import::reader::{Delimiter, Line, Row, Rows, parse_date, truncate_chars};

pub const HISTORY_FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    pub voter_history_id: String,
    pub county_code: String,
    pub county_code_voting: String,
    pub state_voter_id: String,
    pub election_date: NaiveDate,
}

impl HistoryRow {
    pub fn parse(row: &Row) -> Result<Self, RowIssue> {
        if row.len() < HISTORY_FIELDS {
            return Err(RowIssue::at(
                row.line,
                format!("expected {} columns, found {}", HISTORY_FIELDS, row.len()),
            ));
        }

        let voter_history_id = row.text(0);
        if voter_history_id.is_empty() {
            return Err(RowIssue::at(row.line, "missing voter history id"));
        }

        let election_date = match parse_date(row.text(4)) {
            Ok(Some(date)) => date,
            Ok(None) => return Err(RowIssue::at(row.line, "missing election date")),
            Err(e) => return Err(RowIssue::at(row.line, e)),
        };

        Ok(Self {
            voter_history_id: truncate_chars(voter_history_id, 50),
            county_code: truncate_chars(row.text(1), 10),
            county_code_voting: truncate_chars(row.text(2), 10),
            state_voter_id: truncate_chars(row.text(3), 50),
            election_date,
        })
    }
}

/// Add the rows of `input` to the voter history table.
///
/// Never fails: setup problems (including an empty voter table) come back as
/// an unsuccessful outcome with one error and nothing inserted.
pub async fn import_voter_history<R: Read>(ctx: &ImportContext, input: R) -> HistoryOutcome {
    match run(ctx, input).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("voter history import aborted: {}", e);
            HistoryOutcome::failed(e)
        }
    }
}

/// Open `path` and import it with [`import_voter_history`].
pub async fn import_voter_history_file(
    ctx: &ImportContext,
    path: impl AsRef<Path>,
) -> HistoryOutcome {
    let path = path.as_ref();
    match File::open(path) {
        Ok(file) => import_voter_history(ctx, file).await,
        Err(e) => HistoryOutcome::failed(ImportError::open_file(path, e)),
    }
}

/// Snapshot registered voter ids.
///
/// The voter table is share-locked for the rest of the transaction, so a
/// concurrent voter replacement waits instead of invalidating the snapshot.
async fn load_voter_ids(
    tx: &mut Transaction<'_, Postgres>,
    voters_table: &str,
) -> Result<HashSet<String>, sqlx::Error> {
    sqlx::query(&format!("LOCK TABLE {voters_table} IN SHARE MODE"))
        .execute(&mut **tx)
        .await?;

    let ids: Vec<String> = sqlx::query_scalar(&format!("SELECT state_voter_id FROM {voters_table}"))
        .fetch_all(&mut **tx)
        .await?;

    Ok(ids.into_iter().collect())
}

/// Remove already-stored history ids from the batch and write the rest.
///
/// Returns `(inserted, skipped)`.
async fn flush_history(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    batch: &mut HistoryData,
    import_date: chrono::DateTime<Utc>,
    errors: &mut Vec<RowIssue>,
) -> Result<(usize, usize), sqlx::Error> {
    if batch.is_empty() {
        return Ok((0, 0));
    }

    let savepoint = RowSavepoint::begin(tx).await?;
    let existing: Result<Vec<String>, sqlx::Error> = sqlx::query_scalar(&format!(
        "SELECT voter_history_id FROM {table} WHERE voter_history_id = ANY($1)"
    ))
    .bind(&batch.voter_history_ids)
    .fetch_all(&mut **tx)
    .await;

    let existing: HashSet<String> = match existing {
        Ok(ids) => {
            savepoint.release(tx).await?;
            ids.into_iter().collect()
        }
        Err(e) => {
            savepoint.rollback(tx).await?;
            let line = batch.first_line().unwrap_or(0);
            errors.push(RowIssue::at(
                line,
                format!("Duplicate check for batch starting near line {} failed: {}", line, e),
            ));
            batch.clear();
            return Ok((0, 0));
        }
    };

    let duplicates = batch.remove_ids(&existing);
    let attempted = batch.len();
    let errors_before = errors.len();
    let inserted = flush_batch(tx, table, batch, import_date, errors).await?;

    // Rows dropped by ON CONFLICT are duplicates as well; a rejected batch
    // is already reported as an error instead.
    let conflicted = if errors.len() == errors_before {
        attempted - inserted
    } else {
        0
    };
    Ok((inserted, duplicates + conflicted))
}

async fn run<R: Read>(ctx: &ImportContext, input: R) -> Result<HistoryOutcome, ImportError> {
    let table = ctx.tables.voter_history.as_str();
    let import_date = Utc::now();
    log::info!("starting voter history import into {}", table);

    let mut tx = ctx.pool.begin().await?;
    lock_import(&mut tx, table).await?;

    let voter_ids = load_voter_ids(&mut tx, &ctx.tables.voters).await?;
    if voter_ids.is_empty() {
        return Err(ImportError::NoVoters);
    }
    log::debug!("loaded {} registered voter ids", voter_ids.len());

    let mut batch = HistoryData::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut errors = Vec::new();
    let mut count = 0usize;
    let mut skipped = 0usize;

    for line in Rows::new(input, Delimiter::Pipe, true) {
        let row = match line? {
            Line::Row(row) => row,
            Line::Unreadable(issue) => {
                log::warn!("voter history import: {}", issue);
                errors.push(issue);
                continue;
            }
        };

        let record = match HistoryRow::parse(&row) {
            Ok(record) => record,
            Err(issue) => {
                log::warn!("voter history import: {}", issue);
                errors.push(issue);
                continue;
            }
        };

        if !voter_ids.contains(&record.state_voter_id) {
            log::trace!(
                "line {}: voter {} not registered, skipping",
                row.line,
                record.state_voter_id
            );
            skipped += 1;
            continue;
        }

        if !seen.insert(record.voter_history_id.clone()) {
            skipped += 1;
            continue;
        }

        batch.push(row.line, record);
        if batch.len() >= ctx.config.history_batch_size {
            let (inserted, duplicates) =
                flush_history(&mut tx, table, &mut batch, import_date, &mut errors).await?;
            count += inserted;
            skipped += duplicates;
        }
    }
    let (inserted, duplicates) =
        flush_history(&mut tx, table, &mut batch, import_date, &mut errors).await?;
    count += inserted;
    skipped += duplicates;

    if errors.is_empty() {
        tx.commit().await?;
        log::info!(
            "voter history import committed: {} added, {} skipped",
            count,
            skipped
        );
        Ok(HistoryOutcome {
            success: true,
            message: format!(
                "Successfully imported {} voter history records ({} skipped)",
                count, skipped
            ),
            count,
            skipped,
            errors,
        })
    } else {
        tx.rollback().await?;
        log::warn!(
            "voter history import rolled back: {} errors, nothing added",
            errors.len()
        );
        Ok(HistoryOutcome {
            success: false,
            message: format!(
                "Import failed with {} error(s); no voter history was added",
                errors.len()
            ),
            count: 0,
            skipped,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Row {
        Row {
            line: 5,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn parses_history_columns() {
        let record = HistoryRow::parse(&row(&["9001", "KI", "PI", "WA0001", "11/05/2024"])).unwrap();
        assert_eq!(record.voter_history_id, "9001");
        assert_eq!(record.county_code, "KI");
        assert_eq!(record.county_code_voting, "PI");
        assert_eq!(record.state_voter_id, "WA0001");
        assert_eq!(record.election_date, NaiveDate::from_ymd_opt(2024, 11, 5).unwrap());
    }

    #[test]
    fn short_rows_are_rejected_with_line() {
        let issue = HistoryRow::parse(&row(&["9001", "KI", "PI", "WA0001"])).unwrap_err();
        assert_eq!(issue.line, Some(5));
        assert_eq!(issue.message, "expected 5 columns, found 4");
    }

    #[test]
    fn election_date_is_required() {
        assert!(HistoryRow::parse(&row(&["9001", "KI", "PI", "WA0001", ""])).is_err());
        assert!(HistoryRow::parse(&row(&["9001", "KI", "PI", "WA0001", "garbage"])).is_err());
        assert!(HistoryRow::parse(&row(&["", "KI", "PI", "WA0001", "2024-11-05"])).is_err());
    }
}
