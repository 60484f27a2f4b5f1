//! Election results import.
//!
//! Each comma-separated row is `race, candidate, precinct name, precinct
//! number, votes`, with no header. The election date comes from a `YYYYMMDD`
//! prefix on the filename. Rows are reconciled one at a time against stored
//! results: new rows are inserted, changed vote counts updated, identical rows
//! left alone. The whole file commits only if no row produced an error.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{Local, NaiveDate};
use sqlx::{Postgres, Transaction};

use crate::candidates::resolve_candidate;
use crate::config::TableNames;
use crate::db::{ImportContext, RowSavepoint, lock_import};
use crate::error::ImportError;
use crate::import::outcome::{ResultsOutcome, RowIssue, VoteChange};
use crate::import::reader::{
    Delimiter, Line, Row, Rows, base_filename, election_date_from_filename, parse_votes,
    truncate_chars,
};

pub const RESULT_FIELDS: usize = 5;

/// One parsed results row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub race: String,
    pub candidate: String,
    pub precinct_name: String,
    pub precinct_number: String,
    pub votes: i32,
}

impl ResultRow {
    /// Parse a row; `Ok(None)` for the per-race `Total` aggregate row.
    ///
    /// Names are kept as written and cut to their column widths; only the
    /// precinct number is trimmed.
    pub fn parse(row: &Row) -> Result<Option<Self>, RowIssue> {
        if row.len() != RESULT_FIELDS {
            return Err(RowIssue::at(
                row.line,
                "Row skipped: Invalid number of columns",
            ));
        }

        if row.field(2) == "Total" && row.field(3) == "-1" {
            return Ok(None);
        }

        let votes = parse_votes(row.field(4)).ok_or_else(|| {
            RowIssue::at(
                row.line,
                format!("Row skipped: Invalid vote count `{}`", row.field(4)),
            )
        })?;

        Ok(Some(Self {
            race: truncate_chars(row.field(0), 255),
            candidate: truncate_chars(row.field(1), 255),
            precinct_name: truncate_chars(row.field(2), 100),
            precinct_number: truncate_chars(row.text(3), 20),
            votes,
        }))
    }
}

/// What happened to a single row.
#[derive(Debug)]
enum RowAction {
    Added,
    Updated(VoteChange),
    Unchanged,
}

/// A row-level write failure, tagged with the step that failed.
struct WriteFailure {
    step: &'static str,
    source: ImportError,
}

impl WriteFailure {
    fn at(step: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |e| WriteFailure {
            step,
            source: ImportError::Database(e),
        }
    }
}

/// Import a results file read from `input`.
///
/// `filename` is the uploaded file's name; its `YYYYMMDD` prefix supplies the
/// election date (today's date when absent) and it is stored on every written
/// row. Never fails: setup problems come back as a single entry in `errors`.
pub async fn import_results<R: Read>(
    ctx: &ImportContext,
    input: R,
    filename: &str,
) -> ResultsOutcome {
    let today = Local::now().date_naive();
    match run(ctx, input, filename, today).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("results import of {} aborted: {}", filename, e);
            ResultsOutcome::failed(e)
        }
    }
}

/// Open `path` and import it with [`import_results`], using its file name.
pub async fn import_results_file(ctx: &ImportContext, path: impl AsRef<Path>) -> ResultsOutcome {
    let path = path.as_ref();
    let filename = path.to_string_lossy();
    match File::open(path) {
        Ok(file) => import_results(ctx, file, &filename).await,
        Err(e) => ResultsOutcome::failed(ImportError::open_file(path, e)),
    }
}

async fn run<R: Read>(
    ctx: &ImportContext,
    input: R,
    filename: &str,
    today: NaiveDate,
) -> Result<ResultsOutcome, ImportError> {
    let election_date = election_date_from_filename(filename, today)?;
    let filename = truncate_chars(&base_filename(filename), 255);
    log::info!(
        "starting results import of {} for election {}",
        filename,
        election_date
    );

    let mut tx = ctx.pool.begin().await?;
    lock_import(&mut tx, &ctx.tables.results).await?;

    let mut outcome = ResultsOutcome::default();

    for line in Rows::new(input, Delimiter::Comma, false) {
        let row = match line? {
            Line::Row(row) => row,
            Line::Unreadable(issue) => {
                log::warn!("results import: {}", issue);
                outcome.errors.push(issue);
                continue;
            }
        };

        let result = match ResultRow::parse(&row) {
            Ok(Some(result)) => result,
            Ok(None) => continue,
            Err(issue) => {
                log::warn!("results import: {}", issue);
                outcome.errors.push(issue);
                continue;
            }
        };

        let savepoint = RowSavepoint::begin(&mut tx).await?;
        match reconcile_row(&mut tx, &ctx.tables, &result, election_date, &filename).await {
            Ok(action) => {
                savepoint.release(&mut tx).await?;
                match action {
                    RowAction::Added => outcome.added += 1,
                    RowAction::Updated(change) => {
                        log::debug!("{}", change);
                        outcome.updated += 1;
                        outcome.debug.push(change);
                    }
                    RowAction::Unchanged => outcome.skipped += 1,
                }
            }
            Err(failure) => {
                savepoint.rollback(&mut tx).await?;
                let issue = RowIssue::at(
                    row.line,
                    format!(
                        "Error {} record: Race={}, Option={}, Precinct={} ({})",
                        failure.step,
                        result.race,
                        result.candidate,
                        result.precinct_number,
                        failure.source
                    ),
                );
                log::warn!("results import: {}", issue);
                outcome.errors.push(issue);
            }
        }
    }

    if outcome.errors.is_empty() {
        tx.commit().await?;
        log::info!(
            "results import of {} committed: {} added, {} updated, {} skipped",
            filename,
            outcome.added,
            outcome.updated,
            outcome.skipped
        );
    } else {
        tx.rollback().await?;
        log::warn!(
            "results import of {} rolled back: {} errors",
            filename,
            outcome.errors.len()
        );
    }

    Ok(outcome)
}

async fn reconcile_row(
    tx: &mut Transaction<'_, Postgres>,
    tables: &TableNames,
    row: &ResultRow,
    election_date: NaiveDate,
    filename: &str,
) -> Result<RowAction, WriteFailure> {
    let candidate_id = resolve_candidate(tx, tables, &row.candidate, &row.race, election_date)
        .await
        .map_err(|source| WriteFailure {
            step: "resolving candidate for",
            source,
        })?;

    let existing: Option<(i64, i32)> = sqlx::query_as(&format!(
        r#"SELECT id, votes FROM {}
           WHERE election_date = $1 AND candidate_id = $2 AND precinct_number = $3"#,
        tables.results
    ))
    .bind(election_date)
    .bind(candidate_id)
    .bind(&row.precinct_number)
    .fetch_optional(&mut **tx)
    .await
    .map_err(WriteFailure::at("reading"))?;

    match existing {
        Some((_, votes)) if votes == row.votes => Ok(RowAction::Unchanged),
        Some((id, old_votes)) => {
            sqlx::query(&format!(
                r#"UPDATE {}
                   SET votes = $1, precinct_name = $2, filename = $3, updated_at = NOW()
                   WHERE id = $4"#,
                tables.results
            ))
            .bind(row.votes)
            .bind(&row.precinct_name)
            .bind(filename)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(WriteFailure::at("updating"))?;

            Ok(RowAction::Updated(VoteChange {
                race: row.race.clone(),
                candidate: row.candidate.clone(),
                precinct_number: row.precinct_number.clone(),
                old_votes,
                new_votes: row.votes,
            }))
        }
        None => {
            sqlx::query(&format!(
                r#"INSERT INTO {}
                   (election_date, candidate_id, precinct_name, precinct_number, votes, filename)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
                tables.results
            ))
            .bind(election_date)
            .bind(candidate_id)
            .bind(&row.precinct_name)
            .bind(&row.precinct_number)
            .bind(row.votes)
            .bind(filename)
            .execute(&mut **tx)
            .await
            .map_err(WriteFailure::at("inserting"))?;

            Ok(RowAction::Added)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Row {
        Row {
            line: 4,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn parses_five_columns() {
        let parsed = ResultRow::parse(&row(&["Mayor", "Jane Doe", "Precinct 1", "001", "120"]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.race, "Mayor");
        assert_eq!(parsed.candidate, "Jane Doe");
        assert_eq!(parsed.precinct_name, "Precinct 1");
        assert_eq!(parsed.precinct_number, "001");
        assert_eq!(parsed.votes, 120);
    }

    #[test]
    fn total_rows_are_ignored() {
        assert_eq!(
            ResultRow::parse(&row(&["Mayor", "Jane Doe", "Total", "-1", "5000"])).unwrap(),
            None
        );
        assert!(
            ResultRow::parse(&row(&["Mayor", "Jane Doe", "Total", "7", "5000"]))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn wrong_column_count_is_an_error() {
        let issue = ResultRow::parse(&row(&["Mayor", "Jane Doe", "Precinct 1", "001"])).unwrap_err();
        assert_eq!(issue.line, Some(4));
        assert_eq!(issue.message, "Row skipped: Invalid number of columns");
        assert!(
            ResultRow::parse(&row(&["Mayor", "Jane Doe", "Precinct 1", "001", "5", "x"])).is_err()
        );
    }

    #[test]
    fn non_numeric_votes_count_as_zero() {
        for votes in ["", "many", " "] {
            let parsed = ResultRow::parse(&row(&["Mayor", "Jane Doe", "Precinct 1", "001", votes]))
                .unwrap()
                .unwrap();
            assert_eq!(parsed.votes, 0, "votes field {votes:?}");
        }
        let parsed = ResultRow::parse(&row(&["Mayor", "Jane Doe", "Precinct 1", "001", "1,234"]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.votes, 1);
    }

    #[test]
    fn negative_votes_are_an_error() {
        let issue = ResultRow::parse(&row(&["Mayor", "Jane Doe", "Precinct 1", "001", "-5"]))
            .unwrap_err();
        assert_eq!(issue.line, Some(4));
        assert!(issue.message.contains("Invalid vote count `-5`"));
    }

    #[test]
    fn padded_total_is_not_an_aggregate_row() {
        let parsed = ResultRow::parse(&row(&["Mayor", " Jane Doe", " Total", "-1 ", "5"]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.candidate, " Jane Doe");
        assert_eq!(parsed.precinct_name, " Total");
        assert_eq!(parsed.precinct_number, "-1");
    }

    #[test]
    fn long_fields_are_cut_to_column_width() {
        let race = "R".repeat(300);
        let precinct = "P".repeat(120);
        let number = "9".repeat(30);
        let parsed = ResultRow::parse(&row(&[&race, "Jane Doe", &precinct, &number, "5"]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.race.chars().count(), 255);
        assert_eq!(parsed.precinct_name.chars().count(), 100);
        assert_eq!(parsed.precinct_number.chars().count(), 20);
    }
}
