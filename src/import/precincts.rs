//! Precinct import: a full replacement of the precinct table.
//!
//! The file has one header row and eight comma-separated columns. Existing rows
//! are deleted and the new set inserted in the same transaction, so readers see
//! either the old table or the complete new one.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::Utc;

use crate::db::{ImportContext, lock_import};
use crate::error::ImportError;
use crate::import::batch::{ColumnarBatch, PrecinctsData, flush_batch};
use crate::import::outcome::{ReplaceOutcome, RowIssue};
use crate::import::reader::{Delimiter, Line, Row, Rows, truncate_chars};

pub const PRECINCT_FIELDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecinctRow {
    pub county_code: String,
    pub county_name: String,
    pub district_type: String,
    pub district_code: String,
    pub district_name: String,
    pub precinct_code: String,
    pub precinct_name: String,
    pub precinct_part: String,
}

impl PrecinctRow {
    /// Columns beyond the eighth are ignored.
    pub fn parse(row: &Row) -> Result<Self, RowIssue> {
        if row.len() < PRECINCT_FIELDS {
            return Err(RowIssue::at(
                row.line,
                format!(
                    "expected {} columns, found {}",
                    PRECINCT_FIELDS,
                    row.len()
                ),
            ));
        }

        Ok(Self {
            county_code: truncate_chars(row.text(0), 10),
            county_name: truncate_chars(row.text(1), 100),
            district_type: truncate_chars(row.text(2), 100),
            district_code: truncate_chars(row.text(3), 50),
            district_name: truncate_chars(row.text(4), 255),
            precinct_code: truncate_chars(row.text(5), 50),
            precinct_name: truncate_chars(row.text(6), 255),
            precinct_part: truncate_chars(row.text(7), 50),
        })
    }

    fn key(&self) -> (String, String, String) {
        (
            self.county_code.clone(),
            self.district_code.clone(),
            self.precinct_part.clone(),
        )
    }
}

/// Replace the precinct table with the contents of `input`.
///
/// Never fails: setup problems come back as an unsuccessful outcome with one
/// error and the table untouched.
pub async fn import_precincts<R: Read>(ctx: &ImportContext, input: R) -> ReplaceOutcome {
    match run(ctx, input).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("precinct import aborted: {}", e);
            ReplaceOutcome::failed(e)
        }
    }
}

/// Open `path` and import it with [`import_precincts`].
pub async fn import_precincts_file(ctx: &ImportContext, path: impl AsRef<Path>) -> ReplaceOutcome {
    let path = path.as_ref();
    match File::open(path) {
        Ok(file) => import_precincts(ctx, file).await,
        Err(e) => ReplaceOutcome::failed(ImportError::open_file(path, e)),
    }
}

async fn run<R: Read>(ctx: &ImportContext, input: R) -> Result<ReplaceOutcome, ImportError> {
    let table = ctx.tables.precincts.as_str();
    let import_date = Utc::now();
    log::info!("starting precinct import into {}", table);

    let mut tx = ctx.pool.begin().await?;
    lock_import(&mut tx, table).await?;

    let removed = sqlx::query(&format!("DELETE FROM {table}"))
        .execute(&mut *tx)
        .await?
        .rows_affected();
    log::debug!("staged removal of {} existing precincts", removed);

    let mut batch = PrecinctsData::default();
    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    let mut count = 0usize;

    for line in Rows::new(input, Delimiter::Comma, true) {
        let row = match line? {
            Line::Row(row) => row,
            Line::Unreadable(issue) => {
                log::warn!("precinct import: {}", issue);
                errors.push(issue);
                continue;
            }
        };

        let precinct = match PrecinctRow::parse(&row) {
            Ok(precinct) => precinct,
            Err(issue) => {
                log::warn!("precinct import: {}", issue);
                errors.push(issue);
                continue;
            }
        };

        if !seen.insert(precinct.key()) {
            let issue = RowIssue::at(
                row.line,
                format!(
                    "duplicate precinct {}/{}/{}",
                    precinct.county_code, precinct.district_code, precinct.precinct_part
                ),
            );
            log::warn!("precinct import: {}", issue);
            errors.push(issue);
            continue;
        }

        batch.push(row.line, precinct);
        if batch.len() >= ctx.config.replace_batch_size {
            count += flush_batch(&mut tx, table, &mut batch, import_date, &mut errors).await?;
        }
    }
    count += flush_batch(&mut tx, table, &mut batch, import_date, &mut errors).await?;

    if errors.is_empty() {
        tx.commit().await?;
        log::info!("precinct import committed: {} precincts", count);
        Ok(ReplaceOutcome {
            success: true,
            message: format!("Successfully imported {} precincts", count),
            count,
            errors,
        })
    } else {
        tx.rollback().await?;
        log::warn!(
            "precinct import rolled back: {} errors, table left unchanged",
            errors.len()
        );
        Ok(ReplaceOutcome {
            success: false,
            message: format!(
                "Import failed with {} error(s); precinct table left unchanged",
                errors.len()
            ),
            count: 0,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Row {
        Row {
            line: 3,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn parses_eight_columns_in_order() {
        let parsed = PrecinctRow::parse(&row(&[
            "KI", "King", "Legislative", "LEG-43", "43rd District", "1234", "SEA 43-1234", "0",
        ]))
        .unwrap();
        assert_eq!(parsed.county_code, "KI");
        assert_eq!(parsed.district_name, "43rd District");
        assert_eq!(parsed.precinct_name, "SEA 43-1234");
        assert_eq!(parsed.precinct_part, "0");
    }

    #[test]
    fn short_rows_report_their_line() {
        let issue = PrecinctRow::parse(&row(&["KI", "King", "Legislative"])).unwrap_err();
        assert_eq!(issue.line, Some(3));
        assert_eq!(issue.message, "expected 8 columns, found 3");
    }

    #[test]
    fn extra_columns_are_ignored_and_text_truncated() {
        let long_code = "X".repeat(40);
        let parsed = PrecinctRow::parse(&row(&[
            &long_code, "King", "Legislative", "LEG-43", "43rd", "1234", "SEA", "0", "extra",
        ]))
        .unwrap();
        assert_eq!(parsed.county_code.chars().count(), 10);
        assert_eq!(parsed.precinct_part, "0");
    }
}
