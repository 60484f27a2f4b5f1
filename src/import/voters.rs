//! Voter registration import: a full replacement of the voter table.
//!
//! Input is the state's pipe-delimited voter registration extract with one
//! header row. Columns are positional; everything this system does not store
//! (residential and mailing address columns) is skipped by index.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, Utc};

use crate::db::{ImportContext, lock_import};
use crate::error::ImportError;
use crate::import::batch::{ColumnarBatch, VotersData, flush_batch};
use crate::import::outcome::{ReplaceOutcome, RowIssue};
use crate::import::reader::{
    Delimiter, Line, Row, Rows, optional_text, parse_birth_year, parse_date, truncate_chars,
};

/// Minimum number of columns a registration row must carry.
pub const VOTER_MIN_FIELDS: usize = 32;

/// Column positions in the registration extract.
pub mod column {
    pub const STATE_VOTER_ID: usize = 0;
    pub const FIRST_NAME: usize = 1;
    pub const MIDDLE_NAME: usize = 2;
    pub const LAST_NAME: usize = 3;
    pub const NAME_SUFFIX: usize = 4;
    pub const BIRTH_YEAR: usize = 5;
    pub const GENDER: usize = 6;
    // 7..=17: residential address
    pub const COUNTY_CODE: usize = 18;
    pub const PRECINCT_CODE: usize = 19;
    pub const PRECINCT_PART: usize = 20;
    pub const LEGISLATIVE_DISTRICT: usize = 21;
    pub const CONGRESSIONAL_DISTRICT: usize = 22;
    // 23..=29: mailing address
    pub const REGISTRATION_DATE: usize = 30;
    pub const LAST_VOTED: usize = 31;
    /// Absent from older extracts.
    pub const STATUS_CODE: usize = 32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterRow {
    pub state_voter_id: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub name_suffix: Option<String>,
    pub birth_year: Option<i32>,
    pub gender: Option<String>,
    pub registration_date: Option<NaiveDate>,
    pub last_voted: Option<NaiveDate>,
    pub status_code: Option<String>,
    pub precinct_code: Option<String>,
    pub precinct_part: Option<String>,
    pub legislative_district: Option<String>,
    pub congressional_district: Option<String>,
}

fn lenient_date(row: &Row, index: usize, label: &str) -> Option<NaiveDate> {
    match parse_date(row.text(index)) {
        Ok(date) => date,
        Err(e) => {
            log::warn!("line {}: {} ignored, {}", row.line, label, e);
            None
        }
    }
}

impl VoterRow {
    pub fn parse(row: &Row) -> Result<Self, RowIssue> {
        if row.len() < VOTER_MIN_FIELDS {
            return Err(RowIssue::at(
                row.line,
                format!(
                    "expected at least {} columns, found {}",
                    VOTER_MIN_FIELDS,
                    row.len()
                ),
            ));
        }

        let state_voter_id = row.text(column::STATE_VOTER_ID);
        if state_voter_id.is_empty() {
            return Err(RowIssue::at(row.line, "missing state voter id"));
        }

        Ok(Self {
            state_voter_id: truncate_chars(state_voter_id, 50),
            first_name: optional_text(row.text(column::FIRST_NAME), 100),
            middle_name: optional_text(row.text(column::MIDDLE_NAME), 100),
            last_name: optional_text(row.text(column::LAST_NAME), 100),
            name_suffix: optional_text(row.text(column::NAME_SUFFIX), 20),
            birth_year: parse_birth_year(row.text(column::BIRTH_YEAR)),
            gender: optional_text(row.text(column::GENDER), 10),
            registration_date: lenient_date(row, column::REGISTRATION_DATE, "registration date"),
            last_voted: lenient_date(row, column::LAST_VOTED, "last voted date"),
            status_code: optional_text(row.text(column::STATUS_CODE), 10),
            precinct_code: optional_text(row.text(column::PRECINCT_CODE), 50),
            precinct_part: optional_text(row.text(column::PRECINCT_PART), 50),
            legislative_district: optional_text(row.text(column::LEGISLATIVE_DISTRICT), 10),
            congressional_district: optional_text(row.text(column::CONGRESSIONAL_DISTRICT), 10),
        })
    }
}

/// Replace the voter table with the contents of `input`.
///
/// Never fails: setup problems come back as an unsuccessful outcome with one
/// error and the table untouched.
pub async fn import_voters<R: Read>(ctx: &ImportContext, input: R) -> ReplaceOutcome {
    match run(ctx, input).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("voter import aborted: {}", e);
            ReplaceOutcome::failed(e)
        }
    }
}

/// Open `path` and import it with [`import_voters`].
pub async fn import_voters_file(ctx: &ImportContext, path: impl AsRef<Path>) -> ReplaceOutcome {
    let path = path.as_ref();
    match File::open(path) {
        Ok(file) => import_voters(ctx, file).await,
        Err(e) => ReplaceOutcome::failed(ImportError::open_file(path, e)),
    }
}

async fn run<R: Read>(ctx: &ImportContext, input: R) -> Result<ReplaceOutcome, ImportError> {
    let table = ctx.tables.voters.as_str();
    let import_date = Utc::now();
    log::info!("starting voter import into {}", table);

    let mut tx = ctx.pool.begin().await?;
    lock_import(&mut tx, table).await?;

    let removed = sqlx::query(&format!("DELETE FROM {table}"))
        .execute(&mut *tx)
        .await?
        .rows_affected();
    log::debug!("staged removal of {} existing voters", removed);

    let mut batch = VotersData::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut errors = Vec::new();
    let mut count = 0usize;

    for line in Rows::new(input, Delimiter::Pipe, true) {
        let row = match line? {
            Line::Row(row) => row,
            Line::Unreadable(issue) => {
                log::warn!("voter import: {}", issue);
                errors.push(issue);
                continue;
            }
        };

        let voter = match VoterRow::parse(&row) {
            Ok(voter) => voter,
            Err(issue) => {
                log::warn!("voter import: {}", issue);
                errors.push(issue);
                continue;
            }
        };

        if !seen.insert(voter.state_voter_id.clone()) {
            let issue = RowIssue::at(
                row.line,
                format!("duplicate state voter id {}", voter.state_voter_id),
            );
            log::warn!("voter import: {}", issue);
            errors.push(issue);
            continue;
        }

        batch.push(row.line, voter);
        if batch.len() >= ctx.config.replace_batch_size {
            count += flush_batch(&mut tx, table, &mut batch, import_date, &mut errors).await?;
        }
    }
    count += flush_batch(&mut tx, table, &mut batch, import_date, &mut errors).await?;

    if errors.is_empty() {
        tx.commit().await?;
        log::info!("voter import committed: {} voters", count);
        Ok(ReplaceOutcome {
            success: true,
            message: format!("Successfully imported {} voters", count),
            count,
            errors,
        })
    } else {
        tx.rollback().await?;
        log::warn!(
            "voter import rolled back: {} errors, table left unchanged",
            errors.len()
        );
        Ok(ReplaceOutcome {
            success: false,
            message: format!(
                "Import failed with {} error(s); voter table left unchanged",
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

    fn voter_fields() -> Vec<String> {
        let mut fields = vec![String::new(); 33];
        fields[column::STATE_VOTER_ID] = "WA0001".into();
        fields[column::FIRST_NAME] = "Jane".into();
        fields[column::LAST_NAME] = "Doe".into();
        fields[column::BIRTH_YEAR] = "1980".into();
        fields[column::GENDER] = "F".into();
        fields[column::COUNTY_CODE] = "KI".into();
        fields[column::PRECINCT_CODE] = "1234".into();
        fields[column::PRECINCT_PART] = "0".into();
        fields[column::LEGISLATIVE_DISTRICT] = "43".into();
        fields[column::CONGRESSIONAL_DISTRICT] = "7".into();
        fields[column::REGISTRATION_DATE] = "03/15/2004".into();
        fields[column::LAST_VOTED] = "2024-11-05".into();
        fields[column::STATUS_CODE] = "A".into();
        fields
    }

    fn row(fields: Vec<String>) -> Row {
        Row { line: 2, fields }
    }

    #[test]
    fn maps_positional_columns() {
        let voter = VoterRow::parse(&row(voter_fields())).unwrap();
        assert_eq!(voter.state_voter_id, "WA0001");
        assert_eq!(voter.first_name.as_deref(), Some("Jane"));
        assert_eq!(voter.middle_name, None);
        assert_eq!(voter.birth_year, Some(1980));
        assert_eq!(voter.registration_date, NaiveDate::from_ymd_opt(2004, 3, 15));
        assert_eq!(voter.last_voted, NaiveDate::from_ymd_opt(2024, 11, 5));
        assert_eq!(voter.status_code.as_deref(), Some("A"));
        assert_eq!(voter.legislative_district.as_deref(), Some("43"));
    }

    #[test]
    fn status_code_is_optional_at_thirty_two_columns() {
        let mut fields = voter_fields();
        fields.truncate(32);
        let voter = VoterRow::parse(&row(fields)).unwrap();
        assert_eq!(voter.status_code, None);
    }

    #[test]
    fn short_rows_are_rejected() {
        let mut fields = voter_fields();
        fields.truncate(20);
        let issue = VoterRow::parse(&row(fields)).unwrap_err();
        assert_eq!(issue.line, Some(2));
        assert!(issue.message.contains("at least 32"));
    }

    #[test]
    fn bad_values_become_null_and_names_truncate() {
        let mut fields = voter_fields();
        fields[column::BIRTH_YEAR] = "unknown".into();
        fields[column::REGISTRATION_DATE] = String::new();
        fields[column::LAST_VOTED] = "sometime".into();
        fields[column::FIRST_NAME] = "A".repeat(150);
        let voter = VoterRow::parse(&row(fields)).unwrap();
        assert_eq!(voter.birth_year, None);
        assert_eq!(voter.registration_date, None);
        assert_eq!(voter.last_voted, None);
        assert_eq!(voter.first_name.map(|n| n.len()), Some(100));
    }

    #[test]
    fn missing_voter_id_is_an_error() {
        let mut fields = voter_fields();
        fields[column::STATE_VOTER_ID] = String::new();
        assert!(VoterRow::parse(&row(fields)).is_err());
    }
}
