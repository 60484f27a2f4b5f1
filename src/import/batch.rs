//! Columnar batches and bulk inserts.
//!
//! Rows are buffered into parallel vectors (one per column) and written with a
//! single PostgreSQL `UNNEST` insert per batch. All vectors in a batch always
//! have the same length.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Postgres, Transaction};

use crate::db::RowSavepoint;
use crate::import::history::HistoryRow;
use crate::import::outcome::RowIssue;
use crate::import::precincts::PrecinctRow;
use crate::import::voters::VoterRow;

/// A buffered set of rows that can be written in one statement.
pub(crate) trait ColumnarBatch {
    fn len(&self) -> usize;

    /// Input line of the first buffered row, for error reporting.
    fn first_line(&self) -> Option<u64>;

    fn clear(&mut self);

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        import_date: DateTime<Utc>,
    ) -> Result<usize, sqlx::Error>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write and clear a batch under a savepoint.
///
/// A rejected batch becomes one [`RowIssue`] that points at the batch's first
/// line; the transaction stays usable so the rest of the file is still checked.
/// Returns the number of rows written.
pub(crate) async fn flush_batch<B: ColumnarBatch>(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    batch: &mut B,
    import_date: DateTime<Utc>,
    errors: &mut Vec<RowIssue>,
) -> Result<usize, sqlx::Error> {
    if batch.is_empty() {
        return Ok(0);
    }

    let size = batch.len();
    let savepoint = RowSavepoint::begin(tx).await?;
    let written = match batch.insert(tx, table, import_date).await {
        Ok(written) => {
            savepoint.release(tx).await?;
            log::debug!("flushed {} rows into {}", written, table);
            written
        }
        Err(e) => {
            savepoint.rollback(tx).await?;
            let line = batch.first_line().unwrap_or(0);
            log::warn!("batch of {} rows near line {} rejected: {}", size, line, e);
            errors.push(RowIssue::at(
                line,
                format!("Batch insert of {} rows starting near line {} failed: {}", size, line, e),
            ));
            0
        }
    };

    batch.clear();
    Ok(written)
}

// ===== Precincts =====

#[derive(Debug, Default)]
pub(crate) struct PrecinctsData {
    pub lines: Vec<u64>,
    pub county_codes: Vec<String>,
    pub county_names: Vec<String>,
    pub district_types: Vec<String>,
    pub district_codes: Vec<String>,
    pub district_names: Vec<String>,
    pub precinct_codes: Vec<String>,
    pub precinct_names: Vec<String>,
    pub precinct_parts: Vec<String>,
}

impl PrecinctsData {
    pub fn push(&mut self, line: u64, row: PrecinctRow) {
        self.lines.push(line);
        self.county_codes.push(row.county_code);
        self.county_names.push(row.county_name);
        self.district_types.push(row.district_type);
        self.district_codes.push(row.district_code);
        self.district_names.push(row.district_name);
        self.precinct_codes.push(row.precinct_code);
        self.precinct_names.push(row.precinct_name);
        self.precinct_parts.push(row.precinct_part);
    }
}

impl ColumnarBatch for PrecinctsData {
    fn len(&self) -> usize {
        self.lines.len()
    }

    fn first_line(&self) -> Option<u64> {
        self.lines.first().copied()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        import_date: DateTime<Utc>,
    ) -> Result<usize, sqlx::Error> {
        let result = sqlx::query(&format!(
            r#"INSERT INTO {table} (
                   county_code, county_name, district_type, district_code,
                   district_name, precinct_code, precinct_name, precinct_part, import_date
               )
               SELECT t.*, $9
               FROM UNNEST(
                   $1::text[], $2::text[], $3::text[], $4::text[],
                   $5::text[], $6::text[], $7::text[], $8::text[]
               ) AS t"#
        ))
        .bind(&self.county_codes)
        .bind(&self.county_names)
        .bind(&self.district_types)
        .bind(&self.district_codes)
        .bind(&self.district_names)
        .bind(&self.precinct_codes)
        .bind(&self.precinct_names)
        .bind(&self.precinct_parts)
        .bind(import_date)
        .execute(&mut **tx)
        .await?;

        log::trace!("bulk inserted {} precincts", result.rows_affected());
        Ok(result.rows_affected() as usize)
    }
}

// ===== Voters =====

#[derive(Debug, Default)]
pub(crate) struct VotersData {
    pub lines: Vec<u64>,
    pub state_voter_ids: Vec<String>,
    pub first_names: Vec<Option<String>>,
    pub middle_names: Vec<Option<String>>,
    pub last_names: Vec<Option<String>>,
    pub name_suffixes: Vec<Option<String>>,
    pub birth_years: Vec<Option<i32>>,
    pub genders: Vec<Option<String>>,
    pub registration_dates: Vec<Option<NaiveDate>>,
    pub last_voted: Vec<Option<NaiveDate>>,
    pub status_codes: Vec<Option<String>>,
    pub precinct_codes: Vec<Option<String>>,
    pub precinct_parts: Vec<Option<String>>,
    pub legislative_districts: Vec<Option<String>>,
    pub congressional_districts: Vec<Option<String>>,
}

impl VotersData {
    pub fn push(&mut self, line: u64, row: VoterRow) {
        self.lines.push(line);
        self.state_voter_ids.push(row.state_voter_id);
        self.first_names.push(row.first_name);
        self.middle_names.push(row.middle_name);
        self.last_names.push(row.last_name);
        self.name_suffixes.push(row.name_suffix);
        self.birth_years.push(row.birth_year);
        self.genders.push(row.gender);
        self.registration_dates.push(row.registration_date);
        self.last_voted.push(row.last_voted);
        self.status_codes.push(row.status_code);
        self.precinct_codes.push(row.precinct_code);
        self.precinct_parts.push(row.precinct_part);
        self.legislative_districts.push(row.legislative_district);
        self.congressional_districts.push(row.congressional_district);
    }
}

impl ColumnarBatch for VotersData {
    fn len(&self) -> usize {
        self.lines.len()
    }

    fn first_line(&self) -> Option<u64> {
        self.lines.first().copied()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        import_date: DateTime<Utc>,
    ) -> Result<usize, sqlx::Error> {
        let result = sqlx::query(&format!(
            r#"INSERT INTO {table} (
                   state_voter_id, first_name, middle_name, last_name, name_suffix,
                   birth_year, gender, registration_date, last_voted, status_code,
                   precinct_code, precinct_part, legislative_district,
                   congressional_district, import_date
               )
               SELECT t.*, $15
               FROM UNNEST(
                   $1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                   $6::int[], $7::text[], $8::date[], $9::date[], $10::text[],
                   $11::text[], $12::text[], $13::text[], $14::text[]
               ) AS t"#
        ))
        .bind(&self.state_voter_ids)
        .bind(&self.first_names)
        .bind(&self.middle_names)
        .bind(&self.last_names)
        .bind(&self.name_suffixes)
        .bind(&self.birth_years)
        .bind(&self.genders)
        .bind(&self.registration_dates)
        .bind(&self.last_voted)
        .bind(&self.status_codes)
        .bind(&self.precinct_codes)
        .bind(&self.precinct_parts)
        .bind(&self.legislative_districts)
        .bind(&self.congressional_districts)
        .bind(import_date)
        .execute(&mut **tx)
        .await?;

        log::trace!("bulk inserted {} voters", result.rows_affected());
        Ok(result.rows_affected() as usize)
    }
}

// ===== Voter history =====

#[derive(Debug, Default)]
pub(crate) struct HistoryData {
    pub lines: Vec<u64>,
    pub voter_history_ids: Vec<String>,
    pub state_voter_ids: Vec<String>,
    pub county_codes: Vec<String>,
    pub county_codes_voting: Vec<String>,
    pub election_dates: Vec<NaiveDate>,
}

impl HistoryData {
    pub fn push(&mut self, line: u64, row: HistoryRow) {
        self.lines.push(line);
        self.voter_history_ids.push(row.voter_history_id);
        self.state_voter_ids.push(row.state_voter_id);
        self.county_codes.push(row.county_code);
        self.county_codes_voting.push(row.county_code_voting);
        self.election_dates.push(row.election_date);
    }

    /// Drop buffered rows whose history id is in `existing`, returning how many
    /// were removed.
    pub fn remove_ids(&mut self, existing: &std::collections::HashSet<String>) -> usize {
        if existing.is_empty() {
            return 0;
        }

        let before = self.len();
        let mut kept = HistoryData::default();
        for idx in 0..before {
            if existing.contains(&self.voter_history_ids[idx]) {
                continue;
            }
            kept.lines.push(self.lines[idx]);
            kept.voter_history_ids
                .push(std::mem::take(&mut self.voter_history_ids[idx]));
            kept.state_voter_ids
                .push(std::mem::take(&mut self.state_voter_ids[idx]));
            kept.county_codes.push(std::mem::take(&mut self.county_codes[idx]));
            kept.county_codes_voting
                .push(std::mem::take(&mut self.county_codes_voting[idx]));
            kept.election_dates.push(self.election_dates[idx]);
        }
        *self = kept;
        before - self.len()
    }
}

impl ColumnarBatch for HistoryData {
    fn len(&self) -> usize {
        self.lines.len()
    }

    fn first_line(&self) -> Option<u64> {
        self.lines.first().copied()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        import_date: DateTime<Utc>,
    ) -> Result<usize, sqlx::Error> {
        let result = sqlx::query(&format!(
            r#"INSERT INTO {table} (
                   voter_history_id, state_voter_id, county_code,
                   county_code_voting, election_date, import_date
               )
               SELECT t.*, $6
               FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::date[]) AS t
               ON CONFLICT (voter_history_id) DO NOTHING"#
        ))
        .bind(&self.voter_history_ids)
        .bind(&self.state_voter_ids)
        .bind(&self.county_codes)
        .bind(&self.county_codes_voting)
        .bind(&self.election_dates)
        .bind(import_date)
        .execute(&mut **tx)
        .await?;

        log::trace!("bulk inserted {} voter history rows", result.rows_affected());
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn history_row(id: &str) -> HistoryRow {
        HistoryRow {
            voter_history_id: id.to_string(),
            county_code: "KI".to_string(),
            county_code_voting: "KI".to_string(),
            state_voter_id: format!("WA{id}"),
            election_date: NaiveDate::from_ymd_opt(2024, 11, 5).unwrap(),
        }
    }

    #[test]
    fn remove_ids_keeps_columns_aligned() {
        let mut data = HistoryData::default();
        data.push(2, history_row("1"));
        data.push(3, history_row("2"));
        data.push(4, history_row("3"));

        let existing: HashSet<String> = ["2".to_string()].into_iter().collect();
        assert_eq!(data.remove_ids(&existing), 1);

        assert_eq!(data.len(), 2);
        assert_eq!(data.lines, vec![2, 4]);
        assert_eq!(data.voter_history_ids, vec!["1", "3"]);
        assert_eq!(data.state_voter_ids, vec!["WA1", "WA3"]);
        assert_eq!(data.county_codes.len(), 2);
        assert_eq!(data.election_dates.len(), 2);
        assert_eq!(data.first_line(), Some(2));
    }

    #[test]
    fn clear_empties_every_column() {
        let mut data = HistoryData::default();
        data.push(2, history_row("1"));
        data.clear();
        assert!(data.is_empty());
        assert!(data.voter_history_ids.is_empty());
        assert_eq!(data.first_line(), None);
    }
}
