//! Candidate resolution and management.
//!
//! Candidates are keyed by (name, race, election date). A candidate's party is
//! decided once, when the row is first created, and import never overwrites it:
//!
//! 1. `WRITE-IN` (any case) is always `unaffiliated`.
//! 2. Otherwise the most recent earlier election for the same name and race
//!    that has a party supplies it.
//! 3. Otherwise the party stays unset until someone edits it by hand.

use std::str::FromStr;

use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::config::TableNames;
use crate::db::ImportContext;
use crate::error::ImportError;
use crate::models::Candidate;

pub const WRITE_IN: &str = "WRITE-IN";
pub const UNAFFILIATED: &str = "unaffiliated";

/// Party forced by the candidate's name alone, before any history lookup.
pub fn fixed_party(candidate_name: &str) -> Option<&'static str> {
    if candidate_name.to_uppercase() == WRITE_IN {
        Some(UNAFFILIATED)
    } else {
        None
    }
}

/// Find the candidate for (name, race, date), creating it when absent.
///
/// Lookup and insert are separate statements; a concurrent insert of the same
/// key is absorbed by `ON CONFLICT DO NOTHING` followed by a second lookup.
pub async fn resolve_candidate(
    tx: &mut Transaction<'_, Postgres>,
    tables: &TableNames,
    candidate_name: &str,
    race_name: &str,
    election_date: NaiveDate,
) -> Result<i64, ImportError> {
    if let Some(id) = find_candidate_id(tx, tables, candidate_name, race_name, election_date).await? {
        return Ok(id);
    }

    let party = match fixed_party(candidate_name) {
        Some(party) => Some(party.to_string()),
        None => previous_party(tx, tables, candidate_name, race_name, election_date).await?,
    };

    let inserted: Option<i64> = sqlx::query_scalar(&format!(
        r#"INSERT INTO {} (candidate_name, race_name, election_date, party)
           VALUES ($1, $2, $3, $4)
           ON CONFLICT (candidate_name, race_name, election_date) DO NOTHING
           RETURNING id"#,
        tables.candidates
    ))
    .bind(candidate_name)
    .bind(race_name)
    .bind(election_date)
    .bind(party.as_deref())
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(id) = inserted {
        log::debug!(
            "created candidate {} ({}) for {} on {} with party {:?}",
            id,
            candidate_name,
            race_name,
            election_date,
            party
        );
        return Ok(id);
    }

    log::warn!(
        "candidate {} / {} was created concurrently, re-reading",
        candidate_name,
        race_name
    );
    find_candidate_id(tx, tables, candidate_name, race_name, election_date)
        .await?
        .ok_or_else(|| ImportError::CandidateConflict {
            name: candidate_name.to_string(),
            race: race_name.to_string(),
        })
}

async fn find_candidate_id(
    tx: &mut Transaction<'_, Postgres>,
    tables: &TableNames,
    candidate_name: &str,
    race_name: &str,
    election_date: NaiveDate,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(&format!(
        r#"SELECT id FROM {}
           WHERE candidate_name = $1 AND race_name = $2 AND election_date = $3"#,
        tables.candidates
    ))
    .bind(candidate_name)
    .bind(race_name)
    .bind(election_date)
    .fetch_optional(&mut **tx)
    .await
}

async fn previous_party(
    tx: &mut Transaction<'_, Postgres>,
    tables: &TableNames,
    candidate_name: &str,
    race_name: &str,
    election_date: NaiveDate,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(&format!(
        r#"SELECT party FROM {}
           WHERE candidate_name = $1
             AND race_name = $2
             AND election_date < $3
             AND party IS NOT NULL
           ORDER BY election_date DESC
           LIMIT 1"#,
        tables.candidates
    ))
    .bind(candidate_name)
    .bind(race_name)
    .bind(election_date)
    .fetch_optional(&mut **tx)
    .await
}

// ===== Management =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyFilter {
    /// Candidates with no party (null or empty).
    Unassigned,
    Named(String),
}

impl From<&str> for PartyFilter {
    fn from(value: &str) -> Self {
        if value == "none" {
            PartyFilter::Unassigned
        } else {
            PartyFilter::Named(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortColumn {
    #[default]
    ElectionDate,
    RaceName,
    CandidateName,
    Party,
}

impl SortColumn {
    fn column(self) -> &'static str {
        match self {
            SortColumn::ElectionDate => "election_date",
            SortColumn::RaceName => "race_name",
            SortColumn::CandidateName => "candidate_name",
            SortColumn::Party => "party",
        }
    }
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "election_date" => Ok(SortColumn::ElectionDate),
            "race_name" => Ok(SortColumn::RaceName),
            "candidate_name" => Ok(SortColumn::CandidateName),
            "party" => Ok(SortColumn::Party),
            other => Err(format!("unsupported sort column: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortOrder::Asc),
            "DESC" => Ok(SortOrder::Desc),
            other => Err(format!("unsupported sort order: {other}")),
        }
    }
}

/// Filters for [`list_candidates`]. All set filters must match.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub election_date: Option<NaiveDate>,
    pub race: Option<String>,
    pub party: Option<PartyFilter>,
    /// Case-insensitive substring match on candidate or race name.
    pub search: Option<String>,
    pub order_by: SortColumn,
    pub order: SortOrder,
}

/// Escape `LIKE` wildcards so user text matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn list_query<'a>(tables: &TableNames, filter: &'a CandidateFilter) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT id, candidate_name, race_name, election_date, party FROM {} WHERE TRUE",
        tables.candidates
    ));

    if let Some(date) = filter.election_date {
        builder.push(" AND election_date = ").push_bind(date);
    }
    if let Some(race) = &filter.race {
        builder.push(" AND race_name = ").push_bind(race.as_str());
    }
    match &filter.party {
        Some(PartyFilter::Unassigned) => {
            builder.push(" AND (party IS NULL OR party = '')");
        }
        Some(PartyFilter::Named(party)) => {
            builder.push(" AND party = ").push_bind(party.as_str());
        }
        None => {}
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (candidate_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR race_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    let direction = match filter.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    builder.push(format!(
        " ORDER BY {} {}, id ASC",
        filter.order_by.column(),
        direction
    ));
    builder
}

pub async fn list_candidates(
    ctx: &ImportContext,
    filter: &CandidateFilter,
) -> Result<Vec<Candidate>, sqlx::Error> {
    let mut builder = list_query(&ctx.tables, filter);
    builder
        .build_query_as::<Candidate>()
        .fetch_all(&ctx.pool)
        .await
}

pub async fn get_candidate(ctx: &ImportContext, id: i64) -> Result<Option<Candidate>, sqlx::Error> {
    sqlx::query_as::<_, Candidate>(&format!(
        "SELECT id, candidate_name, race_name, election_date, party FROM {} WHERE id = $1",
        ctx.tables.candidates
    ))
    .bind(id)
    .fetch_optional(&ctx.pool)
    .await
}

/// Manually assign (or clear, with an empty string) a candidate's party.
///
/// Returns `false` when no candidate has the given id.
pub async fn set_candidate_party(
    ctx: &ImportContext,
    id: i64,
    party: &str,
) -> Result<bool, sqlx::Error> {
    let party = party.trim();
    let party = if party.is_empty() { None } else { Some(party) };

    let result = sqlx::query(&format!(
        "UPDATE {} SET party = $1, updated_at = NOW() WHERE id = $2",
        ctx.tables.candidates
    ))
    .bind(party)
    .bind(id)
    .execute(&ctx.pool)
    .await?;

    log::info!("candidate {} party set to {:?}", id, party);
    Ok(result.rows_affected() > 0)
}

/// Delete a candidate; its results go with it.
pub async fn delete_candidate(ctx: &ImportContext, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", ctx.tables.candidates))
        .bind(id)
        .execute(&ctx.pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn distinct_election_dates(ctx: &ImportContext) -> Result<Vec<NaiveDate>, sqlx::Error> {
    sqlx::query_scalar(&format!(
        "SELECT DISTINCT election_date FROM {} ORDER BY election_date DESC",
        ctx.tables.candidates
    ))
    .fetch_all(&ctx.pool)
    .await
}

pub async fn distinct_races(ctx: &ImportContext) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(&format!(
        "SELECT DISTINCT race_name FROM {} ORDER BY race_name ASC",
        ctx.tables.candidates
    ))
    .fetch_all(&ctx.pool)
    .await
}

pub async fn distinct_parties(ctx: &ImportContext) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(&format!(
        "SELECT DISTINCT party FROM {} WHERE party IS NOT NULL AND party != '' ORDER BY party ASC",
        ctx.tables.candidates
    ))
    .fetch_all(&ctx.pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Execute;

    #[test]
    fn write_in_is_unaffiliated_in_any_case() {
        assert_eq!(fixed_party("WRITE-IN"), Some(UNAFFILIATED));
        assert_eq!(fixed_party("Write-In"), Some(UNAFFILIATED));
        assert_eq!(fixed_party("write-in"), Some(UNAFFILIATED));
        assert_eq!(fixed_party("Jane Doe"), None);
        assert_eq!(fixed_party("WRITE IN"), None);
    }

    #[test]
    fn party_filter_none_means_unassigned() {
        assert_eq!(PartyFilter::from("none"), PartyFilter::Unassigned);
        assert_eq!(
            PartyFilter::from("Democrat"),
            PartyFilter::Named("Democrat".to_string())
        );
    }

    #[test]
    fn sort_values_are_whitelisted() {
        assert_eq!("race_name".parse::<SortColumn>(), Ok(SortColumn::RaceName));
        assert!("id; DROP TABLE x".parse::<SortColumn>().is_err());
        assert_eq!("asc".parse::<SortOrder>(), Ok(SortOrder::Asc));
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("Mayor"), "Mayor");
    }

    #[test]
    fn list_query_binds_every_filter() {
        let filter = CandidateFilter {
            election_date: NaiveDate::from_ymd_opt(2024, 11, 5),
            race: Some("Mayor".into()),
            party: Some(PartyFilter::Unassigned),
            search: Some("doe".into()),
            order_by: SortColumn::CandidateName,
            order: SortOrder::Asc,
        };
        let tables = TableNames::default();
        let mut builder = list_query(&tables, &filter);
        let query = builder.build();
        let sql = query.sql();
        assert!(sql.starts_with("SELECT id, candidate_name, race_name, election_date, party FROM election_candidates"));
        assert!(sql.contains("election_date = $1"));
        assert!(sql.contains("race_name = $2"));
        assert!(sql.contains("(party IS NULL OR party = '')"));
        assert!(sql.contains("candidate_name ILIKE $3 OR race_name ILIKE $4"));
        assert!(sql.ends_with("ORDER BY candidate_name ASC, id ASC"));
    }

    #[test]
    fn default_listing_is_newest_election_first() {
        let filter = CandidateFilter::default();
        let tables = TableNames::default();
        let mut builder = list_query(&tables, &filter);
        let query = builder.build();
        assert!(query.sql().ends_with("ORDER BY election_date DESC, id ASC"));
    }
}
