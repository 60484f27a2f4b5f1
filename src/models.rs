use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ===== Election Models =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Candidate {
    pub id: i64,
    pub candidate_name: String,
    pub race_name: String,
    pub election_date: NaiveDate,
    pub party: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct ElectionResult {
    pub id: i64,
    pub election_date: NaiveDate,
    pub candidate_id: i64,
    pub precinct_name: String,
    pub precinct_number: String,
    pub votes: i32,
    pub filename: String,
}

// ===== Registration Models (replaced wholesale on import) =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Precinct {
    pub id: i64,
    pub county_code: String,
    pub county_name: String,
    pub district_type: String,
    pub district_code: String,
    pub district_name: String,
    pub precinct_code: String,
    pub precinct_name: String,
    pub precinct_part: String,
    pub import_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Voter {
    pub id: i64,
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
    pub import_date: DateTime<Utc>,
}

// ===== Cumulative Models =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VoterHistoryRecord {
    pub id: i64,
    pub voter_history_id: String,
    pub state_voter_id: String,
    pub county_code: String,
    pub county_code_voting: String,
    pub election_date: NaiveDate,
    pub import_date: DateTime<Utc>,
}
