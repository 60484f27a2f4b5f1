//! Table creation for the importer's five tables.
//!
//! `ensure_schema` is safe to run on every start: each statement uses
//! `IF NOT EXISTS`, and a failing statement is logged rather than raised so a
//! host can keep working against whatever schema already exists.

use serde::Serialize;

use crate::config::TableNames;
use crate::db::ImportContext;

/// Per-statement result of an `ensure_schema` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    /// Tables whose DDL completed (created now or already present).
    pub ready: Vec<String>,
    /// Tables whose DDL failed, with the database error text.
    pub failed: Vec<(String, String)>,
}

impl SchemaReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// DDL statements in dependency order, grouped by the table they belong to.
fn schema_statements(tables: &TableNames) -> Vec<(&str, Vec<String>)> {
    let TableNames {
        candidates,
        results,
        precincts,
        voters,
        voter_history,
    } = tables;

    vec![
        (
            candidates.as_str(),
            vec![format!(
                r#"CREATE TABLE IF NOT EXISTS {candidates} (
                    id BIGSERIAL PRIMARY KEY,
                    candidate_name VARCHAR(255) NOT NULL,
                    race_name VARCHAR(255) NOT NULL,
                    election_date DATE NOT NULL,
                    party VARCHAR(100) DEFAULT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CONSTRAINT {candidates}_unique_candidate_race
                        UNIQUE (candidate_name, race_name, election_date)
                )"#
            )],
        ),
        (
            results.as_str(),
            vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {results} (
                        id BIGSERIAL PRIMARY KEY,
                        election_date DATE NOT NULL,
                        candidate_id BIGINT NOT NULL
                            REFERENCES {candidates}(id) ON DELETE CASCADE,
                        precinct_name VARCHAR(100) NOT NULL,
                        precinct_number VARCHAR(20) NOT NULL,
                        votes INTEGER NOT NULL,
                        filename VARCHAR(255) NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        CONSTRAINT {results}_unique_vote_record
                            UNIQUE (candidate_id, precinct_number, election_date)
                    )"#
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {results}_election_date_idx ON {results} (election_date)"
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {results}_candidate_id_idx ON {results} (candidate_id)"
                ),
            ],
        ),
        (
            precincts.as_str(),
            vec![format!(
                r#"CREATE TABLE IF NOT EXISTS {precincts} (
                    id BIGSERIAL PRIMARY KEY,
                    county_code VARCHAR(10) NOT NULL,
                    county_name VARCHAR(100) NOT NULL,
                    district_type VARCHAR(100) NOT NULL,
                    district_code VARCHAR(50) NOT NULL,
                    district_name VARCHAR(255) NOT NULL,
                    precinct_code VARCHAR(50) NOT NULL,
                    precinct_name VARCHAR(255) NOT NULL,
                    precinct_part VARCHAR(50) NOT NULL,
                    import_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CONSTRAINT {precincts}_unique_precinct
                        UNIQUE (county_code, district_code, precinct_part)
                )"#
            )],
        ),
        (
            voters.as_str(),
            vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {voters} (
                        id BIGSERIAL PRIMARY KEY,
                        state_voter_id VARCHAR(50) NOT NULL,
                        first_name VARCHAR(100),
                        middle_name VARCHAR(100),
                        last_name VARCHAR(100),
                        name_suffix VARCHAR(20),
                        birth_year INTEGER,
                        gender VARCHAR(10),
                        registration_date DATE,
                        last_voted DATE,
                        status_code VARCHAR(10),
                        precinct_code VARCHAR(50),
                        precinct_part VARCHAR(50),
                        legislative_district VARCHAR(10),
                        congressional_district VARCHAR(10),
                        import_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        CONSTRAINT {voters}_unique_state_voter_id UNIQUE (state_voter_id)
                    )"#
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {voters}_precinct_idx ON {voters} (precinct_code, precinct_part)"
                ),
            ],
        ),
        (
            // state_voter_id is checked against the voters table at insert time;
            // it is not a live foreign key because voters are replaced wholesale.
            voter_history.as_str(),
            vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {voter_history} (
                        id BIGSERIAL PRIMARY KEY,
                        voter_history_id VARCHAR(50) NOT NULL,
                        state_voter_id VARCHAR(50) NOT NULL,
                        county_code VARCHAR(10) NOT NULL,
                        county_code_voting VARCHAR(10) NOT NULL,
                        election_date DATE NOT NULL,
                        import_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        CONSTRAINT {voter_history}_unique_history_id UNIQUE (voter_history_id)
                    )"#
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {voter_history}_voter_idx ON {voter_history} (state_voter_id)"
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {voter_history}_election_date_idx ON {voter_history} (election_date)"
                ),
            ],
        ),
    ]
}

/// Create any missing tables and indexes.
///
/// Failures are logged per table and reported in the returned
/// [`SchemaReport`]; later tables are still attempted.
pub async fn ensure_schema(ctx: &ImportContext) -> SchemaReport {
    log::info!("ensuring election import schema");

    let mut report = SchemaReport::default();

    for (table, statements) in schema_statements(&ctx.tables) {
        let mut failure = None;
        for statement in &statements {
            if let Err(e) = sqlx::query(statement).execute(&ctx.pool).await {
                log::error!("error creating table {}: {}", table, e);
                failure = Some(e.to_string());
                break;
            }
        }

        match failure {
            Some(message) => report.failed.push((table.to_string(), message)),
            None => report.ready.push(table.to_string()),
        }
    }

    if report.is_ok() {
        log::info!("schema ready ({} tables)", report.ready.len());
    } else {
        log::warn!(
            "schema incomplete: {} of {} tables failed",
            report.failed.len(),
            report.failed.len() + report.ready.len()
        );
    }

    report
}

/// Drop all five tables and recreate them empty.
///
/// **WARNING**: removes every imported row. Intended for development and tests.
pub async fn reset_schema(ctx: &ImportContext) -> Result<SchemaReport, sqlx::Error> {
    log::info!("resetting election import schema");

    let tables = &ctx.tables;
    for table in [
        &tables.voter_history,
        &tables.voters,
        &tables.results,
        &tables.candidates,
        &tables.precincts,
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(&ctx.pool)
            .await?;
    }

    log::info!("all tables dropped, recreating");
    Ok(ensure_schema(ctx).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_follow_dependency_order() {
        let tables = TableNames::default();
        let order: Vec<&str> = schema_statements(&tables)
            .into_iter()
            .map(|(table, _)| table)
            .collect();
        assert_eq!(
            order,
            vec![
                "election_candidates",
                "election_results",
                "election_precincts",
                "voters",
                "voter_history"
            ]
        );
    }

    #[test]
    fn results_reference_prefixed_candidates() {
        let tables = TableNames::with_prefix("lcd_").unwrap();
        let statements = schema_statements(&tables);
        let results_ddl = &statements[1].1[0];
        assert!(results_ddl.contains("CREATE TABLE IF NOT EXISTS lcd_election_results"));
        assert!(results_ddl.contains("REFERENCES lcd_election_candidates(id) ON DELETE CASCADE"));
    }

    #[test]
    fn history_has_no_live_voter_foreign_key() {
        let tables = TableNames::default();
        let statements = schema_statements(&tables);
        assert!(statements[4].1.iter().all(|ddl| !ddl.contains("REFERENCES")));
    }
}
