use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use election_importer::candidates::{
    self, CandidateFilter, PartyFilter, SortColumn, SortOrder,
};
use election_importer::import::{
    self, HistoryOutcome, ReplaceOutcome, ResultsOutcome, RowIssue,
};
use election_importer::schema::{self, SchemaReport};
use election_importer::{ImportConfig, ImportContext, ImportError, init_logger};

#[derive(Parser, Debug)]
#[command(
    name = "election-importer",
    about = "Import election results, precincts, voters and voter history into PostgreSQL"
)]
struct Args {
    /// Print outcomes as JSON instead of a summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create any missing tables and indexes.
    Schema,
    /// Drop and recreate every table. Removes all imported data.
    Reset,
    /// Import an election results CSV.
    ImportResults {
        file: PathBuf,
        /// Name to record (and read the election date from) instead of FILE's.
        #[arg(long)]
        filename: Option<String>,
    },
    /// Replace all precincts with the contents of a CSV file.
    ImportPrecincts { file: PathBuf },
    /// Replace all voters with a pipe-delimited registration extract.
    ImportVoters { file: PathBuf },
    /// Add voter history records from a pipe-delimited extract.
    ImportHistory { file: PathBuf },
    /// List candidates.
    Candidates {
        /// Election date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        race: Option<String>,
        /// Party name, or `none` for candidates without one.
        #[arg(long)]
        party: Option<String>,
        /// Substring of the candidate or race name.
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "election_date")]
        order_by: SortColumn,
        #[arg(long, default_value = "DESC")]
        order: SortOrder,
    },
    /// List the distinct election dates, races and parties on file.
    Filters,
    /// Set a candidate's party. An empty PARTY clears it.
    SetParty { id: i64, party: String },
    /// Delete a candidate and its results.
    DeleteCandidate { id: i64 },
}

#[derive(Serialize)]
struct FilterOptions {
    election_dates: Vec<NaiveDate>,
    races: Vec<String>,
    parties: Vec<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_issues(errors: &[RowIssue]) {
    for issue in errors {
        eprintln!("  {}", issue);
    }
}

fn report_schema(report: &SchemaReport, json: bool) -> Result<ExitCode, serde_json::Error> {
    if json {
        print_json(report)?;
    } else {
        println!("tables ready: {}", report.ready.join(", "));
        for (table, error) in &report.failed {
            eprintln!("error creating table {}: {}", table, error);
        }
    }
    Ok(if report.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report_results(outcome: &ResultsOutcome, json: bool) -> Result<ExitCode, serde_json::Error> {
    if json {
        print_json(outcome)?;
    } else {
        println!(
            "added: {}, updated: {}, skipped: {}",
            outcome.added, outcome.updated, outcome.skipped
        );
        for change in &outcome.debug {
            println!("  {}", change);
        }
        if !outcome.committed() {
            eprintln!("{} error(s), nothing was saved:", outcome.errors.len());
            print_issues(&outcome.errors);
        }
    }
    Ok(if outcome.committed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report_replace(outcome: &ReplaceOutcome, json: bool) -> Result<ExitCode, serde_json::Error> {
    if json {
        print_json(outcome)?;
    } else {
        println!("{}", outcome.message);
        print_issues(&outcome.errors);
    }
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report_history(outcome: &HistoryOutcome, json: bool) -> Result<ExitCode, serde_json::Error> {
    if json {
        print_json(outcome)?;
    } else {
        println!("{}", outcome.message);
        print_issues(&outcome.errors);
    }
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_logger();

    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL must be set to a PostgreSQL connection string")?;
    let ctx = ImportContext::connect(&database_url, ImportConfig::from_env()).await?;

    let code = match args.command {
        Command::Schema => report_schema(&schema::ensure_schema(&ctx).await, args.json)?,
        Command::Reset => report_schema(&schema::reset_schema(&ctx).await?, args.json)?,
        Command::ImportResults { file, filename } => {
            let outcome = match filename {
                None => import::import_results_file(&ctx, &file).await,
                Some(name) => {
                    let input = std::fs::File::open(&file)
                        .map_err(|e| ImportError::open_file(&file, e))?;
                    import::import_results(&ctx, input, &name).await
                }
            };
            report_results(&outcome, args.json)?
        }
        Command::ImportPrecincts { file } => {
            report_replace(&import::import_precincts_file(&ctx, &file).await, args.json)?
        }
        Command::ImportVoters { file } => {
            report_replace(&import::import_voters_file(&ctx, &file).await, args.json)?
        }
        Command::ImportHistory { file } => {
            report_history(&import::import_voter_history_file(&ctx, &file).await, args.json)?
        }
        Command::Candidates {
            date,
            race,
            party,
            search,
            order_by,
            order,
        } => {
            let filter = CandidateFilter {
                election_date: date,
                race,
                party: party.as_deref().map(PartyFilter::from),
                search,
                order_by,
                order,
            };
            let rows = candidates::list_candidates(&ctx, &filter).await?;
            if args.json {
                print_json(&rows)?;
            } else {
                for c in &rows {
                    println!(
                        "{:>6}  {}  {:<40}  {:<30}  {}",
                        c.id,
                        c.election_date,
                        c.race_name,
                        c.candidate_name,
                        c.party.as_deref().unwrap_or("-")
                    );
                }
            }
            ExitCode::SUCCESS
        }
        Command::Filters => {
            let options = FilterOptions {
                election_dates: candidates::distinct_election_dates(&ctx).await?,
                races: candidates::distinct_races(&ctx).await?,
                parties: candidates::distinct_parties(&ctx).await?,
            };
            if args.json {
                print_json(&options)?;
            } else {
                let dates: Vec<String> =
                    options.election_dates.iter().map(|d| d.to_string()).collect();
                println!("election dates: {}", dates.join(", "));
                println!("races: {}", options.races.join(", "));
                println!("parties: {}", options.parties.join(", "));
            }
            ExitCode::SUCCESS
        }
        Command::SetParty { id, party } => {
            if candidates::set_candidate_party(&ctx, id, &party).await? {
                println!("candidate {} updated", id);
                ExitCode::SUCCESS
            } else {
                eprintln!("error: no candidate with id {}", id);
                ExitCode::FAILURE
            }
        }
        Command::DeleteCandidate { id } => {
            if candidates::delete_candidate(&ctx, id).await? {
                println!("candidate {} deleted", id);
                ExitCode::SUCCESS
            } else {
                eprintln!("error: no candidate with id {}", id);
                ExitCode::FAILURE
            }
        }
    };

    ctx.pool.close().await;
    Ok(code)
}
