mod common;

use election_importer::ImportConfig;
use election_importer::import::import_voter_history;
use election_importer::models::VoterHistoryRecord;
use election_importer::test_support::TestFixtures;

const HEADER: &str = "VoterHistoryID|CountyCode|CountyCodeVoting|StateVoterID|ElectionDate\n";

fn history_file(rows: &[&str]) -> String {
    let mut body = HEADER.to_string();
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    body
}

#[tokio::test]
async fn history_requires_registered_voters() {
    let Some(db) = common::test_db("history_requires_registered_voters").await else {
        return;
    };
    let ctx = db.context();
    let fixtures = TestFixtures::new(db.pool());

    let input = history_file(&["9001|KI|KI|WA0001|11/05/2024"]);
    let outcome = import_voter_history(ctx, input.as_bytes()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.count, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.message.contains("no voters found"));
    assert_eq!(fixtures.row_count(&ctx.tables.voter_history).await.unwrap(), 0);

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn orphans_are_skipped_and_reimport_adds_nothing() {
    let Some(db) = common::test_db("orphans_are_skipped_and_reimport_adds_nothing").await else {
        return;
    };
    let ctx = db.context();
    let fixtures = TestFixtures::new(db.pool());
    fixtures.insert_voter(&ctx.tables.voters, "WA0001").await.unwrap();
    fixtures.insert_voter(&ctx.tables.voters, "WA0002").await.unwrap();

    let input = history_file(&[
        "9001|KI|KI|WA0001|11/05/2024",
        "9002|KI|PI|WA0002|2024-08-06",
        "9003|KI|KI|WA9999|11/05/2024",
        "9001|KI|KI|WA0001|11/05/2024",
    ]);

    let first = import_voter_history(ctx, input.as_bytes()).await;
    assert!(first.success, "unexpected errors: {:?}", first.errors);
    assert_eq!(first.count, 2);
    assert_eq!(first.skipped, 2);
    assert_eq!(
        first.message,
        "Successfully imported 2 voter history records (2 skipped)"
    );

    let stored: Vec<VoterHistoryRecord> = sqlx::query_as(&format!(
        "SELECT * FROM {} ORDER BY voter_history_id",
        ctx.tables.voter_history
    ))
    .fetch_all(db.pool())
    .await
    .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].county_code_voting, "PI");
    assert_eq!(
        stored[1].election_date,
        chrono::NaiveDate::from_ymd_opt(2024, 8, 6).unwrap()
    );

    let second = import_voter_history(ctx, input.as_bytes()).await;
    assert!(second.success);
    assert_eq!(second.count, 0);
    assert_eq!(second.skipped, 4);
    assert_eq!(fixtures.row_count(&ctx.tables.voter_history).await.unwrap(), 2);

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn history_survives_voter_replacement() {
    let Some(db) = common::test_db("history_survives_voter_replacement").await else {
        return;
    };
    let ctx = db.context();
    let fixtures = TestFixtures::new(db.pool());
    fixtures.insert_voter(&ctx.tables.voters, "WA0001").await.unwrap();

    let input = history_file(&["9001|KI|KI|WA0001|11/05/2024"]);
    assert!(import_voter_history(ctx, input.as_bytes()).await.success);

    sqlx::query(&format!("DELETE FROM {}", ctx.tables.voters))
        .execute(db.pool())
        .await
        .unwrap();

    assert_eq!(fixtures.row_count(&ctx.tables.voter_history).await.unwrap(), 1);

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn bad_row_rolls_back_every_batch() {
    let Some(db) = common::test_db("bad_row_rolls_back_every_batch").await else {
        return;
    };
    let ctx = db
        .context_with(ImportConfig {
            history_batch_size: 2,
            ..ImportConfig::default()
        })
        .unwrap();
    let fixtures = TestFixtures::new(db.pool());
    fixtures.insert_voter(&ctx.tables.voters, "WA0001").await.unwrap();

    let input = history_file(&[
        "9001|KI|KI|WA0001|11/05/2024",
        "9002|KI|KI|WA0001|08/06/2024",
        "9003|KI|KI|WA0001|11/07/2023",
        "9004|KI|KI|WA0001|not a date",
        "9005|KI|KI|WA0001|11/08/2022",
    ]);
    let outcome = import_voter_history(&ctx, input.as_bytes()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.count, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].line, Some(5));
    assert_eq!(fixtures.row_count(&ctx.tables.voter_history).await.unwrap(), 0);

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn small_batches_insert_every_row() {
    let Some(db) = common::test_db("small_batches_insert_every_row").await else {
        return;
    };
    let ctx = db
        .context_with(ImportConfig {
            history_batch_size: 3,
            ..ImportConfig::default()
        })
        .unwrap();
    let fixtures = TestFixtures::new(db.pool());
    fixtures.insert_voter(&ctx.tables.voters, "WA0001").await.unwrap();

    let rows: Vec<String> = (0..10)
        .map(|i| format!("{}|KI|KI|WA0001|2024-01-{:02}", 100 + i, i + 1))
        .collect();
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();

    let outcome = import_voter_history(&ctx, history_file(&refs).as_bytes()).await;
    assert!(outcome.success, "unexpected errors: {:?}", outcome.errors);
    assert_eq!(outcome.count, 10);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(fixtures.row_count(&ctx.tables.voter_history).await.unwrap(), 10);

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn rejected_batch_is_reported_once_and_rolled_back() {
    let Some(db) = common::test_db("rejected_batch_is_reported_once_and_rolled_back").await else {
        return;
    };
    let ctx = db
        .context_with(ImportConfig {
            history_batch_size: 2,
            ..ImportConfig::default()
        })
        .unwrap();
    let fixtures = TestFixtures::new(db.pool());
    fixtures.insert_voter(&ctx.tables.voters, "WA0001").await.unwrap();

    let earlier = history_file(&["8001|KI|KI|WA0001|11/03/2020"]);
    assert!(import_voter_history(&ctx, earlier.as_bytes()).await.success);

    sqlx::query(&format!(
        "ALTER TABLE {} ADD CONSTRAINT history_id_not_blocked CHECK (voter_history_id <> '9004')",
        ctx.tables.voter_history
    ))
    .execute(db.pool())
    .await
    .unwrap();

    let input = history_file(&[
        "9001|KI|KI|WA0001|11/05/2024",
        "9002|KI|KI|WA0001|08/06/2024",
        "9003|KI|KI|WA0001|11/07/2023",
        "9004|KI|KI|WA0001|08/01/2023",
        "9005|KI|KI|WA0001|11/08/2022",
    ]);
    let outcome = import_voter_history(&ctx, input.as_bytes()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.count, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].line, Some(4));
    assert!(
        outcome.errors[0].message.contains("Batch insert of 2 rows"),
        "unexpected message: {}",
        outcome.errors[0].message
    );

    let stored: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT voter_history_id FROM {}",
        ctx.tables.voter_history
    ))
    .fetch_all(db.pool())
    .await
    .unwrap();
    assert_eq!(stored, vec!["8001".to_string()]);

    db.close().await.expect("failed to drop test database");
}
