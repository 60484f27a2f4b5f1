use election_importer::test_support::TestDatabase;

/// Provision a test database, or `None` (after saying why) when no PostgreSQL
/// server or container runtime is reachable.
pub async fn test_db(test_name: &str) -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping {test_name}: {err}");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}
