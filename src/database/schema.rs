/// Database schema definitions for the preference cache

/// Database schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Version 1: the value cache
pub const V1_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    // `owner` is "device" for local-only settings, else the account DID
    r#"
    CREATE TABLE IF NOT EXISTS preferences (
        owner TEXT NOT NULL,
        key TEXT NOT NULL,
        value_json TEXT NOT NULL,
        updated_at DATETIME NOT NULL,
        PRIMARY KEY (owner, key)
    )
    "#,
];

/// Version 2: journal of writes not yet acknowledged by the remote service
pub const V2_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pending_sync_jobs (
        account TEXT NOT NULL,
        key TEXT NOT NULL,
        value_json TEXT NOT NULL,
        updated_at DATETIME NOT NULL,
        PRIMARY KEY (account, key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pending_sync_jobs_account ON pending_sync_jobs(account)",
];

/// Statements that bring a database at `version - 1` up to `version`
pub fn statements_for(version: i32) -> Option<&'static [&'static str]> {
    match version {
        1 => Some(V1_STATEMENTS),
        2 => Some(V2_STATEMENTS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_version_has_statements() {
        for version in 1..=SCHEMA_VERSION {
            assert!(statements_for(version).is_some());
        }
        assert!(statements_for(SCHEMA_VERSION + 1).is_none());
    }
}
