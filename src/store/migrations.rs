//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS profiles (
            user_id TEXT PRIMARY KEY,
            default_mood TEXT NOT NULL DEFAULT 'default',
            redlines TEXT NOT NULL DEFAULT '[]',
            style TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contacts (
            channel TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            display_name TEXT,
            consent TEXT NOT NULL DEFAULT 'unknown',
            PRIMARY KEY (channel, contact_id)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            in_flight TEXT,
            mood_override TEXT,
            safety_override TEXT,
            UNIQUE (channel, contact_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_last_activity
            ON conversations(last_activity);

        CREATE TABLE IF NOT EXISTS message_events (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            external_id TEXT NOT NULL,
            content TEXT NOT NULL,
            received_at TEXT NOT NULL,
            UNIQUE (channel, external_id)
        );
        CREATE INDEX IF NOT EXISTS idx_events_conversation
            ON message_events(conversation_id);

        CREATE TABLE IF NOT EXISTS decisions (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            event_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'received',
            mood TEXT NOT NULL DEFAULT 'default',
            candidate TEXT,
            verdict TEXT,
            reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_decisions_conversation
            ON decisions(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_decisions_state ON decisions(state);

        CREATE TABLE IF NOT EXISTS approval_requests (
            id TEXT PRIMARY KEY,
            decision_id TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            candidate TEXT,
            reason TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            deadline TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_approvals_status ON approval_requests(status);
        CREATE INDEX IF NOT EXISTS idx_approvals_decision
            ON approval_requests(decision_id);

        CREATE TABLE IF NOT EXISTS audit_records (
            id TEXT PRIMARY KEY,
            decision_id TEXT,
            conversation_id TEXT,
            seq INTEGER NOT NULL DEFAULT 0,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            reason TEXT,
            at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_decision ON audit_records(decision_id);
        CREATE INDEX IF NOT EXISTS idx_audit_conversation
            ON audit_records(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_audit_at ON audit_records(at);
    "#,
}];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                (),
            )
            .await
            .unwrap();
        let mut tables = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            tables.push(row.get::<String>(0).unwrap());
        }
        for expected in [
            "approval_requests",
            "audit_records",
            "contacts",
            "conversations",
            "decisions",
            "message_events",
            "profiles",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();
        assert_eq!(get_current_version(&conn).await.unwrap(), 1);
    }
}
