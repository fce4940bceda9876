//! Forward-only schema migrations, tracked in `PRAGMA user_version`.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use crate::db::schema;

struct Migration {
    version: u32,
    description: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "ledger tables",
    apply: schema::create_schema,
}];

fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    let current = user_version(conn)?;
    let latest = latest_version();
    if current > latest {
        bail!("database schema version {current} is newer than supported version {latest}");
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn
            .unchecked_transaction()
            .context("begin schema migration")?;
        (migration.apply)(&tx).with_context(|| {
            format!("apply schema migration v{} ({})", migration.version, migration.description)
        })?;
        tx.pragma_update(None, "user_version", migration.version)
            .with_context(|| format!("record schema version {}", migration.version))?;
        tx.commit()
            .with_context(|| format!("commit schema migration v{}", migration.version))?;
        tracing::debug!(version = migration.version, "applied schema migration");
    }

    Ok(())
}

fn user_version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("read schema version")
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rusqlite::Connection;

    use super::{latest_version, migrate, user_version};

    #[test]
    fn fresh_database_reaches_latest_version() -> Result<()> {
        let conn = Connection::open_in_memory()?;

        migrate(&conn)?;
        assert_eq!(user_version(&conn)?, latest_version());

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'credentials', 'categories', 'merchant_rules', 'transactions')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 5);
        Ok(())
    }

    #[test]
    fn rerunning_is_a_no_op() -> Result<()> {
        let conn = Connection::open_in_memory()?;

        migrate(&conn)?;
        conn.execute("INSERT INTO users (id, email) VALUES ('u1', 'ana@example.com')", [])?;
        migrate(&conn)?;

        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        assert_eq!(users, 1);
        assert_eq!(user_version(&conn)?, latest_version());
        Ok(())
    }

    #[test]
    fn newer_schema_is_rejected() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        conn.pragma_update(None, "user_version", 99)?;

        let error = migrate(&conn).expect_err("newer schema must be rejected");
        assert!(error.to_string().contains("newer than supported"));
        Ok(())
    }
}
