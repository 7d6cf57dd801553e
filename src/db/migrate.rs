//! Versioned SQL migrations for the reference entity store.

use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;
use crate::error::{Result, RelnetError};

/// Migrations compiled into the binary, in version order.
const EMBEDDED: &[(&str, &str)] = &[
    ("001_entities", include_str!("../../migrations/001_entities.sql")),
    ("002_links", include_str!("../../migrations/002_links.sql")),
    ("003_link_codes", include_str!("../../migrations/003_link_codes.sql")),
];

struct Migration {
    version: u32,
    name: String,
    sql: String,
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Names of applied migrations, in version order
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

/// Parse the version prefix of a migration name ("002_links" -> 2).
fn parse_version(name: &str) -> Result<u32> {
    let prefix = name
        .split('_')
        .next()
        .ok_or_else(|| RelnetError::Config(format!("Invalid migration name: {}", name)))?;
    prefix
        .parse()
        .map_err(|_| RelnetError::Config(format!("Invalid migration version: {}", prefix)))
}

fn load_from_dir(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut files: Vec<_> = fs::read_dir(migrations_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    files.sort_by_key(|e| e.file_name());

    let mut migrations = Vec::with_capacity(files.len());
    for entry in files {
        let path = entry.path();
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RelnetError::Config("Invalid migration filename".to_string()))?
            .to_string();
        migrations.push(Migration {
            version: parse_version(&name)?,
            sql: fs::read_to_string(&path)?,
            name,
        });
    }
    migrations.sort_by_key(|m| m.version);
    Ok(migrations)
}

fn embedded() -> Result<Vec<Migration>> {
    EMBEDDED
        .iter()
        .map(|(name, sql)| {
            Ok(Migration {
                version: parse_version(name)?,
                name: name.to_string(),
                sql: sql.to_string(),
            })
        })
        .collect()
}

fn apply(conn: &mut Connection, migrations: Vec<Migration>) -> Result<usize> {
    ensure_migrations_table(conn)?;
    let applied = get_applied_migrations(conn)?;
    let mut count = 0;

    for migration in migrations {
        if applied.contains(&migration.name) {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }

        log::info!("Applying migration: {} (version {})", migration.name, migration.version);
        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            RelnetError::Config(format!("Failed to execute migration {}: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        count += 1;
    }

    log::info!("Migrations complete ({} newly applied)", count);
    Ok(count)
}

/// Run pending migrations found as `NNN_name.sql` files in `migrations_dir`
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<usize> {
    let migrations = load_from_dir(migrations_dir)?;
    apply(conn, migrations)
}

/// Run pending migrations bundled with the crate
pub fn run_embedded_migrations(conn: &mut Connection) -> Result<usize> {
    apply(conn, embedded()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_migrations_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_embedded_migrations(&mut conn).unwrap(), 3);
        assert_eq!(run_embedded_migrations(&mut conn).unwrap(), 0);
        let applied = get_applied_migrations(&conn).unwrap();
        assert_eq!(applied, vec!["001_entities", "002_links", "003_link_codes"]);
    }

    #[test]
    fn test_directory_migrations_match_embedded() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&mut conn, &dir).unwrap(), 3);
        // Same names, so the embedded set has nothing left to do.
        assert_eq!(run_embedded_migrations(&mut conn).unwrap(), 0);
    }

    #[test]
    fn test_bad_migration_name_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("abc_broken.sql"), "SELECT 1;").unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        let err = run_migrations(&mut conn, temp.path()).unwrap_err();
        assert!(matches!(err, RelnetError::Config(_)));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = run_migrations(&mut conn, Path::new("/nonexistent/migrations")).unwrap_err();
        assert!(matches!(err, RelnetError::Io(_)));
    }
}
