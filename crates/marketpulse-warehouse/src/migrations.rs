use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// Conflict keys double as the idempotency contract of the refresh pipeline:
// quotes by (symbol, source), metal rates by (rate_date, location, grade).
// Columns touched by ON CONFLICT DO UPDATE must stay out of secondary indexes.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_market_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS instruments (
    symbol TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    exchange TEXT,
    market_cap DOUBLE,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS quotes (
    id BIGINT PRIMARY KEY,
    symbol TEXT NOT NULL,
    source TEXT NOT NULL,
    price DOUBLE NOT NULL,
    change_amount DOUBLE,
    change_percent DOUBLE,
    volume BIGINT,
    traded_value DOUBLE,
    open DOUBLE,
    high DOUBLE,
    low DOUBLE,
    previous_close DOUBLE,
    as_of TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (symbol, source)
);

CREATE TABLE IF NOT EXISTS metal_rates (
    id BIGINT PRIMARY KEY,
    rate_date DATE NOT NULL,
    location TEXT NOT NULL,
    grade TEXT NOT NULL,
    rate_per_gram DOUBLE NOT NULL,
    rate_per_10g DOUBLE NOT NULL,
    change_amount DOUBLE,
    change_percent DOUBLE,
    previous_rate DOUBLE,
    source TEXT NOT NULL,
    as_of TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (rate_date, location, grade)
);

CREATE TABLE IF NOT EXISTS system_health (
    id BIGINT PRIMARY KEY,
    component TEXT NOT NULL,
    status TEXT NOT NULL,
    response_time_ms BIGINT,
    market_open BOOLEAN,
    error_message TEXT,
    checked_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS refresh_log (
    run_id TEXT NOT NULL,
    source TEXT NOT NULL,
    requested BIGINT NOT NULL,
    inserted BIGINT NOT NULL,
    errored BIGINT NOT NULL,
    success BOOLEAN NOT NULL,
    started_at TIMESTAMP NOT NULL,
    finished_at TIMESTAMP NOT NULL,
    PRIMARY KEY (run_id, source)
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_system_health_component ON system_health(component, checked_at);
CREATE INDEX IF NOT EXISTS idx_refresh_log_source ON refresh_log(source, finished_at);
"#,
    },
];

/// Apply every migration that is not yet recorded in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        if applied > 0 {
            continue;
        }

        tracing::debug!(version = migration.version, "applying warehouse migration");
        connection.execute_batch(migration.sql)?;
        connection.execute(
            "INSERT INTO schema_migrations (version) VALUES (?)",
            params.as_slice(),
        )?;
    }

    Ok(())
}

/// Versions recorded as applied, oldest first.
pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = statement.query_map([], |row| row.get::<_, String>(0))?;
    versions.collect()
}
