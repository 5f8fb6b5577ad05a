//! Read-side views over the refresh tables.

use ::duckdb::Connection;

/// Create or replace the analytical views.
///
/// - `vw_latest_quotes`: every stored quote joined to its instrument row
/// - `vw_source_freshness`: latest successful refresh per source and its age
/// - `vw_component_health`: most recent status per health component
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_latest_quotes AS
SELECT
    q.symbol,
    q.source,
    q.price,
    q.change_amount,
    q.change_percent,
    q.volume,
    q.as_of,
    i.name,
    i.market_cap
FROM quotes q
LEFT JOIN instruments i ON i.symbol = q.symbol;

CREATE OR REPLACE VIEW vw_source_freshness AS
SELECT
    source,
    MAX(finished_at) AS last_success_at,
    date_diff('second', MAX(finished_at), CAST(now() AS TIMESTAMP)) AS age_secs
FROM refresh_log
WHERE success
GROUP BY source;

CREATE OR REPLACE VIEW vw_component_health AS
SELECT
    component,
    arg_max(status, checked_at) AS status,
    MAX(checked_at) AS checked_at,
    AVG(response_time_ms) AS avg_response_ms,
    COUNT(*) AS samples
FROM system_health
GROUP BY component;
",
    )?;

    Ok(())
}
