//! CLI argument definitions for Marketpulse.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `refresh` | Run one refresh cycle and print its report |
//! | `schedule` | Run refresh cycles on a fixed interval |
//! | `probe` | Check connectivity of every source |
//! | `sql` | Query the local DuckDB warehouse (read-only) |
//! | `instruments` | Manage the instrument universe |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `MARKETPULSE_CONFIG` | TOML pipeline configuration |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! marketpulse refresh --source EX_A --symbol TCS --symbol INFY --stats
//! marketpulse schedule --interval-secs 900
//! marketpulse sql "SELECT * FROM vw_source_freshness"
//! marketpulse instruments load universe.json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Marketpulse - resilient market data refresh pipeline
#[derive(Debug, Parser)]
#[command(
    name = "marketpulse",
    author,
    version,
    about = "Resilient market data refresh pipeline",
    long_about = "Marketpulse fetches equity quotes, metal rates and market status from \
several rate-limited upstreams and reconciles them into a local DuckDB warehouse.\n\
\n\
Every source sits behind its own circuit breaker, retry policy and request quota, \
so one failing upstream never stalls the others.\n\
\n\
Use 'marketpulse <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pipeline configuration file (TOML). Falls back to MARKETPULSE_CONFIG.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one refresh cycle and print the resulting report.
    ///
    /// Exits with code 3 when any source reported errors.
    ///
    /// # Examples
    ///
    ///   marketpulse refresh
    ///   marketpulse refresh --source EX_A --symbol TCS --stats
    Refresh(RefreshArgs),

    /// Run refresh cycles on a fixed interval until Ctrl-C.
    ///
    /// A cycle that overruns the interval skips the missed ticks.
    Schedule(ScheduleArgs),

    /// Check connectivity of every configured source.
    ///
    /// Probes bypass the circuit breakers.
    Probe,

    /// Run a read-only SQL query against the warehouse.
    ///
    /// # Examples
    ///
    ///   marketpulse sql "SELECT symbol, price FROM vw_latest_quotes"
    ///   marketpulse sql "SELECT * FROM refresh_log" --max-rows 20
    Sql(SqlArgs),

    /// Instrument universe management.
    Instruments(InstrumentsArgs),
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Restrict the cycle to these sources (EX_A, EX_B, GOLD). Repeatable.
    #[arg(long = "source", value_name = "SOURCE")]
    pub sources: Vec<String>,

    /// Refresh these symbols instead of the default top-N universe. Repeatable.
    #[arg(long = "symbol", value_name = "SYMBOL")]
    pub symbols: Vec<String>,

    /// Metal targets as LOCATION/GRADE, e.g. Chennai/24K. Repeatable.
    #[arg(long = "metal", value_name = "TARGET")]
    pub metal_targets: Vec<String>,

    /// Include per-source fetch statistics in the output.
    #[arg(long, default_value_t = false)]
    pub stats: bool,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Seconds between cycles for every source; defaults to each source's own interval.
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Stop after this many cycles.
    #[arg(long)]
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// SQL query to execute (SELECT or WITH only).
    pub query: String,

    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 1_000)]
    pub max_rows: usize,

    /// Query timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct InstrumentsArgs {
    #[command(subcommand)]
    pub command: InstrumentsCommand,
}

#[derive(Debug, Subcommand)]
pub enum InstrumentsCommand {
    /// Upsert instruments from a JSON array of {symbol, name, exchange, market_cap}.
    Load(LoadArgs),
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// JSON file holding the instrument rows.
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeatable_refresh_filters() {
        let cli = Cli::try_parse_from([
            "marketpulse",
            "--pretty",
            "refresh",
            "--source",
            "EX_A",
            "--symbol",
            "TCS",
            "--symbol",
            "INFY",
            "--stats",
        ])
        .expect("parse");

        assert!(cli.pretty);
        let Command::Refresh(args) = cli.command else {
            panic!("expected refresh");
        };
        assert_eq!(args.sources, vec!["EX_A"]);
        assert_eq!(args.symbols, vec!["TCS", "INFY"]);
        assert!(args.stats);
    }
}
