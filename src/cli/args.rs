use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tempmap")]
#[command(about = "Hourly regression-kriging temperature maps from weather-station telemetry")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        help = "Configuration file [default: configs/tempmap.toml if present]"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow the clock and render a map for every completed hour
    Run {
        #[arg(long, help = "Backfill the last week before following the clock")]
        first_run: bool,

        #[arg(long, value_delimiter = ',', help = "Only use these station ids (comma separated)")]
        stations: Vec<String>,

        #[arg(long, help = "Show a progress bar for the backfill")]
        progress: bool,
    },

    /// Render maps for the hours of [start, end) and exit
    Range {
        #[arg(long, value_parser = parse_hour_arg, help = "First hour, on the hour, e.g. 2024-05-01T00:00 (UTC)")]
        start: DateTime<Utc>,

        #[arg(long, value_parser = parse_hour_arg, help = "End hour, exclusive and on the hour (UTC)")]
        end: DateTime<Utc>,

        #[arg(long, value_delimiter = ',', help = "Only use these station ids (comma separated)")]
        stations: Vec<String>,

        #[arg(long, help = "Hide the progress bar")]
        quiet: bool,
    },

    /// Load and validate the configuration, boundary and elevation raster
    CheckConfig,
}

/// Station filter from a `--stations` list; `None` when the list is empty.
pub fn station_filter(stations: &[String]) -> Option<HashSet<String>> {
    let set: HashSet<String> = stations
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!set.is_empty()).then_some(set)
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM`, `YYYY-MM-DD HH:MM` or a bare date (midnight), all UTC.
/// The instant must fall on a full hour.
pub fn parse_hour_arg(value: &str) -> Result<DateTime<Utc>, String> {
    let t = parse_instant(value.trim())
        .ok_or_else(|| format!("invalid time '{}', expected e.g. 2024-05-01T13:00", value.trim()))?;
    if t.minute() != 0 || t.second() != 0 || t.nanosecond() != 0 {
        return Err(format!("'{}' is not on a full hour, e.g. use {}", value.trim(), t.format("%Y-%m-%dT%H:00")));
    }
    Ok(t)
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}
