use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::InfluxConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{MeasurementRecord, ProcessingWindow};
use crate::utils::{normalize_id, parse_numeric};

/// Source of raw station readings.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Readings with timestamps inside `window`; an empty vec when there are none.
    async fn fetch(&self, window: &ProcessingWindow) -> Result<Vec<MeasurementRecord>>;
}

/// InfluxDB v2 HTTP query API. Each station is a `_field` of the configured
/// measurement(s).
pub struct InfluxSource {
    client: Client,
    config: InfluxConfig,
}

impl InfluxSource {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn query_url(&self) -> String {
        format!("{}/api/v2/query", self.config.url.trim_end_matches('/'))
    }

    pub fn flux_query(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> String {
        build_flux_query(&self.config, start, stop)
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn build_flux_query(config: &InfluxConfig, start: DateTime<Utc>, stop: DateTime<Utc>) -> String {
    let predicate = config
        .measurement
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| format!("r[\"_measurement\"] == \"{}\"", m))
        .collect::<Vec<_>>()
        .join(" or ");

    format!(
        "from(bucket: \"{bucket}\")\n  \
         |> range(start: {start}, stop: {stop})\n  \
         |> filter(fn: (r) => {predicate})\n  \
         |> aggregateWindow(every: {every}, fn: mean, createEmpty: false)\n  \
         |> keep(columns: [\"_time\", \"_value\", \"_field\"])",
        bucket = config.bucket,
        start = rfc3339(start),
        stop = rfc3339(stop),
        predicate = predicate,
        every = config.window,
    )
}

/// Parse an InfluxDB CSV response.
///
/// Annotation rows (`#...`) are skipped and every table repeats its header,
/// so column positions are re-read whenever a header row appears.
pub fn parse_query_response(text: &str) -> Result<Vec<MeasurementRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut columns: Option<(usize, usize, usize)> = None;
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row?;
        let position = |name: &str| row.iter().position(|field| field == name);
        if let (Some(time), Some(value), Some(field)) =
            (position("_time"), position("_value"), position("_field"))
        {
            columns = Some((time, value, field));
            continue;
        }

        let (time_idx, value_idx, field_idx) = columns.ok_or_else(|| {
            ProcessingError::InvalidFormat("Query response has data before its header".to_string())
        })?;

        let Some(raw_time) = row.get(time_idx) else {
            continue;
        };
        let timestamp = match DateTime::parse_from_rfc3339(raw_time) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                debug!(value = raw_time, error = %e, "Skipping row with unparseable _time");
                continue;
            }
        };
        let temperature = row.get(value_idx).and_then(parse_numeric);
        let station_id = row.get(field_idx).and_then(normalize_id);

        records.push(MeasurementRecord::new(timestamp, temperature, station_id));
    }

    Ok(records)
}

#[async_trait]
impl MeasurementSource for InfluxSource {
    async fn fetch(&self, window: &ProcessingWindow) -> Result<Vec<MeasurementRecord>> {
        let query = self.flux_query(window.start(), window.end());
        let body = serde_json::json!({
            "query": query,
            "type": "flux",
            "dialect": { "header": true, "annotations": [], "delimiter": "," },
        });

        let response = self
            .client
            .post(self.query_url())
            .query(&[("org", self.config.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.config.token))
            .header(ACCEPT, "application/csv")
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        let records = parse_query_response(&text)?;
        if records.is_empty() {
            info!(window = %window, "Measurement source returned no data");
        } else {
            debug!(window = %window, records = records.len(), "Fetched measurements");
        }
        Ok(records)
    }
}
