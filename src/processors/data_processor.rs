use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::error::Result;
use crate::interpolation::{GridShape, InterpolationEngine, ModelParams};
use crate::models::{ProcessingWindow, RenderedMap};
use crate::processors::{MetadataCache, RecordEnricher};
use crate::readers::{MeasurementSource, MetadataStore};
use crate::spatial::{Boundary, CoordinateProjector, Crs, ElevationRaster};
use crate::utils::time::{ceil_hour, hours_in};
use crate::utils::{hour_label, ProgressReporter};
use crate::writers::MapRenderer;

/// Why an hour produced no map without anything having gone wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source returned nothing for the window.
    NoData,
    /// Every reading lacked a temperature, a station id or station metadata.
    NoUsableRecords,
    /// The station filter removed every record.
    FilteredOut,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::NoData => "no data",
            SkipReason::NoUsableRecords => "no usable records",
            SkipReason::FilteredOut => "no records after station filter",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HourOutcome {
    Rendered(RenderedMap),
    Skipped(SkipReason),
}

/// Totals of a `process_time_range` run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSummary {
    pub rendered: Vec<RenderedMap>,
    pub skipped: usize,
    pub failed: usize,
    /// A shutdown request ended the run before every hour was attempted.
    pub interrupted: bool,
}

impl RangeSummary {
    pub fn attempted(&self) -> usize {
        self.rendered.len() + self.skipped + self.failed
    }

    pub fn merge(&mut self, other: RangeSummary) {
        self.rendered.extend(other.rendered);
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.interrupted |= other.interrupted;
    }

    pub(crate) fn record(&mut self, window: &ProcessingWindow, result: Result<HourOutcome>) {
        match result {
            Ok(HourOutcome::Rendered(map)) => self.rendered.push(map),
            Ok(HourOutcome::Skipped(reason)) => {
                warn!(hour = %window.label(), %reason, "Hour skipped");
                self.skipped += 1;
            }
            Err(e) => {
                error!(hour = %window.label(), error = %e, "Hour failed");
                self.failed += 1;
            }
        }
    }
}

/// Runs the pipeline for single hours.
#[async_trait]
pub trait HourProcessor: Send {
    async fn process_hour(
        &mut self,
        window: ProcessingWindow,
        station_filter: Option<&HashSet<String>>,
    ) -> Result<HourOutcome>;

    /// Process every hour of `[start, end)` in order. A failing hour is logged
    /// and the loop moves on.
    async fn process_time_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        station_filter: Option<&HashSet<String>>,
        progress: &ProgressReporter,
    ) -> RangeSummary {
        self.process_time_range_until(start, end, station_filter, progress, &|| false)
            .await
    }

    /// Like `process_time_range`, but `stop` is asked before every hour and a
    /// `true` ends the range with the hours processed so far.
    async fn process_time_range_until(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        station_filter: Option<&HashSet<String>>,
        progress: &ProgressReporter,
        stop: &(dyn Fn() -> bool + Sync),
    ) -> RangeSummary {
        let mut summary = RangeSummary::default();
        for hour in hours_in(start, end) {
            let window = ProcessingWindow::starting_at(hour);
            if stop() {
                warn!(next = %window.label(), "Shutdown requested, stopping range");
                summary.interrupted = true;
                break;
            }
            progress.set_message(&format!("Processing {}", window.label()));
            let result = self.process_hour(window, station_filter).await;
            summary.record(&window, result);
            progress.increment(1);
        }
        progress.finish_with_message(&format!(
            "Processed {} hours: {} maps, {} skipped, {} failed",
            summary.attempted(),
            summary.rendered.len(),
            summary.skipped,
            summary.failed
        ));
        summary
    }
}

/// Static inputs of the interpolation stage.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub working_crs: Crs,
    pub grid_shape: GridShape,
    pub model_params: ModelParams,
}

/// The production per-hour pipeline:
/// fetch, enrich, filter, project, summarize, interpolate and render.
pub struct DataProcessor {
    source: Box<dyn MeasurementSource>,
    enricher: RecordEnricher,
    projector: CoordinateProjector,
    engine: InterpolationEngine,
    boundary: Arc<Boundary>,
    raster: Arc<ElevationRaster>,
    renderer: Box<dyn MapRenderer>,
    settings: PipelineSettings,
}

impl DataProcessor {
    pub fn new(
        source: Box<dyn MeasurementSource>,
        metadata_store: Box<dyn MetadataStore>,
        boundary: Arc<Boundary>,
        raster: Arc<ElevationRaster>,
        renderer: Box<dyn MapRenderer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            enricher: RecordEnricher::new(MetadataCache::new(metadata_store)),
            projector: CoordinateProjector::new(Crs::Wgs84, settings.working_crs),
            engine: InterpolationEngine::new(settings.working_crs),
            boundary,
            raster,
            renderer,
            settings,
        }
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        self.enricher.cache()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    async fn run_pipeline(
        &mut self,
        window: ProcessingWindow,
        station_filter: Option<&HashSet<String>>,
    ) -> Result<HourOutcome> {
        let source_window = window.source_window();
        let raw = match self.source.fetch(&source_window).await {
            Ok(records) => records,
            Err(e) => {
                warn!(window = %source_window, error = %e, "Measurement fetch failed, treating as empty");
                Vec::new()
            }
        };
        if raw.is_empty() {
            return Ok(HourOutcome::Skipped(SkipReason::NoData));
        }

        let (mut records, stats) = self.enricher.enrich(raw).await;
        if records.is_empty() {
            return Ok(HourOutcome::Skipped(SkipReason::NoUsableRecords));
        }
        if stats.dropped() > 0 {
            info!(kept = stats.enriched, dropped = stats.dropped(), "Dropped incomplete records");
        }

        if let Some(filter) = station_filter {
            records.retain(|r| filter.contains(&r.station_id));
            if records.is_empty() {
                return Ok(HourOutcome::Skipped(SkipReason::FilteredOut));
            }
        }

        self.projector.project_records(&mut records);

        let label = records
            .iter()
            .map(|r| r.timestamp)
            .min()
            .map(|earliest| hour_label(ceil_hour(earliest)))
            .unwrap_or_else(|| window.label());
        info!(records = records.len(), label = %label, "Interpolating");

        // Kriging over the whole grid is CPU bound; keep it off the async workers.
        let engine = self.engine.clone();
        let boundary = Arc::clone(&self.boundary);
        let raster = Arc::clone(&self.raster);
        let shape = self.settings.grid_shape;
        let params = self.settings.model_params.clone();
        let span = Span::current();
        let grid = tokio::task::spawn_blocking(move || {
            span.in_scope(|| engine.interpolate(&records, &boundary, &raster, shape, &params))
        })
        .await??;

        let map = self.renderer.render(&grid, &self.boundary, &label)?;
        Ok(HourOutcome::Rendered(map))
    }
}

#[async_trait]
impl HourProcessor for DataProcessor {
    async fn process_hour(
        &mut self,
        window: ProcessingWindow,
        station_filter: Option<&HashSet<String>>,
    ) -> Result<HourOutcome> {
        let span = info_span!("hour", label = %window.label());
        let outcome = self.run_pipeline(window, station_filter).instrument(span.clone()).await;
        if let Ok(HourOutcome::Rendered(map)) = &outcome {
            span.in_scope(|| info!(path = %map.path.display(), "Hour rendered"));
        }
        outcome
    }
}
