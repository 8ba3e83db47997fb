use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use tempmap::error::{ProcessingError, Result};
use tempmap::interpolation::{GridShape, ModelParams};
use tempmap::models::{InterpolationGrid, MeasurementRecord, ProcessingWindow, RenderedMap, StationMetadataRow};
use tempmap::processors::{DataProcessor, HourOutcome, HourProcessor, PipelineSettings, SkipReason};
use tempmap::readers::{MeasurementSource, MetadataStore};
use tempmap::scheduler::{CalculationEngine, Clock, WaitOutcome};
use tempmap::spatial::{Boundary, Crs, ElevationRaster, GeoTransform};
use tempmap::utils::ProgressReporter;
use tempmap::writers::{Colormap, MapRenderer, PngRenderer};

const COUNTRY: &str = r#"{
  "type": "FeatureCollection",
  "features": [{
    "type": "Feature",
    "properties": {"name": "test country"},
    "geometry": {
      "type": "Polygon",
      "coordinates": [[[12.0, 48.5], [18.9, 48.5], [18.9, 51.1], [12.0, 51.1], [12.0, 48.5]]]
    }
  }]
}"#;

const STATIONS: [(&str, f64, f64); 6] = [
    ("A", 12.5, 49.0),
    ("B", 14.4, 50.1),
    ("C", 16.6, 49.2),
    ("D", 18.2, 49.8),
    ("E", 15.0, 50.7),
    ("F", 13.3, 49.7),
];

fn hour(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
}

/// Source keyed by the start of the requested (source) window.
#[derive(Clone, Default)]
struct ScriptedSource {
    data: HashMap<DateTime<Utc>, Vec<MeasurementRecord>>,
    unreachable: HashSet<DateTime<Utc>>,
    requests: Arc<Mutex<Vec<ProcessingWindow>>>,
}

impl ScriptedSource {
    /// Readings for the map labelled `label_hour`, i.e. inside `[label_hour - 1h, label_hour)`.
    fn with_readings(mut self, label_hour: DateTime<Utc>, readings: &[(&str, Option<f64>)]) -> Self {
        let from = label_hour - Duration::hours(1);
        let records = readings
            .iter()
            .enumerate()
            .map(|(i, (id, temp))| {
                MeasurementRecord::new(from + Duration::minutes(10 + i as i64), *temp, Some(id.to_string()))
            })
            .collect();
        self.data.insert(from, records);
        self
    }

    /// The fetch for the map labelled `label_hour` fails.
    fn unreachable_for(mut self, label_hour: DateTime<Utc>) -> Self {
        self.unreachable.insert(label_hour - Duration::hours(1));
        self
    }
}

#[async_trait]
impl MeasurementSource for ScriptedSource {
    async fn fetch(&self, window: &ProcessingWindow) -> Result<Vec<MeasurementRecord>> {
        self.requests.lock().unwrap().push(*window);
        if self.unreachable.contains(&window.start()) {
            return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "source down").into());
        }
        Ok(self.data.get(&window.start()).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn bulk_fetch(&self, ids: &[String]) -> Result<Vec<StationMetadataRow>> {
        self.calls.lock().unwrap().push(ids.to_vec());
        Ok(STATIONS
            .iter()
            .filter(|(id, _, _)| ids.iter().any(|wanted| wanted == id))
            .map(|(id, lon, lat)| StationMetadataRow {
                station_id: id.to_string(),
                lon: Some(lon.to_string()),
                lat: Some(lat.to_string()),
                elevation: None,
            })
            .collect())
    }
}

/// Writes the PNG and keeps the grid statistics for inspection.
struct InspectingRenderer {
    inner: PngRenderer,
    grids: Arc<Mutex<Vec<(usize, usize, Option<(f64, f64)>)>>>,
}

impl MapRenderer for InspectingRenderer {
    fn render(&self, grid: &InterpolationGrid, boundary: &Boundary, hour_label: &str) -> Result<RenderedMap> {
        let outside_nan = grid
            .predicted
            .iter()
            .zip(&grid.mask)
            .filter(|(v, inside)| !**inside && v.is_nan())
            .count();
        let inside_finite = grid.masked_values().filter(|v| v.is_finite()).count();
        assert_eq!(outside_nan + inside_finite, grid.len());
        self.grids
            .lock()
            .unwrap()
            .push((grid.masked_cell_count(), inside_finite, grid.value_bounds()));
        self.inner.render(grid, boundary, hour_label)
    }
}

fn dem() -> ElevationRaster {
    let (w, h) = (80, 40);
    let data = (0..h)
        .flat_map(|_| (0..w).map(move |c| 200.0 + 1000.0 * c as f64 / (w - 1) as f64))
        .collect();
    ElevationRaster::new(w, h, data, GeoTransform::north_up(11.0, 52.0, 0.1, 0.1), Crs::Wgs84).unwrap()
}

struct Harness {
    processor: DataProcessor,
    store_calls: Arc<Mutex<Vec<Vec<String>>>>,
    source_requests: Arc<Mutex<Vec<ProcessingWindow>>>,
    grids: Arc<Mutex<Vec<(usize, usize, Option<(f64, f64)>)>>>,
    _images: TempDir,
    images_dir: std::path::PathBuf,
}

fn harness(source: ScriptedSource, params: ModelParams) -> Harness {
    let images = TempDir::new().unwrap();
    let images_dir = images.path().join("output_web");
    let store = MemoryStore::default();
    let grids = Arc::new(Mutex::new(Vec::new()));
    let renderer = InspectingRenderer {
        inner: PngRenderer::new(&images_dir, Colormap::default_with_levels(15).unwrap()),
        grids: grids.clone(),
    };

    let store_calls = store.calls.clone();
    let source_requests = source.requests.clone();
    let processor = DataProcessor::new(
        Box::new(source),
        Box::new(store),
        Arc::new(Boundary::from_geojson_str(COUNTRY).unwrap()),
        Arc::new(dem()),
        Box::new(renderer),
        PipelineSettings {
            working_crs: Crs::WebMercator,
            grid_shape: GridShape { x_points: 30, y_points: 20 },
            model_params: params,
        },
    );

    Harness {
        processor,
        store_calls,
        source_requests,
        grids,
        _images: images,
        images_dir,
    }
}

#[tokio::test]
async fn test_five_readings_render_a_labelled_map() {
    let source = ScriptedSource::default().with_readings(
        hour(12),
        &[("A", Some(10.0)), ("B", Some(15.0)), ("C", Some(20.0)), ("D", Some(25.0)), ("E", Some(30.0))],
    );
    let mut h = harness(source, ModelParams::default());

    let outcome = h
        .processor
        .process_hour(ProcessingWindow::starting_at(hour(12)), None)
        .await
        .unwrap();

    let map = match outcome {
        HourOutcome::Rendered(map) => map,
        other => panic!("expected a map, got {:?}", other),
    };
    let name = map.path.file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("2024-05-01_1200_"), "unexpected name {}", name);
    assert!(name.ends_with(".png"));
    assert_eq!(map.path.parent().unwrap(), h.images_dir.as_path());
    assert!(map.path.exists());
    assert_eq!(map.value_range.1 - map.value_range.0, 14);

    // The map for 12:00 is built from the 11:00 - 12:00 source window.
    assert_eq!(h.source_requests.lock().unwrap()[0].start(), hour(11));

    let grids = h.grids.lock().unwrap();
    let (masked, finite, bounds) = grids[0];
    assert!(masked > 0);
    assert_eq!(masked, finite);
    let (lo, hi) = bounds.unwrap();
    assert!(lo > -20.0 && hi < 60.0, "implausible surface {}..{}", lo, hi);
}

#[tokio::test]
async fn test_empty_hour_is_skipped_and_the_range_continues() {
    let readings = [("A", Some(10.0)), ("B", Some(12.0)), ("C", Some(14.0)), ("D", Some(13.0))];
    let source = ScriptedSource::default()
        .with_readings(hour(1), &readings)
        .with_readings(hour(3), &readings);
    let mut h = harness(source, ModelParams::default());

    let summary = h
        .processor
        .process_time_range(hour(1), hour(4), None, &ProgressReporter::silent())
        .await;

    assert_eq!(summary.rendered.len(), 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.source_requests.lock().unwrap().len(), 3);

    let outcome = h
        .processor
        .process_hour(ProcessingWindow::starting_at(hour(2)), None)
        .await
        .unwrap();
    assert_eq!(outcome, HourOutcome::Skipped(SkipReason::NoData));
}

#[tokio::test]
async fn test_failed_fetch_is_an_empty_hour() {
    let readings = [("A", Some(10.0)), ("B", Some(12.0)), ("C", Some(14.0)), ("D", Some(13.0))];
    let source = ScriptedSource::default()
        .with_readings(hour(4), &readings)
        .unreachable_for(hour(3));
    let mut h = harness(source, ModelParams::default());

    let outcome = h
        .processor
        .process_hour(ProcessingWindow::starting_at(hour(3)), None)
        .await
        .unwrap();
    assert_eq!(outcome, HourOutcome::Skipped(SkipReason::NoData));
    assert!(!h.images_dir.exists());

    let summary = h
        .processor
        .process_time_range(hour(3), hour(5), None, &ProgressReporter::silent())
        .await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.rendered.len(), 1);

    let names: Vec<String> = std::fs::read_dir(&h.images_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("2024-05-01_0400_"), "unexpected map {}", names[0]);
    assert_eq!(h.source_requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_regression_model_fails_each_hour_without_stopping() {
    let readings = [("A", Some(10.0)), ("B", Some(12.0)), ("C", Some(14.0))];
    let source = ScriptedSource::default()
        .with_readings(hour(5), &readings)
        .with_readings(hour(6), &readings);
    let params = ModelParams {
        regression_model: "xgboost".to_string(),
        ..ModelParams::default()
    };
    let mut h = harness(source, params);

    let summary = h
        .processor
        .process_time_range(hour(5), hour(7), None, &ProgressReporter::silent())
        .await;

    assert_eq!(summary.failed, 2);
    assert!(summary.rendered.is_empty());
    assert_eq!(h.source_requests.lock().unwrap().len(), 2);

    let err = h
        .processor
        .process_hour(ProcessingWindow::starting_at(hour(5)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessingError::UnknownRegressionModel(ref id) if id == "xgboost"));
}

#[tokio::test]
async fn test_fewer_than_three_usable_records_is_insufficient_data() {
    let source = ScriptedSource::default().with_readings(
        hour(8),
        &[("A", Some(10.0)), ("B", None), ("ghost", Some(11.0)), ("C", Some(12.0))],
    );
    let mut h = harness(source, ModelParams::default());

    let err = h
        .processor
        .process_hour(ProcessingWindow::starting_at(hour(8)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessingError::InsufficientData { found: 2, required: 3 }));
    assert!(err.is_data_insufficiency());
}

#[tokio::test]
async fn test_station_filter_can_empty_an_hour() {
    let source = ScriptedSource::default().with_readings(hour(9), &[("A", Some(10.0)), ("B", Some(12.0)), ("C", Some(14.0))]);
    let mut h = harness(source, ModelParams::default());
    let filter: HashSet<String> = ["Z".to_string()].into_iter().collect();

    let outcome = h
        .processor
        .process_hour(ProcessingWindow::starting_at(hour(9)), Some(&filter))
        .await
        .unwrap();
    assert_eq!(outcome, HourOutcome::Skipped(SkipReason::FilteredOut));
}

#[tokio::test]
async fn test_metadata_is_fetched_once_per_new_station() {
    let source = ScriptedSource::default()
        .with_readings(hour(1), &[("A", Some(10.0)), ("B", Some(12.0)), ("F", Some(11.0))])
        .with_readings(hour(2), &[("A", Some(10.5)), ("C", Some(13.0)), ("F", Some(11.5))]);
    let mut h = harness(source, ModelParams::default());

    h.processor
        .process_time_range(hour(1), hour(3), None, &ProgressReporter::silent())
        .await;

    let calls = h.store_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], vec!["C".to_string()]);
    assert_eq!(h.processor.metadata_cache().len(), 4);
}

struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    wakeups_left: Mutex<usize>,
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) -> WaitOutcome {
        let mut left = self.wakeups_left.lock().unwrap();
        if *left == 0 {
            return WaitOutcome::Shutdown;
        }
        *left -= 1;
        // The process was suspended: it wakes up four hours late.
        let mut now = self.now.lock().unwrap();
        *now = deadline + Duration::hours(4);
        WaitOutcome::Elapsed
    }
}

#[tokio::test]
async fn test_scheduler_catches_up_every_hour_once_in_order() {
    let source = ScriptedSource::default();
    let requests = source.requests.clone();
    let h = harness(source, ModelParams::default());
    let clock = FakeClock {
        now: Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 6, 50, 0).unwrap()),
        wakeups_left: Mutex::new(2),
    };

    let mut engine = CalculationEngine::new(h.processor, clock);
    let summary = engine.run(false, None, None).await.unwrap();

    // Label hours 06:00 .. 16:00; every hour was empty and skipped.
    let labels: Vec<DateTime<Utc>> = requests
        .lock()
        .unwrap()
        .iter()
        .map(|w| w.start() + Duration::hours(1))
        .collect();
    let expected: Vec<DateTime<Utc>> = (6..=16).map(hour).collect();
    assert_eq!(labels, expected);
    assert_eq!(summary.skipped, expected.len());
}
