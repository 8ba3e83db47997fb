use std::sync::Arc;
use tracing::info;

use crate::cli::args::{station_filter, Cli, Commands};
use crate::config::AppConfig;
use crate::error::Result;
use crate::processors::{DataProcessor, PipelineSettings, RangeSummary};
use crate::readers::{CsvMetadataStore, InfluxSource, MetadataStore, SqlMetadataStore};
use crate::scheduler::{CalculationEngine, SystemClock};
use crate::spatial::{Boundary, ElevationRaster};
use crate::writers::PngRenderer;

/// Static inputs loaded once at startup.
pub struct Assets {
    pub boundary: Arc<Boundary>,
    pub raster: Arc<ElevationRaster>,
}

pub fn load_assets(config: &AppConfig) -> Result<Assets> {
    let boundary = Boundary::load(&config.paths.country_file)?;
    let raster = ElevationRaster::load(&config.paths.dem_tif)?;
    Ok(Assets {
        boundary: Arc::new(boundary),
        raster: Arc::new(raster),
    })
}

pub fn build_processor(config: &AppConfig, assets: &Assets) -> Result<DataProcessor> {
    let source = InfluxSource::new(config.influx.clone())?;
    let store = build_metadata_store(config)?;
    let renderer = PngRenderer::new(&config.paths.images_dir, config.visualization.build_colormap()?)
        .with_boundary(config.visualization.show_boundary)
        .with_scale(config.visualization.half_range, config.visualization.median_offset);

    let settings = PipelineSettings {
        working_crs: config.working_crs()?,
        grid_shape: config.grid_shape(),
        model_params: config.model_params(),
    };

    Ok(DataProcessor::new(
        Box::new(source),
        store,
        assets.boundary.clone(),
        assets.raster.clone(),
        Box::new(renderer),
        settings,
    ))
}

/// The SQL table when a database URL is configured, the stations CSV otherwise.
pub fn build_metadata_store(config: &AppConfig) -> Result<Box<dyn MetadataStore>> {
    let metadata = &config.metadata;
    match &metadata.database_url {
        Some(url) => Ok(Box::new(SqlMetadataStore::connect_lazy(
            url,
            &metadata.table,
            metadata.max_connections,
        )?)),
        None => Ok(Box::new(
            CsvMetadataStore::new(&config.paths.stations_file).with_delimiter(metadata.csv_delimiter_byte()?),
        )),
    }
}

fn print_summary(summary: &RangeSummary) {
    println!(
        "Processed {} hours: {} maps written, {} skipped, {} failed",
        summary.attempted(),
        summary.rendered.len(),
        summary.skipped,
        summary.failed
    );
    if summary.interrupted {
        println!("Stopped early on shutdown request");
    }
    for map in &summary.rendered {
        println!("  {}", map.path.display());
    }
}

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Commands::Run {
            first_run,
            stations,
            progress,
        } => {
            let filter = station_filter(&stations);
            let assets = load_assets(&config)?;
            let processor = build_processor(&config, &assets)?;
            info!(
                first_run,
                stations = filter.as_ref().map(|f| f.len()).unwrap_or(0),
                "Starting continuous processing"
            );

            let mut engine = CalculationEngine::new(processor, SystemClock::new()).with_progress(progress);
            let summary = engine.run(first_run, None, filter.as_ref()).await?;
            print_summary(&summary);
        }

        Commands::Range {
            start,
            end,
            stations,
            quiet,
        } => {
            let filter = station_filter(&stations);
            let assets = load_assets(&config)?;
            let processor = build_processor(&config, &assets)?;

            let mut engine = CalculationEngine::new(processor, SystemClock::new()).with_progress(!quiet);
            let summary = engine.run(false, Some((start, end)), filter.as_ref()).await?;
            print_summary(&summary);
        }

        Commands::CheckConfig => {
            let assets = load_assets(&config)?;
            let bounds = assets.boundary.bounds();
            let (width, height) = assets.raster.dimensions();

            println!("Configuration OK");
            println!(
                "  Boundary: {} polygon(s), {}, bbox ({:.4}, {:.4}) - ({:.4}, {:.4})",
                assets.boundary.polygons().0.len(),
                assets.boundary.crs(),
                bounds.min().x,
                bounds.min().y,
                bounds.max().x,
                bounds.max().y
            );
            println!("  Elevation raster: {}x{} cells, {}", width, height, assets.raster.crs());
            println!(
                "  Grid: {}x{}, regression {}, variogram {}, nlags {}, working CRS {}",
                config.grid.x_points,
                config.grid.y_points,
                config.interpolation.regression_model,
                config.interpolation.variogram_model,
                config.interpolation.nlags,
                config.interpolation.working_crs
            );
            match &config.metadata.database_url {
                Some(_) => println!("  Stations: database table {}", config.metadata.table),
                None => println!("  Stations: {}", config.paths.stations_file.display()),
            }
            println!("  Images: {}", config.paths.images_dir.display());
        }
    }

    Ok(())
}
