mod common;

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use satstack::core::compositor::{CompositeParams, Reducer, TemporalCompositor};
use satstack::core::zonal::{Statistic, ZonalRequest};
use satstack::io::backend::{statistics_with_timeout, BackendStatus, ComputeBackend, LocalBackend};
use satstack::io::export::{Destination, ExportFormat, ExportOrchestrator, ExportRequest, JobState, RasterSpatialParams};
use satstack::types::PipelineError;

use common::*;

fn viirs_mean() -> satstack::core::compositor::Composite {
    TemporalCompositor::new(CompositeParams {
        reducer: Reducer::Mean,
        bands: vec!["avg_rad".to_string()],
        ..CompositeParams::default()
    })
    .composite(viirs_series(), &islamabad(), None)
    .unwrap()
}

#[tokio::test]
async fn test_slow_statistics_time_out() {
    init_logging();
    let backend = ScriptedBackend::new(Script::Never).with_statistics_delay(Duration::from_millis(200));
    let composite = viirs_mean();
    let request = ZonalRequest::new("avg_rad", &[Statistic::Mean], 500.0);

    let result = statistics_with_timeout(&backend, &composite.layer, &islamabad(), &request, Duration::from_millis(10)).await;
    match result {
        Err(PipelineError::Timeout { context, elapsed }) => {
            assert!(context.contains("Islamabad"));
            assert_eq!(elapsed, Duration::from_millis(10));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_budget_error_is_not_a_timeout() {
    let backend = ScriptedBackend::new(Script::Never);
    let composite = viirs_mean();
    let request = ZonalRequest::new("avg_rad", &[Statistic::Mean], 500.0).with_max_samples(10);

    let result = statistics_with_timeout(&backend, &composite.layer, &islamabad(), &request, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(PipelineError::BudgetExceeded { .. })));
}

#[tokio::test]
async fn test_local_statistics_match_reduction() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(dir.path());
    let composite = viirs_mean();
    let request = ZonalRequest::new("avg_rad", &[Statistic::Min, Statistic::Max, Statistic::Count], 1000.0);

    let stats = backend.materialize_statistics(&composite.layer, &islamabad(), &request).await.unwrap();
    // monthly offsets 1..=12 average to 6.5 on top of row + col
    assert_relative_eq!(stats.min().unwrap(), 6.5);
    assert_relative_eq!(stats.max().unwrap(), 24.5);
    assert!(stats.count().unwrap() > 0);
    assert_eq!(stats.scale, 1000.0);
}

#[tokio::test]
async fn test_local_raster_export_writes_geotiff_per_band() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(LocalBackend::new(dir.path()));
    let mut orchestrator = ExportOrchestrator::new(backend.clone());

    let composite = TemporalCompositor::new(CompositeParams {
        reducer: Reducer::Median,
        bands: vec!["B4".to_string(), "B8".to_string()],
        scale_divisor: Some(10_000.0),
        ..CompositeParams::default()
    })
    .composite(
        satstack::types::RasterSeries::new("s2", vec![s2_scene("t1", "2025-04-10", 5.0, 1500.0, 0.0)]),
        &islamabad(),
        None,
    )
    .unwrap();

    let request = ExportRequest::raster(
        "S2_test",
        Arc::new(composite),
        islamabad(),
        Destination { folder: "GEE_Exports".into(), file_name: "S2_test".into(), format: ExportFormat::GeoTiff },
        RasterSpatialParams { scale: 1000.0, crs: Some(WGS84.to_string()), max_pixels: None },
    );
    let id = orchestrator.submit(request).await.unwrap();
    let reports = orchestrator.wait_all(Duration::from_millis(5), Some(Duration::from_secs(10))).await.unwrap();
    assert_eq!(reports[0].state, JobState::Completed);

    let handle = orchestrator.job(id).unwrap().handle().unwrap().clone();
    assert_eq!(backend.poll_status(&handle).await.unwrap(), BackendStatus::Completed);
    let mut artifacts = backend.artifacts(&handle);
    artifacts.sort();
    let folder = dir.path().join("GEE_Exports");
    assert_eq!(artifacts, vec![folder.join("S2_test_B4.tif"), folder.join("S2_test_B8.tif")]);

    let mut decoder = tiff::decoder::Decoder::new(File::open(&artifacts[0]).unwrap()).unwrap();
    let (width, height) = decoder.dimensions().unwrap();
    println!("Exported B4 grid: {} x {}", width, height);
    assert!(width > 0 && height > 0);
    match decoder.read_image().unwrap() {
        tiff::decoder::DecodingResult::F32(pixels) => {
            assert_relative_eq!(pixels[0], 0.15, epsilon = 1e-6);
        }
        _ => panic!("expected float32 pixels"),
    }
}
