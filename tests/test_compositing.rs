mod common;

use approx::assert_relative_eq;
use satstack::core::collection_filter::{CollectionFilter, MetadataThreshold};
use satstack::core::compositor::{CompositeParams, Reducer, TemporalCompositor};
use satstack::core::quality_mask::{MaskingRule, QaBitMask};
use satstack::core::sampling::estimated_samples;
use satstack::core::zonal::{reduce_region, Statistic, ZonalRequest};
use satstack::types::{BoundingBox, DateRange, Geometry, PipelineError, RasterSeries};

use common::*;

fn s2_params(reducer: Reducer) -> CompositeParams {
    CompositeParams {
        reducer,
        scale_divisor: Some(10_000.0),
        masking: MaskingRule::QaBits(QaBitMask::sentinel2_qa60()),
        ..CompositeParams::default()
    }
}

#[test]
fn test_cloud_threshold_filter_keeps_order() {
    init_logging();
    let series = RasterSeries::new(
        "COPERNICUS/S2_SR_HARMONIZED",
        vec![
            s2_scene("a", "2025-04-10", 5.0, 1000.0, 0.0),
            s2_scene("b", "2025-05-10", 25.0, 1000.0, 0.0),
            s2_scene("c", "2025-06-10", 10.0, 1000.0, 0.0),
        ],
    );
    let filter = CollectionFilter::new()
        .with_date_range(DateRange::parse("2025-04-01", "2025-12-31").unwrap())
        .with_threshold(MetadataThreshold::max_cloud_percentage(20.0));

    let filtered = filter.apply(&series, &islamabad()).unwrap();
    let ids: Vec<&str> = filtered.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
}

#[test]
fn test_masked_slice_excluded_from_mean() {
    init_logging();
    // middle slice is cloudy (bit 10), so each pixel averages 0.10 and 0.20
    let series = RasterSeries::new(
        "s2",
        vec![
            s2_scene("t1", "2025-04-10", 5.0, 1000.0, 0.0),
            s2_scene("t2", "2025-05-10", 5.0, 9000.0, 1024.0),
            s2_scene("t3", "2025-06-10", 5.0, 2000.0, 0.0),
        ],
    );
    let composite = TemporalCompositor::new(s2_params(Reducer::Mean))
        .composite(series, &islamabad(), None)
        .unwrap();

    let b4 = composite.band("B4").unwrap();
    assert_relative_eq!(b4.get(5, 5).unwrap(), 0.15, epsilon = 1e-6);
    assert!(composite.band("QA60").is_err());
    assert_eq!(composite.provenance.layer_ids, vec!["t1", "t2", "t3"]);
}

#[test]
fn test_cirrus_everywhere_leaves_no_data() {
    let series = RasterSeries::new(
        "s2",
        vec![
            s2_scene("t1", "2025-04-10", 5.0, 1000.0, 2048.0),
            s2_scene("t2", "2025-05-10", 5.0, 1000.0, 2048.0 + 1024.0),
        ],
    );
    let composite = TemporalCompositor::new(s2_params(Reducer::Median))
        .composite(series, &islamabad(), None)
        .unwrap();
    let b2 = composite.band("B2").unwrap();
    assert_eq!(b2.valid_count(), 0);
    assert_eq!(b2.get(0, 0), None);
}

#[test]
fn test_median_independent_of_order() {
    let scenes = || {
        vec![
            s2_scene("t1", "2025-04-10", 5.0, 1000.0, 0.0),
            s2_scene("t2", "2025-05-10", 5.0, 3000.0, 0.0),
            s2_scene("t3", "2025-06-10", 5.0, 2000.0, 0.0),
            s2_scene("t4", "2025-07-10", 5.0, 4000.0, 1024.0),
        ]
    };
    let forward = RasterSeries::new("s2", scenes());
    let mut reversed_layers = scenes();
    reversed_layers.reverse();
    let reversed = RasterSeries::new("s2", reversed_layers);

    let compositor = TemporalCompositor::new(s2_params(Reducer::Median));
    let a = compositor.composite(forward, &islamabad(), None).unwrap();
    let b = compositor.composite(reversed, &islamabad(), None).unwrap();
    assert_eq!(a.band("B8").unwrap(), b.band("B8").unwrap());
    assert_relative_eq!(a.band("B8").unwrap().get(2, 3).unwrap(), 0.2, epsilon = 1e-6);
}

#[test]
fn test_composite_clipped_to_region_extent() {
    let region = Geometry::rectangle("west", BoundingBox::new(73.0, 33.6, 73.05, 33.7), WGS84).unwrap();
    let series = RasterSeries::new("s2", vec![s2_scene("t1", "2025-04-10", 5.0, 1000.0, 0.0)]);
    let composite = TemporalCompositor::new(s2_params(Reducer::Mean))
        .composite(series, &region, None)
        .unwrap();
    let extent = composite.layer.extent();
    assert!(extent.max_x <= region.bbox().max_x + 0.01 + 1e-9);
    // five full columns of pixel centres fall inside the western half
    assert_eq!(composite.band("B2").unwrap().valid_count(), 50);
}

#[test]
fn test_zonal_count_bounded_by_area_samples() {
    let composite = TemporalCompositor::new(CompositeParams {
        reducer: Reducer::Mean,
        bands: vec!["avg_rad".to_string()],
        ..CompositeParams::default()
    })
    .composite(viirs_series(), &islamabad(), None)
    .unwrap();

    for scale in [500.0, 1000.0, 2500.0] {
        let request = ZonalRequest::new("avg_rad", &[Statistic::Count, Statistic::Mean], scale);
        let stats = reduce_region(&composite.layer, &islamabad(), &request).unwrap();
        let bound = estimated_samples(&islamabad(), scale);
        println!("scale {} m: count {:?}, bound {}", scale, stats.count(), bound);
        assert!(stats.count().unwrap() <= bound);
        assert!(stats.count().unwrap() > 0);
    }
}

#[test]
fn test_tight_sample_budget_fails() {
    let composite = TemporalCompositor::new(CompositeParams::default())
        .composite(viirs_series(), &islamabad(), None)
        .unwrap();
    let request = ZonalRequest::new("avg_rad", &[Statistic::Mean], 500.0).with_max_samples(100);
    let result = reduce_region(&composite.layer, &islamabad(), &request);
    assert!(matches!(result, Err(PipelineError::BudgetExceeded { budget: 100, .. })));
}

#[test]
fn test_no_matching_layers_is_empty_result() {
    let series = RasterSeries::new("s2", vec![s2_scene("t1", "2024-01-10", 5.0, 1000.0, 0.0)]);
    let filter = CollectionFilter::new().with_date_range(DateRange::parse("2025-01-01", "2025-12-31").unwrap());
    match filter.apply(&series, &islamabad()) {
        Err(PipelineError::EmptyResult(context)) => assert!(context.contains("Islamabad")),
        other => panic!("expected EmptyResult, got {:?}", other),
    }
}
