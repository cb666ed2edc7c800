use chrono::Datelike;
use std::collections::BTreeMap;

use crate::core::collection_filter::{CollectionFilter, MetadataThreshold};
use crate::core::compositor::{CompositeParams, Reducer};
use crate::core::quality_mask::{MaskingRule, QaBitMask};
use crate::core::zonal::{Statistic, ZonalRequest};
use crate::io::export::{ExportFormat, RasterSpatialParams};
use crate::pipeline::config::{DatasetConfig, DisplayHint, ExportConfig, PipelineConfig};
use crate::types::DateRange;

pub const EXPORT_FOLDER: &str = "GEE_Exports";
pub const WGS84: &str = "EPSG:4326";

pub const SENTINEL2_SR: &str = "COPERNICUS/S2_SR_HARMONIZED";
pub const VIIRS_MONTHLY: &str = "NOAA/VIIRS/DNB/MONTHLY_V1/VCMCFG";
pub const ALOS_DSM: &str = "JAXA/ALOS/AW3D30_V1_1";
pub const RURAL_ACCESS_INDEX: &str = "projects/sat-io/open-datasets/RAI/raimultiplier";
pub const CISI: &str = "projects/sat-io/open-datasets/CISI/global_CISI";
pub const CISI_INFRASTRUCTURE: &str = "projects/sat-io/open-datasets/CISI/amount_infrastructure";
pub const RELATIVE_WEALTH_INDEX: &str = "projects/sat-io/open-datasets/facebook/relative_wealth_index";
pub const WORLDPOP: &str = "WorldPop/GP/100m/pop";

fn raster_export(description: String, file_name: Option<String>, scale: f64, max_pixels: Option<u64>) -> ExportConfig {
    ExportConfig {
        description,
        folder: EXPORT_FOLDER.to_string(),
        file_name,
        format: ExportFormat::GeoTiff,
        spatial: Some(RasterSpatialParams { scale, crs: Some(WGS84.to_string()), max_pixels }),
    }
}

fn palette(colors: &[&str]) -> Vec<String> {
    colors.iter().map(|c| c.to_string()).collect()
}

fn bands(names: &[&str]) -> Vec<String> {
    names.iter().map(|b| b.to_string()).collect()
}

/// Sentinel-2 surface reflectance median composite, cloud and cirrus masked
pub fn sentinel2_true_color(label: &str, range: DateRange) -> DatasetConfig {
    let mut dataset = DatasetConfig::raster("sentinel2", SENTINEL2_SR);
    dataset.filter = CollectionFilter::new()
        .with_date_range(range)
        .with_threshold(MetadataThreshold::max_cloud_percentage(20.0));
    dataset.composite = CompositeParams {
        reducer: Reducer::Median,
        bands: bands(&["B2", "B3", "B4", "B8"]),
        scale_divisor: Some(10_000.0),
        masking: MaskingRule::QaBits(QaBitMask::sentinel2_qa60()),
        ..CompositeParams::default()
    };
    dataset.export = Some(raster_export(
        format!("Sentinel-2A_{}_{}", label, range.start.year()),
        Some(format!("S2_{}", range.start.year())),
        10.0,
        Some(10_000_000_000_000),
    ));
    dataset.display = Some(DisplayHint {
        bands: bands(&["B4", "B3", "B2"]),
        min: 0.0,
        max: 0.25,
        palette: Vec::new(),
        gamma: Some(1.2),
    });
    dataset
}

/// Export file prefix of an annual night-lights mean
pub fn viirs_file_name(label: &str, range: &DateRange) -> String {
    format!("{}_viirs_mean_{}", label, range.compact_start())
}

/// VIIRS monthly night-lights mean radiance with region statistics
pub fn viirs_annual_mean(label: &str, range: DateRange) -> DatasetConfig {
    let mut dataset = DatasetConfig::raster(format!("viirs_{}", range.start.year()), VIIRS_MONTHLY);
    dataset.filter = CollectionFilter::new().with_date_range(range);
    dataset.composite = CompositeParams {
        reducer: Reducer::Mean,
        bands: bands(&["avg_rad"]),
        renames: BTreeMap::from([("avg_rad".to_string(), "mean_rad".to_string())]),
        ..CompositeParams::default()
    };
    dataset.statistics = Some(
        ZonalRequest::new("mean_rad", &[Statistic::Mean, Statistic::Min, Statistic::Max], 500.0)
            .with_max_samples(1_000_000_000),
    );
    dataset.export = Some(raster_export(
        format!("{}_VIIRS_Mean_{}", label, range.compact_start()),
        Some(viirs_file_name(label, &range)),
        500.0,
        Some(10_000_000_000_000),
    ));
    dataset.display = Some(DisplayHint {
        bands: bands(&["mean_rad"]),
        min: 0.0,
        max: 60.0,
        palette: palette(&[
            "000000", "0b1f4a", "2c7bb6", "41b6c4", "a1dab4", "ffffcc", "fdae61", "d7191c", "ffffff",
        ]),
        gamma: None,
    });
    dataset
}

/// ALOS 30 m digital surface model, median elevation band
pub fn alos_dsm(label: &str) -> DatasetConfig {
    let mut dataset = DatasetConfig::raster("alos_dsm", ALOS_DSM);
    dataset.composite = CompositeParams { bands: bands(&["MED"]), ..CompositeParams::default() };
    dataset.export = Some(raster_export(format!("ALOS_DEM_{}", label), None, 12.5, None));
    dataset.display = Some(DisplayHint { min: 0.0, max: 5000.0, ..DisplayHint::default() });
    dataset
}

/// Rural access (inaccessibility) index
pub fn rural_access_index(label: &str) -> DatasetConfig {
    let mut dataset = DatasetConfig::raster("rural_access_index", RURAL_ACCESS_INDEX);
    dataset.export = Some(raster_export(format!("inaccessibilityindex_{}", label), None, 30.0, Some(1_000_000_000)));
    dataset.display = Some(DisplayHint {
        min: 0.0,
        max: 1.0,
        palette: palette(&["EFC2B3", "ECB176", "E9BD3A", "E6E600", "63C600", "00A600"]),
        ..DisplayHint::default()
    });
    dataset
}

/// Critical infrastructure spatial index
pub fn critical_infrastructure_index(label: &str) -> DatasetConfig {
    let mut dataset = DatasetConfig::raster("cisi", CISI);
    dataset.export = Some(raster_export(format!("CISI_{}", label), None, 30.0, Some(1_000_000_000)));
    dataset.display = Some(DisplayHint {
        min: 0.0,
        max: 0.2,
        palette: palette(&["f7fcf5", "c7e9c0", "74c476", "238b45", "00441b"]),
        ..DisplayHint::default()
    });
    dataset
}

/// Hospital layer of the infrastructure amount collection, display only
pub fn cisi_hospitals() -> DatasetConfig {
    let mut dataset = DatasetConfig::raster("cisi_hospitals", CISI_INFRASTRUCTURE);
    dataset.filter = CollectionFilter::new().with_tag("id_no", "hospital");
    dataset.take_first = true;
    dataset.display = Some(DisplayHint {
        min: 0.0,
        max: 50.0,
        palette: palette(&["fff7ec", "fdd49e", "fc8d59", "4575b4", "313695"]),
        ..DisplayHint::default()
    });
    dataset
}

/// Relative wealth index points inside the region, exported as GeoJSON
pub fn relative_wealth_index(label: &str) -> DatasetConfig {
    let mut dataset = DatasetConfig::vector("relative_wealth_index", RELATIVE_WEALTH_INDEX);
    dataset.sample_size = Some(5);
    dataset.export = Some(ExportConfig {
        description: format!("RWI_{}_GeoJSON", label),
        folder: EXPORT_FOLDER.to_string(),
        file_name: None,
        format: ExportFormat::GeoJson,
        spatial: None,
    });
    dataset.display = Some(DisplayHint {
        min: -2.0,
        max: 2.0,
        palette: palette(&["red", "yellow", "green"]),
        ..DisplayHint::default()
    });
    dataset
}

/// Mean of the WorldPop population series, band `population_mean`
///
/// `year` only tags the export name; the whole series is averaged.
pub fn worldpop_mean(label: &str, year: i32) -> DatasetConfig {
    let mut dataset = DatasetConfig::raster("worldpop", WORLDPOP);
    dataset.composite = CompositeParams {
        reducer: Reducer::Mean,
        bands: bands(&["population"]),
        suffix_with_reducer: true,
        ..CompositeParams::default()
    };
    dataset.export = Some(raster_export(
        format!("Population_{}_{}", year, label),
        None,
        100.0,
        Some(10_000_000_000_000),
    ));
    dataset.display = Some(DisplayHint {
        bands: bands(&["population_mean"]),
        min: 0.0,
        max: 50.0,
        palette: palette(&["24126c", "1fff4f", "d4ff50"]),
        gamma: None,
    });
    dataset
}

/// Every product over one administrative region
pub fn full_run(region: &str, sentinel2_range: DateRange, viirs_range: DateRange) -> PipelineConfig {
    PipelineConfig::new(
        region,
        vec![
            sentinel2_true_color(region, sentinel2_range),
            viirs_annual_mean(region, viirs_range),
            alos_dsm(region),
            rural_access_index(region),
            critical_infrastructure_index(region),
            cisi_hospitals(),
            relative_wealth_index(region),
            worldpop_mean(region, viirs_range.start.year()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::parse(start, end).unwrap()
    }

    #[test]
    fn test_full_run_validates() {
        let config = full_run("Islamabad", range("2025-04-01", "2025-12-31"), range("2025-01-01", "2025-12-31"));
        assert_eq!(config.datasets.len(), 8);
        config.validate().unwrap();
    }

    #[test]
    fn test_viirs_export_name() {
        let dataset = viirs_annual_mean("Islamabad", range("2025-01-01", "2025-12-31"));
        let export = dataset.export.unwrap();
        assert_eq!(export.destination().file_name, "Islamabad_viirs_mean_20250101");
        assert_eq!(export.description, "Islamabad_VIIRS_Mean_20250101");
    }

    #[test]
    fn test_worldpop_export_name_carries_year() {
        let export = worldpop_mean("Islamabad", 2025).export.unwrap();
        assert_eq!(export.description, "Population_2025_Islamabad");
        assert_eq!(export.spatial.unwrap().scale, 100.0);
    }

    #[test]
    fn test_sentinel2_masks_qa60() {
        let dataset = sentinel2_true_color("Islamabad", range("2025-04-01", "2025-12-31"));
        assert_eq!(dataset.composite.masking.qa_band(), Some("QA60"));
        assert_eq!(dataset.composite.scale_divisor, Some(10_000.0));
        assert_eq!(dataset.export.unwrap().destination().file_name, "S2_2025");
    }
}
