//! Shared fixtures and a scripted compute backend for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use ndarray::Array2;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use satstack::core::zonal::{reduce_region, ZonalRequest, ZonalStatistics};
use satstack::io::backend::{BackendStatus, ComputeBackend, JobHandle};
use satstack::io::export::ExportRequest;
use satstack::io::region::ADM1_NAME;
use satstack::types::{
    Band, BoundingBox, Feature, FeatureGeometry, Geometry, GridTransform, PipelineError, Polygon, RasterLayer,
    RasterSeries, SatResult, VectorCollection,
};

pub const WGS84: &str = "EPSG:4326";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// 0.1 x 0.1 degree box around Islamabad
pub fn islamabad_bbox() -> BoundingBox {
    BoundingBox::new(73.0, 33.6, 73.1, 33.7)
}

pub fn islamabad() -> Geometry {
    Geometry::rectangle("Islamabad", islamabad_bbox(), WGS84).unwrap()
}

/// 10 x 10 grid of 0.01 degree pixels covering the Islamabad box
pub fn grid() -> GridTransform {
    GridTransform::new(73.0, 33.7, 0.01, 0.01, WGS84)
}

pub fn constant(value: f32) -> Band {
    Band::from_values(Array2::from_elem((10, 10), value))
}

pub fn layer(id: &str, bands: Vec<(&str, Band)>) -> RasterLayer {
    let bands: BTreeMap<String, Band> = bands.into_iter().map(|(n, b)| (n.to_string(), b)).collect();
    RasterLayer::new(id, grid(), bands).unwrap()
}

/// Sentinel-2-like scene: reflectance bands in native units plus a QA60 band
pub fn s2_scene(id: &str, acquired: &str, cloud_pct: f64, reflectance: f32, qa: f32) -> RasterLayer {
    layer(
        id,
        vec![
            ("B2", constant(reflectance)),
            ("B3", constant(reflectance)),
            ("B4", constant(reflectance)),
            ("B8", constant(reflectance)),
            ("QA60", constant(qa)),
        ],
    )
    .with_acquired(date(acquired))
    .with_property("CLOUDY_PIXEL_PERCENTAGE", cloud_pct)
}

pub fn viirs_series() -> RasterSeries {
    let months = (1..=12)
        .map(|m| {
            let radiance = Array2::from_shape_fn((10, 10), |(r, c)| (r + c) as f32 + m as f32);
            layer(&format!("viirs_{:02}", m), vec![("avg_rad", Band::from_values(radiance))])
                .with_acquired(date(&format!("2025-{:02}-01", m)))
        })
        .collect();
    RasterSeries::new("NOAA/VIIRS/DNB/MONTHLY_V1/VCMCFG", months)
}

pub fn gaul_boundaries() -> VectorCollection {
    VectorCollection::new(
        "gaul1",
        WGS84,
        vec![
            Feature::new(FeatureGeometry::Polygon(Polygon::rectangle(&islamabad_bbox()))).with_property(ADM1_NAME, "Islamabad"),
            Feature::new(FeatureGeometry::Polygon(Polygon::rectangle(&BoundingBox::new(70.0, 29.0, 75.0, 32.0))))
                .with_property(ADM1_NAME, "Punjab"),
        ],
    )
}

pub fn rwi_points() -> VectorCollection {
    VectorCollection::new(
        "projects/sat-io/open-datasets/facebook/relative_wealth_index",
        WGS84,
        vec![
            Feature::new(FeatureGeometry::Point([73.02, 33.65])).with_property("rwi", 0.9),
            Feature::new(FeatureGeometry::Point([73.08, 33.61])).with_property("rwi", 0.4),
            Feature::new(FeatureGeometry::Point([74.30, 31.50])).with_property("rwi", -0.3),
        ],
    )
}

/// Scripted behaviour of one export job, keyed by request description
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    /// Report RUNNING for `n` polls, then COMPLETED
    CompleteAfter(usize),
    /// Report RUNNING for `n` polls, then FAILED with the reason
    FailAfter(usize, String),
    /// RUNNING forever
    Never,
    /// Refuse the submission itself
    RefuseSubmit(String),
}

#[derive(Debug)]
struct ScriptedJob {
    script: Script,
    polls: usize,
}

/// Fake backend whose job lifecycles follow fixed scripts
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    default_script: Script,
    statistics_delay: Option<Duration>,
    jobs: Mutex<HashMap<JobHandle, ScriptedJob>>,
    submitted: Mutex<Vec<String>>,
    polls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(default_script: Script) -> Self {
        Self {
            scripts: HashMap::new(),
            default_script,
            statistics_delay: None,
            jobs: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_script(mut self, description: &str, script: Script) -> Self {
        self.scripts.insert(description.to_string(), script);
        self
    }

    pub fn with_statistics_delay(mut self, delay: Duration) -> Self {
        self.statistics_delay = Some(delay);
        self
    }

    /// Descriptions of every submission the backend received
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeBackend for ScriptedBackend {
    async fn submit_export(&self, request: &ExportRequest) -> SatResult<JobHandle> {
        let script = self.scripts.get(&request.description).cloned().unwrap_or_else(|| self.default_script.clone());
        self.submitted.lock().unwrap().push(request.description.clone());
        if let Script::RefuseSubmit(reason) = script {
            return Err(PipelineError::BackendFailure { context: request.description.clone(), reason });
        }
        let mut jobs = self.jobs.lock().unwrap();
        let handle = JobHandle::new(format!("job-{}", jobs.len() + 1));
        jobs.insert(handle.clone(), ScriptedJob { script, polls: 0 });
        Ok(handle)
    }

    async fn poll_status(&self, handle: &JobHandle) -> SatResult<BackendStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(handle)
            .ok_or_else(|| PipelineError::NotFound { kind: "backend job", name: handle.to_string() })?;
        job.polls += 1;
        Ok(match &job.script {
            Script::CompleteAfter(n) if job.polls > *n => BackendStatus::Completed,
            Script::FailAfter(n, reason) if job.polls > *n => BackendStatus::Failed { reason: reason.clone() },
            _ => BackendStatus::Running,
        })
    }

    async fn materialize_statistics(
        &self,
        layer: &RasterLayer,
        region: &Geometry,
        request: &ZonalRequest,
    ) -> SatResult<ZonalStatistics> {
        if let Some(delay) = self.statistics_delay {
            tokio::time::sleep(delay).await;
        }
        reduce_region(layer, region, request)
    }
}
