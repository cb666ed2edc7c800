use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::compositor::clip_to_region;
use crate::core::sampling::{resample_nearest, SampleGrid};
use crate::core::zonal::{reduce_region, ZonalRequest, ZonalStatistics};
use crate::io::export::{ExportProduct, ExportRequest};
use crate::io::{geojson, geotiff};
use crate::types::{Geometry, PipelineError, RasterLayer, SatResult};

/// Opaque backend job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by the backend for a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Running,
    Completed,
    Failed { reason: String },
}

/// Remote (or local) executor of materialising operations
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Hand an export to the backend; returns as soon as the job is accepted
    async fn submit_export(&self, request: &ExportRequest) -> SatResult<JobHandle>;

    async fn poll_status(&self, handle: &JobHandle) -> SatResult<BackendStatus>;

    /// Evaluate zonal statistics; blocks until the values are available
    ///
    /// May fail with `BudgetExceeded` when the sample bound is too small.
    async fn materialize_statistics(
        &self,
        layer: &RasterLayer,
        region: &Geometry,
        request: &ZonalRequest,
    ) -> SatResult<ZonalStatistics>;
}

/// Statistics call bounded by a wall-clock limit
///
/// Expiry yields `Timeout`, never `BudgetExceeded`. The backend's own work
/// is not cancelled.
pub async fn statistics_with_timeout(
    backend: &dyn ComputeBackend,
    layer: &RasterLayer,
    region: &Geometry,
    request: &ZonalRequest,
    limit: Duration,
) -> SatResult<ZonalStatistics> {
    match tokio::time::timeout(limit, backend.materialize_statistics(layer, region, request)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            context: format!("statistics of band '{}' over region '{}' at {} m", request.band, region.name, request.scale),
            elapsed: limit,
        }),
    }
}

#[derive(Debug, Clone)]
struct LocalJob {
    status: BackendStatus,
    artifacts: Vec<PathBuf>,
}

/// Backend that materialises exports under a local directory
///
/// Rasters become one float32 GeoTIFF per band, vectors a GeoJSON file.
/// Each export runs on a blocking worker task.
pub struct LocalBackend {
    root: PathBuf,
    jobs: Arc<Mutex<HashMap<JobHandle, LocalJob>>>,
    next_id: AtomicU64,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Files written by a completed job
    pub fn artifacts(&self, handle: &JobHandle) -> Vec<PathBuf> {
        self.jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.get(handle).map(|j| j.artifacts.clone()))
            .unwrap_or_default()
    }

    fn lock_error(context: &str) -> PipelineError {
        PipelineError::BackendFailure {
            context: context.to_string(),
            reason: "job table lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl ComputeBackend for LocalBackend {
    async fn submit_export(&self, request: &ExportRequest) -> SatResult<JobHandle> {
        let handle = JobHandle::new(format!("local-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.jobs
            .lock()
            .map_err(|_| Self::lock_error(&request.description))?
            .insert(handle.clone(), LocalJob { status: BackendStatus::Running, artifacts: Vec::new() });

        log::debug!("Local job {} started for '{}'", handle, request.description);
        let root = self.root.clone();
        let jobs = Arc::clone(&self.jobs);
        let job_request = request.clone();
        let job_handle = handle.clone();
        // detached: the job finishes or fails whether or not anyone polls
        tokio::task::spawn_blocking(move || {
            let job = match write_artifacts(&root, &job_request) {
                Ok(artifacts) => LocalJob { status: BackendStatus::Completed, artifacts },
                Err(e) => LocalJob { status: BackendStatus::Failed { reason: e.to_string() }, artifacts: Vec::new() },
            };
            if let Ok(mut jobs) = jobs.lock() {
                jobs.insert(job_handle, job);
            }
        });
        Ok(handle)
    }

    async fn poll_status(&self, handle: &JobHandle) -> SatResult<BackendStatus> {
        let jobs = self.jobs.lock().map_err(|_| Self::lock_error(handle.as_str()))?;
        jobs.get(handle)
            .map(|j| j.status.clone())
            .ok_or_else(|| PipelineError::NotFound { kind: "backend job", name: handle.to_string() })
    }

    async fn materialize_statistics(
        &self,
        layer: &RasterLayer,
        region: &Geometry,
        request: &ZonalRequest,
    ) -> SatResult<ZonalStatistics> {
        let (layer, region, request) = (layer.clone(), region.clone(), request.clone());
        let context = format!("statistics worker for '{}'", layer.id);
        tokio::task::spawn_blocking(move || reduce_region(&layer, &region, &request))
            .await
            .map_err(|e| PipelineError::BackendFailure { context, reason: e.to_string() })?
    }
}

fn write_artifacts(root: &Path, request: &ExportRequest) -> SatResult<Vec<PathBuf>> {
    let destination = &request.destination;
    let folder = root.join(&destination.folder);
    std::fs::create_dir_all(&folder)?;

    match &request.product {
        ExportProduct::Raster { composite, region, spatial } => {
            let grid = SampleGrid::for_region(region, spatial.scale);
            let resampled = resample_nearest(&composite.layer, &grid)?;
            let layer = clip_to_region(&resampled, region)?;
            let mut written = Vec::with_capacity(layer.bands.len());
            for (name, band) in &layer.bands {
                let path = folder.join(destination.band_file(name, layer.bands.len()));
                geotiff::write_band(&path, band, &layer.transform)?;
                log::info!("Wrote {} ({}x{} px)", path.display(), band.dim().1, band.dim().0);
                written.push(path);
            }
            Ok(written)
        }
        ExportProduct::Vector(collection) => {
            let path = folder.join(format!("{}.geojson", destination.file_name));
            std::fs::write(&path, geojson::to_string(collection)?)?;
            log::info!("Wrote {} ({} features)", path.display(), collection.size());
            Ok(vec![path])
        }
    }
}
