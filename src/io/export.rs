use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::compositor::Composite;
use crate::core::sampling::SampleGrid;
use crate::io::backend::{BackendStatus, ComputeBackend, JobHandle};
use crate::io::geojson::GEOJSON_CRS;
use crate::types::{epsg_code, BoundingBox, Geometry, PipelineError, SatResult, VectorCollection};

/// Default raster pixel ceiling when a request does not state one
pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

/// Artifact encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    GeoTiff,
    GeoJson,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::GeoTiff => "tif",
            ExportFormat::GeoJson => "geojson",
        }
    }

    pub fn is_raster(&self) -> bool {
        matches!(self, ExportFormat::GeoTiff)
    }
}

/// Where the artifact lands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub folder: String,
    pub file_name: String,
    pub format: ExportFormat,
}

impl Destination {
    /// Run-unique destination key
    pub fn key(&self) -> String {
        format!("{}/{}.{}", self.folder, self.file_name, self.format.extension())
    }

    /// File written for one band; multi-band rasters get one file per band
    pub fn band_file(&self, band: &str, band_count: usize) -> String {
        if band_count == 1 {
            format!("{}.{}", self.file_name, self.format.extension())
        } else {
            format!("{}_{}.{}", self.file_name, band, self.format.extension())
        }
    }
}

/// Spatial parameters of a raster export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSpatialParams {
    /// Ground-sample distance in metres
    pub scale: f64,
    pub crs: Option<String>,
    #[serde(default)]
    pub max_pixels: Option<u64>,
}

/// Exportable product; shared, never mutated by the orchestrator
#[derive(Debug, Clone)]
pub enum ExportProduct {
    Raster {
        composite: Arc<Composite>,
        region: Geometry,
        spatial: RasterSpatialParams,
    },
    Vector(Arc<VectorCollection>),
}

/// Immutable export request record
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Task description, shown in logs and errors
    pub description: String,
    pub product: ExportProduct,
    pub destination: Destination,
}

impl ExportRequest {
    pub fn raster(
        description: impl Into<String>,
        composite: Arc<Composite>,
        region: Geometry,
        destination: Destination,
        spatial: RasterSpatialParams,
    ) -> Self {
        Self {
            description: description.into(),
            product: ExportProduct::Raster { composite, region, spatial },
            destination,
        }
    }

    pub fn vector(description: impl Into<String>, collection: Arc<VectorCollection>, destination: Destination) -> Self {
        Self { description: description.into(), product: ExportProduct::Vector(collection), destination }
    }

    fn context(&self) -> String {
        format!("export '{}' to {}", self.description, self.destination.key())
    }

    /// Every file the backend writes for this request, as `folder/file`
    pub fn artifact_keys(&self) -> Vec<String> {
        let destination = &self.destination;
        match &self.product {
            ExportProduct::Raster { composite, .. } => {
                let bands = &composite.layer.bands;
                bands
                    .keys()
                    .map(|band| format!("{}/{}", destination.folder, destination.band_file(band, bands.len())))
                    .collect()
            }
            ExportProduct::Vector(_) => vec![destination.key()],
        }
    }

    /// Pixel count of the output grid for raster exports
    pub fn estimated_pixels(&self) -> Option<u64> {
        match &self.product {
            ExportProduct::Raster { region, spatial, .. } => Some(SampleGrid::for_region(region, spatial.scale).len()),
            ExportProduct::Vector(_) => None,
        }
    }

    /// Local checks that never touch the backend
    pub fn validate(&self) -> SatResult<()> {
        let invalid = |reason: String| PipelineError::Validation { context: self.context(), reason };
        if self.destination.file_name.trim().is_empty() {
            return Err(invalid("file name is empty".to_string()));
        }

        match &self.product {
            ExportProduct::Raster { composite, region, spatial } => {
                if !self.destination.format.is_raster() {
                    return Err(invalid(format!("{:?} cannot encode a raster", self.destination.format)));
                }
                if !(spatial.scale.is_finite() && spatial.scale > 0.0) {
                    return Err(invalid(format!("scale must be positive, got {}", spatial.scale)));
                }
                let crs = spatial.crs.as_deref().ok_or_else(|| invalid("raster export requires a CRS".to_string()))?;
                if epsg_code(crs).is_none() {
                    return Err(invalid(format!("GeoTIFF needs an EPSG code, got {}", crs)));
                }
                if crs != composite.crs() {
                    return Err(invalid(format!(
                        "requested CRS {} differs from product CRS {}; reproject before export",
                        crs,
                        composite.crs()
                    )));
                }
                if region.crs != composite.crs() {
                    return Err(invalid(format!("export region CRS {} differs from product CRS", region.crs)));
                }
                let extent: BoundingBox = composite.layer.extent();
                if !extent.intersects(&region.bbox()) {
                    return Err(invalid("export region does not overlap the product".to_string()));
                }
                let budget = spatial.max_pixels.unwrap_or(DEFAULT_MAX_PIXELS);
                let required = SampleGrid::for_region(region, spatial.scale).len();
                if required > budget {
                    return Err(PipelineError::BudgetExceeded { context: self.context(), required, budget });
                }
            }
            ExportProduct::Vector(collection) => {
                if self.destination.format != ExportFormat::GeoJson {
                    return Err(invalid(format!("{:?} cannot encode a vector table", self.destination.format)));
                }
                if collection.crs != GEOJSON_CRS {
                    return Err(invalid(format!("GeoJSON requires {}, collection is {}", GEOJSON_CRS, collection.crs)));
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle state of one export job
///
/// `Pending -> Submitted -> Running -> {Completed | Failed}` or
/// `Pending -> Rejected`. No transition is ever reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Submitted,
    Running,
    Completed,
    Failed { reason: String },
    Rejected { reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed { .. } | JobState::Rejected { .. })
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Submitted => write!(f, "SUBMITTED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed { reason } => write!(f, "FAILED ({})", reason),
            JobState::Rejected { reason } => write!(f, "REJECTED ({})", reason),
        }
    }
}

/// Index of a job within one orchestrator run
pub type JobId = usize;

/// Request plus its exclusively owned lifecycle state
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub request: ExportRequest,
    state: JobState,
    handle: Option<JobHandle>,
}

impl ExportJob {
    fn new(request: ExportRequest) -> Self {
        Self { request, state: JobState::Pending, handle: None }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn handle(&self) -> Option<&JobHandle> {
        self.handle.as_ref()
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(!self.state.is_terminal(), "terminal job '{}' cannot move", self.request.description);
        log::debug!("Job '{}': {} -> {}", self.request.description, self.state, next);
        self.state = next;
    }
}

/// Summary of one job after polling
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub id: JobId,
    pub description: String,
    pub destination: String,
    pub state: JobState,
}

/// Validates, submits and polls export jobs for one pipeline run
pub struct ExportOrchestrator {
    backend: Arc<dyn ComputeBackend>,
    jobs: Vec<ExportJob>,
    submitted_names: HashSet<String>,
}

impl ExportOrchestrator {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self { backend, jobs: Vec::new(), submitted_names: HashSet::new() }
    }

    pub fn job(&self, id: JobId) -> Option<&ExportJob> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> &[ExportJob] {
        &self.jobs
    }

    /// Validate locally; rejected jobs are recorded and never reach the backend
    fn admit(&mut self, request: ExportRequest) -> SatResult<JobId> {
        let id = self.jobs.len();
        let mut job = ExportJob::new(request);

        let verdict = job.request.validate().and_then(|_| {
            let keys = job.request.artifact_keys();
            match keys.iter().find(|k| self.submitted_names.contains(*k)) {
                Some(taken) => Err(PipelineError::Validation {
                    context: job.request.context(),
                    reason: format!("artifact {} already used in this run", taken),
                }),
                None => Ok(keys),
            }
        });

        match verdict {
            Ok(keys) => {
                self.submitted_names.extend(keys);
                self.jobs.push(job);
                Ok(id)
            }
            Err(e) => {
                log::warn!("Rejected {}", e);
                job.transition(JobState::Rejected { reason: e.to_string() });
                self.jobs.push(job);
                Err(e)
            }
        }
    }

    /// Validate and hand one job to the backend without waiting for it
    pub async fn submit(&mut self, request: ExportRequest) -> SatResult<JobId> {
        let id = self.admit(request)?;
        self.dispatch(vec![id]).await.pop().unwrap_or(Ok(id))
    }

    /// Validate and submit many jobs; backend submissions run concurrently
    pub async fn submit_all(&mut self, requests: Vec<ExportRequest>) -> Vec<SatResult<JobId>> {
        let admitted: Vec<SatResult<JobId>> = requests.into_iter().map(|r| self.admit(r)).collect();
        let ids: Vec<JobId> = admitted.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        let mut dispatched = self.dispatch(ids).await.into_iter();
        admitted
            .into_iter()
            .map(|r| match r {
                Ok(_) => dispatched.next().unwrap_or_else(|| {
                    Err(PipelineError::BackendFailure {
                        context: "export dispatch".to_string(),
                        reason: "no submission result".to_string(),
                    })
                }),
                Err(e) => Err(e),
            })
            .collect()
    }

    async fn dispatch(&mut self, ids: Vec<JobId>) -> Vec<SatResult<JobId>> {
        for &id in &ids {
            self.jobs[id].transition(JobState::Submitted);
        }
        let backend = Arc::clone(&self.backend);
        let submissions = ids.iter().map(|&id| {
            let backend = Arc::clone(&backend);
            let request = self.jobs[id].request.clone();
            async move { backend.submit_export(&request).await }
        });
        let handles = join_all(submissions).await;

        ids.into_iter()
            .zip(handles)
            .map(|(id, handle)| {
                let job = &mut self.jobs[id];
                match handle {
                    Ok(handle) => {
                        log::info!("Submitted {} as {}", job.request.context(), handle);
                        job.handle = Some(handle);
                        job.transition(JobState::Running);
                        Ok(id)
                    }
                    Err(e) => {
                        log::warn!("Submission failed for {}: {}", job.request.context(), e);
                        job.transition(JobState::Failed { reason: e.to_string() });
                        Err(PipelineError::BackendFailure { context: job.request.context(), reason: e.to_string() })
                    }
                }
            })
            .collect()
    }

    /// Poll one job once; terminal states are returned without a backend call
    pub async fn poll(&mut self, id: JobId) -> SatResult<JobState> {
        let job = self.jobs.get(id).ok_or_else(|| PipelineError::NotFound {
            kind: "export job",
            name: id.to_string(),
        })?;
        if job.state.is_terminal() {
            return Ok(job.state.clone());
        }
        let handle = job.handle.clone().ok_or_else(|| PipelineError::Validation {
            context: job.request.context(),
            reason: "job was never submitted".to_string(),
        })?;
        let status = self.backend.poll_status(&handle).await;
        self.apply_status(id, status);
        Ok(self.jobs[id].state.clone())
    }

    fn apply_status(&mut self, id: JobId, status: SatResult<BackendStatus>) {
        let job = &mut self.jobs[id];
        match status {
            Ok(BackendStatus::Running) => {}
            Ok(BackendStatus::Completed) => {
                log::info!("Completed {}", job.request.context());
                job.transition(JobState::Completed);
            }
            Ok(BackendStatus::Failed { reason }) => {
                log::warn!("Backend failure for {}: {}", job.request.context(), reason);
                job.transition(JobState::Failed { reason });
            }
            // a failed status query says nothing about the job itself
            Err(e) => log::warn!("Status query failed for {}: {}", job.request.context(), e),
        }
    }

    /// Poll every running job concurrently until all are terminal
    ///
    /// Dropping the returned future abandons polling; unfinished jobs stay
    /// `Running`. With a deadline, unfinished jobs produce a `Timeout` error.
    pub async fn wait_all(&mut self, interval: Duration, deadline: Option<Duration>) -> SatResult<Vec<JobReport>> {
        let started = Instant::now();
        loop {
            let pending: Vec<(JobId, JobHandle)> = self
                .jobs
                .iter()
                .enumerate()
                .filter(|(_, j)| j.state == JobState::Running)
                .filter_map(|(id, j)| j.handle.clone().map(|h| (id, h)))
                .collect();
            if pending.is_empty() {
                return Ok(self.reports());
            }

            let backend = Arc::clone(&self.backend);
            let polls = pending.iter().map(|(_, handle)| {
                let backend = Arc::clone(&backend);
                let handle = handle.clone();
                async move { backend.poll_status(&handle).await }
            });
            let statuses = join_all(polls).await;
            for ((id, _), status) in pending.into_iter().zip(statuses) {
                self.apply_status(id, status);
            }

            if self.jobs.iter().all(|j| j.state != JobState::Running) {
                return Ok(self.reports());
            }
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    let running: Vec<String> = self
                        .jobs
                        .iter()
                        .filter(|j| j.state == JobState::Running)
                        .map(|j| j.request.description.clone())
                        .collect();
                    return Err(PipelineError::Timeout {
                        context: format!("export jobs [{}]", running.join(", ")),
                        elapsed: started.elapsed(),
                    });
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub fn reports(&self) -> Vec<JobReport> {
        self.jobs
            .iter()
            .enumerate()
            .map(|(id, j)| JobReport {
                id,
                description: j.request.description.clone(),
                destination: j.request.destination.key(),
                state: j.state.clone(),
            })
            .collect()
    }
}
