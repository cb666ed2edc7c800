//! Configuration-driven pipeline runs
//!
//! A run resolves the region once, then processes every dataset in turn:
//! filter, composite, optional statistics, optional export. A failing
//! dataset is recorded on its outcome and never stops its siblings. All
//! exports are submitted together and then polled to a terminal state.

pub mod config;
pub mod presets;

pub use config::{DatasetConfig, DatasetSource, DisplayHint, ExportConfig, PipelineConfig, PropertyEquals};

use std::sync::Arc;

use crate::core::compositor::{Provenance, TemporalCompositor};
use crate::core::vector_filter::{filter_bounds, filter_eq};
use crate::core::zonal::ZonalStatistics;
use crate::io::backend::{statistics_with_timeout, ComputeBackend};
use crate::io::catalog::DataSource;
use crate::io::export::{ExportOrchestrator, ExportRequest, JobId, JobReport, JobState};
use crate::io::region::RegionResolver;
use crate::types::{Geometry, PipelineError, SatResult, VectorCollection};

/// What happened to one dataset during a run
#[derive(Debug)]
pub struct DatasetOutcome {
    pub name: String,
    pub provenance: Option<Provenance>,
    pub bands: Vec<String>,
    pub statistics: Option<ZonalStatistics>,
    pub feature_count: Option<usize>,
    pub sample: Option<VectorCollection>,
    pub job: Option<JobId>,
    pub job_state: Option<JobState>,
    pub display: Option<DisplayHint>,
    pub error: Option<PipelineError>,
}

impl DatasetOutcome {
    fn new(dataset: &DatasetConfig) -> Self {
        Self {
            name: dataset.name.clone(),
            provenance: None,
            bands: Vec::new(),
            statistics: None,
            feature_count: None,
            sample: None,
            job: None,
            job_state: None,
            display: dataset.display.clone(),
            error: None,
        }
    }

    /// No error and no failed or rejected export
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && !matches!(self.job_state, Some(JobState::Failed { .. }) | Some(JobState::Rejected { .. }))
    }
}

/// Result of a full run
#[derive(Debug)]
pub struct RunReport {
    pub region: Geometry,
    pub datasets: Vec<DatasetOutcome>,
    pub jobs: Vec<JobReport>,
    /// Set when polling stopped before every export was terminal
    pub export_error: Option<PipelineError>,
}

impl RunReport {
    pub fn dataset(&self, name: &str) -> Option<&DatasetOutcome> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DatasetOutcome> {
        self.datasets.iter().filter(|d| !d.succeeded())
    }
}

/// One configured run over one region
pub struct Pipeline {
    config: PipelineConfig,
    resolver: Arc<dyn RegionResolver>,
    source: Arc<dyn DataSource>,
    backend: Arc<dyn ComputeBackend>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn RegionResolver>,
        source: Arc<dyn DataSource>,
        backend: Arc<dyn ComputeBackend>,
    ) -> SatResult<Self> {
        config.validate()?;
        Ok(Self { config, resolver, source, backend })
    }

    /// Run every dataset; only an unresolvable region fails the whole run
    pub async fn run(&self) -> SatResult<RunReport> {
        let region = self.resolver.resolve(&self.config.region)?;
        log::info!("Pipeline run over '{}' with {} datasets", region.name, self.config.datasets.len());

        let mut outcomes = Vec::with_capacity(self.config.datasets.len());
        let mut requests = Vec::new();
        let mut owners = Vec::new();
        for dataset in &self.config.datasets {
            let mut outcome = DatasetOutcome::new(dataset);
            match self.prepare(dataset, &region, &mut outcome).await {
                Ok(Some(request)) => {
                    owners.push(outcomes.len());
                    requests.push(request);
                }
                Ok(None) => {}
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    log::warn!("Dataset '{}' failed: {}", dataset.name, e);
                    outcome.error = Some(e);
                }
            }
            outcomes.push(outcome);
        }

        let mut orchestrator = ExportOrchestrator::new(Arc::clone(&self.backend));
        let submitted = orchestrator.submit_all(requests).await;
        for (index, result) in owners.into_iter().zip(submitted) {
            match result {
                Ok(id) => outcomes[index].job = Some(id),
                Err(e) => outcomes[index].error = Some(e),
            }
        }

        let export_error = orchestrator
            .wait_all(self.config.poll_interval(), self.config.export_timeout())
            .await
            .err();
        if let Some(e) = &export_error {
            log::warn!("Stopped waiting on exports: {}", e);
        }
        for outcome in &mut outcomes {
            outcome.job_state = outcome.job.and_then(|id| orchestrator.job(id)).map(|j| j.state().clone());
        }

        let report = RunReport { region, datasets: outcomes, jobs: orchestrator.reports(), export_error };
        log::info!(
            "Pipeline run over '{}' finished: {} of {} datasets succeeded",
            report.region.name,
            report.datasets.len() - report.failures().count(),
            report.datasets.len()
        );
        Ok(report)
    }

    async fn prepare(
        &self,
        dataset: &DatasetConfig,
        region: &Geometry,
        outcome: &mut DatasetOutcome,
    ) -> SatResult<Option<ExportRequest>> {
        match &dataset.source {
            DatasetSource::Raster { collection } => self.prepare_raster(dataset, collection, region, outcome).await,
            DatasetSource::Vector { collection } => self.prepare_vector(dataset, collection, region, outcome),
        }
    }

    async fn prepare_raster(
        &self,
        dataset: &DatasetConfig,
        collection: &str,
        region: &Geometry,
        outcome: &mut DatasetOutcome,
    ) -> SatResult<Option<ExportRequest>> {
        let series = self.source.raster_series(collection)?;
        let mut filtered = dataset.filter.apply(&series, region)?;
        if dataset.take_first {
            filtered.layers.truncate(1);
        }

        let compositor = TemporalCompositor::new(dataset.composite.clone());
        let planned = compositor.plan(filtered, region, dataset.filter.date_range)?;
        log::debug!("Planned composite of '{}' from {} layers", planned.series_id(), planned.layer_count());
        let composite = planned.realize()?;
        outcome.provenance = Some(composite.provenance.clone());
        outcome.bands = composite.layer.band_names();

        if let Some(request) = &dataset.statistics {
            let statistics = statistics_with_timeout(
                self.backend.as_ref(),
                &composite.layer,
                region,
                request,
                self.config.stats_timeout(),
            )
            .await?;
            match &dataset.filter.date_range {
                Some(range) => log::info!("'{}' statistics for {}: {}", dataset.name, range, statistics),
                None => log::info!("'{}' statistics: {}", dataset.name, statistics),
            }
            outcome.statistics = Some(statistics);
        }

        let Some(export) = &dataset.export else {
            return Ok(None);
        };
        let spatial = export
            .spatial
            .clone()
            .ok_or_else(|| PipelineError::Config(format!("dataset '{}': raster export needs spatial parameters", dataset.name)))?;
        Ok(Some(ExportRequest::raster(
            export.description.clone(),
            Arc::new(composite),
            region.clone(),
            export.destination(),
            spatial,
        )))
    }

    fn prepare_vector(
        &self,
        dataset: &DatasetConfig,
        collection: &str,
        region: &Geometry,
        outcome: &mut DatasetOutcome,
    ) -> SatResult<Option<ExportRequest>> {
        let mut features = self.source.vector_collection(collection)?;
        if let Some(filter) = &dataset.property_filter {
            features = filter_eq(&features, &filter.property, &filter.value);
        }
        let filtered = filter_bounds(&features, region)?;
        log::info!("Number of '{}' features in '{}': {}", dataset.name, region.name, filtered.size());
        outcome.feature_count = Some(filtered.size());
        if let Some(n) = dataset.sample_size {
            outcome.sample = Some(filtered.limit(n));
        }

        Ok(dataset
            .export
            .as_ref()
            .map(|export| ExportRequest::vector(export.description.clone(), Arc::new(filtered), export.destination())))
    }
}
