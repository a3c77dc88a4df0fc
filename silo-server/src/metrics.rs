//! Prometheus metrics for the import/export service.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Labels a counter with the pipeline that produced it (import/export).
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PipelineLabel {
    pub pipeline: String,
}

impl prometheus_client::encoding::EncodeLabelSet for PipelineLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("pipeline", self.pipeline.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Pipeline plus the terminal outcome its job reached.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PipelineOutcomeLabel {
    pub pipeline: String,
    pub outcome: String,
}

impl prometheus_client::encoding::EncodeLabelSet for PipelineOutcomeLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("pipeline", self.pipeline.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppMetrics {
    pub active_jobs: Gauge,
    pub jobs_created: Family<PipelineLabel, Counter>,
    pub jobs_finished: Family<PipelineOutcomeLabel, Counter>,
    pub records_processed: Counter,
    pub registry: Arc<Registry>,
}

impl AppMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let active_jobs = Gauge::default();
        registry.register(
            "silo_active_jobs",
            "Number of pipeline jobs currently running",
            active_jobs.clone(),
        );

        let jobs_created = Family::<PipelineLabel, Counter>::default();
        registry.register(
            "silo_jobs_created_total",
            "Total jobs accepted by pipeline",
            jobs_created.clone(),
        );

        let jobs_finished = Family::<PipelineOutcomeLabel, Counter>::default();
        registry.register(
            "silo_jobs_finished_total",
            "Total jobs finished by pipeline and outcome",
            jobs_finished.clone(),
        );

        let records_processed = Counter::default();
        registry.register(
            "silo_records_processed_total",
            "Total records processed by import pipelines",
            records_processed.clone(),
        );

        Self {
            active_jobs,
            jobs_created,
            jobs_finished,
            records_processed,
            registry: Arc::new(registry),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }

    pub fn job_created(&self, pipeline: &str) {
        self.jobs_created
            .get_or_create(&PipelineLabel {
                pipeline: pipeline.to_string(),
            })
            .inc();
    }

    pub fn job_finished(&self, pipeline: &str, outcome: &str) {
        self.jobs_finished
            .get_or_create(&PipelineOutcomeLabel {
                pipeline: pipeline.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}
