//! Report-builder dispatch.
//!
//! Builders are registered per report type; the worker pool looks them up by
//! the job's tag and never branches on concrete types itself.

use std::collections::HashMap;
use std::sync::Arc;

use reportworks_core::{ReportFilters, ReportType};

use crate::repository::RepositoryError;

/// A rendered report artifact.
#[derive(Debug, Clone)]
pub struct BuiltReport {
    /// Serialized XLSX bytes.
    pub bytes: Vec<u8>,
    /// Number of data rows in the artifact.
    pub rows: usize,
}

impl BuiltReport {
    pub const CONTENT_TYPE: &'static str =
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    pub const FILE_EXTENSION: &'static str = "xlsx";
}

/// Build failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    /// The filters matched nothing. A user-input condition, not a transport
    /// fault.
    #[error("no data found for the given filters")]
    NoData,
    /// The job carried a filter spec for a different report type.
    #[error("filter mismatch: expected {expected} filters")]
    FilterMismatch { expected: ReportType },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Artifact serialization failed.
    #[error("render failed: {0}")]
    Render(String),
}

/// Progress sink handed to a builder; values are 0-100 checkpoints.
pub type ProgressSink<'a> = &'a mut dyn FnMut(u8);

/// One report type's transformation from filters to artifact.
pub trait ReportBuilder: Send + Sync {
    fn report_type(&self) -> ReportType;

    /// Fetch, project and render. Implementations report checkpoints through
    /// `progress` (data fetched, artifact rendered).
    fn build(
        &self,
        filters: &ReportFilters,
        progress: ProgressSink<'_>,
    ) -> Result<BuiltReport, BuildError>;
}

/// Strategy table mapping report types to builders.
///
/// Open for extension: adding a report type means registering one builder,
/// the pool stays untouched.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: HashMap<ReportType, Arc<dyn ReportBuilder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, builder: Arc<dyn ReportBuilder>) -> Self {
        self.builders.insert(builder.report_type(), builder);
        self
    }

    pub fn get(&self, report_type: ReportType) -> Option<&Arc<dyn ReportBuilder>> {
        self.builders.get(&report_type)
    }

    pub fn registered_types(&self) -> impl Iterator<Item = ReportType> + '_ {
        self.builders.keys().copied()
    }
}
