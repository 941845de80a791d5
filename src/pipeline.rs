//! Extract → transform → load for one capture.

use chrono::NaiveDate;
use log::{debug, info};
use rusqlite::Transaction;

use crate::{
    descriptor::DatasetDescriptor,
    error::{LoadError, Result},
    extract::{SourceLocator, TemplateParams, extract, render_template},
    filter::{RowCondition, apply_conditions},
    sink::{LoadStatus, load},
    transform::{TransformContext, transform},
};

pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_DRY_RUN_ROW_LIMIT: usize = 1_000;

/// Everything that identifies one capture's source and destination.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub uf_sigla: String,
    pub period_start: NaiveDate,
    pub destination: String,
    pub source_root: String,
    pub params: TemplateParams,
    pub conditions: Vec<RowCondition>,
}

impl CaptureRequest {
    pub fn new(
        uf_sigla: impl Into<String>,
        period_start: NaiveDate,
        destination: impl Into<String>,
        source_root: impl Into<String>,
    ) -> Self {
        let uf_sigla = uf_sigla.into();
        Self {
            params: TemplateParams::for_capture(&uf_sigla, period_start),
            uf_sigla,
            period_start,
            destination: destination.into(),
            source_root: source_root.into(),
            conditions: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: TemplateParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<RowCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn locator(&self, descriptor: &DatasetDescriptor) -> Result<SourceLocator> {
        let file_name = render_template(&descriptor.source.file_name, &self.params)?;
        Ok(SourceLocator::resolve(&self.source_root, &file_name)?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub batch_size: usize,
    /// Stop once more raw rows than this were read.
    pub row_limit: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            row_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub batches: usize,
    pub rows_read: usize,
    pub rows_loaded: usize,
    pub truncated: bool,
}

/// Streams the source through the transformer into `tx`. Nothing is committed.
pub fn capture(
    tx: &mut Transaction<'_>,
    descriptor: &DatasetDescriptor,
    request: &CaptureRequest,
    context: &TransformContext<'_>,
    options: PipelineOptions,
) -> Result<CaptureReport> {
    let locator = request.locator(descriptor)?;
    info!(
        "Starting capture of '{}' for '{}' in {} from {}",
        descriptor.name,
        request.uf_sigla,
        request.period_start.format("%m/%Y"),
        locator
    );

    let mut batches = extract(&locator, &descriptor.source, options.batch_size)?;
    descriptor.validate(batches.headers())?;
    descriptor.check_mandatory(batches.headers())?;

    let mut report = CaptureReport::default();
    for batch in batches.by_ref() {
        let batch = batch?;
        report.batches += 1;
        report.rows_read += batch.len();

        let batch = apply_conditions(batch, &request.conditions)?;
        let canonical = transform(descriptor, &batch, context)?;
        let status = load(tx, &request.destination, &canonical);
        let code = status.code();
        match status {
            LoadStatus::Loaded { rows } => report.rows_loaded += rows,
            LoadStatus::Failed { reason } => {
                return Err(LoadError::Status {
                    table: request.destination.clone(),
                    code,
                    reason,
                }
                .into());
            }
        }
        debug!(
            "Batch {} done: {} read, {} loaded so far",
            report.batches, report.rows_read, report.rows_loaded
        );

        if options.row_limit.is_some_and(|limit| report.rows_read > limit) {
            info!("Stopping after {} row(s): dry-run row limit reached", report.rows_read);
            report.truncated = true;
            break;
        }
    }

    info!(
        "Capture of '{}' finished: {} record(s) read, {} loaded into {}",
        descriptor.name,
        batches.records_read(),
        report.rows_loaded,
        request.destination
    );
    Ok(report)
}
