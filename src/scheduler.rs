//! The capture loop.
//!
//! For every configured operation, pending schedule entries are captured one at
//! a time, each inside its own transaction. A successful capture writes its
//! history row in that same transaction before committing; a failed one is
//! rolled back, logged and left pending for the next run.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction};

use crate::{
    data::now_brasilia,
    descriptor::DatasetDescriptor,
    error::Result,
    filter::parse_conditions,
    pipeline::{CaptureReport, CaptureRequest, DEFAULT_BATCH_SIZE, DEFAULT_DRY_RUN_ROW_LIMIT, PipelineOptions, capture},
    resolve::Dimensions,
    schedule::{ScheduleEntry, pending_entries, record_history},
    transform::TransformContext,
};

/// An operation identifier bound to the dataset it captures.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
    pub descriptor: Arc<DatasetDescriptor>,
    pub source_root: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub batch_size: usize,
    pub dry_run: bool,
    pub dry_run_row_limit: usize,
    /// Fixed ingestion timestamp; the clock is read per batch when unset.
    pub timestamp: Option<DateTime<FixedOffset>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            dry_run_row_limit: DEFAULT_DRY_RUN_ROW_LIMIT,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCapture {
    pub operation: String,
    pub periodo_id: String,
    pub unidade_geografica_id: String,
    pub rows_loaded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCapture {
    pub operation: String,
    pub periodo_id: String,
    pub unidade_geografica_id: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub done: Vec<CompletedCapture>,
    pub failed: Vec<FailedCapture>,
    /// Set when a dry run stopped after its first entry.
    pub dry_run: bool,
}

impl RunSummary {
    pub fn rows_loaded(&self) -> usize {
        self.done.iter().map(|c| c.rows_loaded).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn capture_entry(
    tx: &mut Transaction<'_>,
    operation: &Operation,
    entry: &ScheduleEntry,
    context: &TransformContext<'_>,
    options: &RunOptions,
) -> Result<CaptureReport> {
    let expressions = entry.conditions()?;
    let conditions = parse_conditions(expressions.as_slice())?;
    let request = CaptureRequest::new(
        entry.uf_sigla.as_str(),
        entry.periodo_data_inicio,
        entry.tabela_destino.as_str(),
        operation.source_root.as_str(),
    )
    .with_params(entry.template_params()?)
    .with_conditions(conditions);
    let pipeline_options = PipelineOptions {
        batch_size: options.batch_size,
        row_limit: options.dry_run.then_some(options.dry_run_row_limit),
    };
    let report = capture(tx, &operation.descriptor, &request, context, pipeline_options)?;
    if !options.dry_run {
        record_history(tx, entry, options.timestamp.unwrap_or_else(now_brasilia))?;
    }
    Ok(report)
}

/// Captures every pending entry of `operations`, in order.
///
/// Only errors reading the schedule or dimension tables abort the run; capture
/// failures are collected in the returned summary.
pub fn run(conn: &mut Connection, operations: &[Operation], options: &RunOptions) -> Result<RunSummary> {
    let dimensions = Dimensions::load(conn)?;
    let mut context = TransformContext::new(&dimensions, &dimensions);
    if let Some(timestamp) = options.timestamp {
        context = context.with_timestamp(timestamp);
    }
    let mut summary = RunSummary::default();

    for operation in operations {
        let entries = pending_entries(conn, &operation.id)?;
        info!(
            "Operation {} ('{}'): {} pending capture(s)",
            operation.id,
            operation.descriptor.name,
            entries.len()
        );

        for entry in &entries {
            info!("Capturing {}", entry.label());
            let mut tx = conn.transaction()?;
            let outcome = capture_entry(&mut tx, operation, entry, &context, options);

            if options.dry_run {
                tx.rollback()?;
                info!("Dry run: all changes for {} rolled back", entry.label());
                match outcome {
                    Ok(report) => summary.done.push(completed(entry, report)),
                    Err(err) => {
                        error!("Dry run of {} failed: {}", entry.label(), err.chain());
                        summary.failed.push(failed(entry, &err));
                    }
                }
                summary.dry_run = true;
                return Ok(summary);
            }

            let outcome = outcome.and_then(|report| {
                tx.commit()?;
                Ok(report)
            });
            match outcome {
                Ok(report) => {
                    info!(
                        "Capture of {} committed with {} row(s)",
                        entry.label(),
                        report.rows_loaded
                    );
                    summary.done.push(completed(entry, report));
                }
                Err(err) => {
                    error!("Capture of {} failed: {}", entry.label(), err.chain());
                    summary.failed.push(failed(entry, &err));
                }
            }
        }
    }

    if !summary.failed.is_empty() {
        warn!(
            "{} capture(s) failed and remain pending",
            summary.failed.len()
        );
    }
    Ok(summary)
}

fn completed(entry: &ScheduleEntry, report: CaptureReport) -> CompletedCapture {
    CompletedCapture {
        operation: entry.operacao_id.clone(),
        periodo_id: entry.periodo_id.clone(),
        unidade_geografica_id: entry.unidade_geografica_id.clone(),
        rows_loaded: report.rows_loaded,
    }
}

fn failed(entry: &ScheduleEntry, err: &crate::error::Error) -> FailedCapture {
    FailedCapture {
        operation: entry.operacao_id.clone(),
        periodo_id: entry.periodo_id.clone(),
        unidade_geografica_id: entry.unidade_geografica_id.clone(),
        kind: err.kind(),
        message: err.chain(),
    }
}
