//! Capture schedule and history tables.
//!
//! An entry is pending while no history row exists for its
//! (operation, period, geography) triple. History rows are only written by the
//! scheduler, inside the same transaction as the loaded data.

use chrono::{DateTime, FixedOffset, NaiveDate};
use itertools::Itertools;
use log::debug;
use rusqlite::{Connection, Transaction, params};
use serde_json::{Map, Value as JsonValue};

use crate::{
    error::{ConfigError, Result},
    extract::TemplateParams,
};

pub const CONDITIONS_PARAMETER: &str = "condicoes";

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub operacao_id: String,
    pub uf_sigla: String,
    pub unidade_geografica_id: String,
    pub periodo_id: String,
    pub periodo_data_inicio: NaiveDate,
    pub tabela_destino: String,
    /// Raw JSON text; parsed per capture so one bad row cannot stop a run.
    pub parametros: Option<String>,
}

impl ScheduleEntry {
    pub fn triple(&self) -> (&str, &str, &str) {
        (
            self.operacao_id.as_str(),
            self.periodo_id.as_str(),
            self.unidade_geografica_id.as_str(),
        )
    }

    pub fn label(&self) -> String {
        format!(
            "{} {} {}",
            self.operacao_id,
            self.uf_sigla,
            self.periodo_data_inicio.format("%m/%Y")
        )
    }

    pub fn parameters(&self) -> Result<Map<String, JsonValue>, ConfigError> {
        parse_parameters(self.parametros.as_deref())
    }

    /// Capture placeholders plus every string-valued parameter.
    pub fn template_params(&self) -> Result<TemplateParams, ConfigError> {
        Ok(self
            .parameters()?
            .iter()
            .filter(|(name, _)| name.as_str() != CONDITIONS_PARAMETER)
            .filter_map(|(name, value)| value.as_str().map(|v| (name, v)))
            .fold(
                TemplateParams::for_capture(&self.uf_sigla, self.periodo_data_inicio),
                |params, (name, value)| params.with(name.clone(), value),
            ))
    }

    /// `condicoes` may be one expression or a list of them.
    pub fn conditions(&self) -> Result<Vec<String>, ConfigError> {
        match self.parameters()?.get(CONDITIONS_PARAMETER) {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(JsonValue::String(expression)) => Ok(vec![expression.clone()]),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| ConfigError::Invalid {
                        field: CONDITIONS_PARAMETER,
                        reason: format!("expected a string, found {item}"),
                    })
                })
                .collect(),
            Some(other) => Err(ConfigError::Invalid {
                field: CONDITIONS_PARAMETER,
                reason: format!("expected a string or list, found {other}"),
            }),
        }
    }
}

fn parse_parameters(raw: Option<&str>) -> Result<Map<String, JsonValue>, ConfigError> {
    let Some(text) = raw.filter(|t| !t.trim().is_empty()) else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<JsonValue>(text) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(ConfigError::Invalid {
            field: "parametros",
            reason: format!("expected a JSON object, found {other}"),
        }),
        Err(err) => Err(ConfigError::Invalid {
            field: "parametros",
            reason: err.to_string(),
        }),
    }
}

/// Entries of `operation_id` with no history record, oldest period first.
/// Repeated triples collapse to their first entry.
pub fn pending_entries(conn: &Connection, operation_id: &str) -> Result<Vec<ScheduleEntry>> {
    let mut statement = conn.prepare(
        "SELECT a.operacao_id, a.uf_sigla, a.unidade_geografica_id, a.periodo_id,
                a.periodo_data_inicio, a.tabela_destino, a.parametros
           FROM capturas_agendamentos a
          WHERE a.operacao_id = ?1
            AND NOT EXISTS (
                SELECT 1 FROM capturas_historico h
                 WHERE h.operacao_id = a.operacao_id
                   AND h.periodo_id = a.periodo_id
                   AND h.unidade_geografica_id = a.unidade_geografica_id)
          ORDER BY a.periodo_data_inicio, a.uf_sigla, a.rowid",
    )?;
    let rows = statement
        .query_map(params![operation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, NaiveDate>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let entries = rows
        .into_iter()
        .map(
            |(operacao_id, uf_sigla, unidade_geografica_id, periodo_id, periodo_data_inicio, tabela_destino, parametros)| {
                ScheduleEntry {
                    operacao_id,
                    uf_sigla,
                    unidade_geografica_id,
                    periodo_id,
                    periodo_data_inicio,
                    tabela_destino,
                    parametros,
                }
            },
        )
        .unique_by(|entry| {
            (
                entry.operacao_id.clone(),
                entry.periodo_id.clone(),
                entry.unidade_geografica_id.clone(),
            )
        })
        .collect::<Vec<_>>();
    debug!("{} pending entr(ies) for operation {operation_id}", entries.len());
    Ok(entries)
}

pub fn record_history(tx: &Transaction<'_>, entry: &ScheduleEntry, at: DateTime<FixedOffset>) -> Result<()> {
    tx.execute(
        "INSERT INTO capturas_historico (operacao_id, periodo_id, unidade_geografica_id, criacao_data)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.operacao_id,
            entry.periodo_id,
            entry.unidade_geografica_id,
            at.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn history_count(conn: &Connection, operation_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM capturas_historico WHERE operacao_id = ?1",
        params![operation_id],
        |row| row.get(0),
    )?)
}
