//! Raw batch → canonical batch.
//!
//! [`transform`] validates the batch header against the descriptor, compiles a
//! per-column plan once, then walks the rows: decode special encodings, derive
//! the period, synthesize identifiers, resolve dimensions and cast every cell
//! to its declared type. The first failing row aborts the whole batch.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use itertools::Itertools;
use log::debug;
use uuid::Uuid;

use crate::{
    data::{
        Value, decode_compact_date, decode_compact_month, decode_flag, float_to_integer,
        is_zero_sentinel, normalize_raw_column_name, now_brasilia, parse_boolean_token,
        parse_float, parse_naive_date, parse_timestamp, to_decimal,
    },
    descriptor::{
        CREATED_AT_COLUMN, DatasetDescriptor, Decoding, GEOGRAPHY_ID_COLUMN, ID_COLUMN,
        PERIOD_ID_COLUMN, PeriodRule, SemanticType, UPDATED_AT_COLUMN,
    },
    error::{MappingError, Result, TransformationError},
    extract::RawBatch,
    resolve::{GeographyLookup, PeriodLookup},
};

/// Lookups and clock used by [`transform`].
pub struct TransformContext<'a> {
    periods: &'a dyn PeriodLookup,
    geographies: &'a dyn GeographyLookup,
    timestamp: Option<DateTime<FixedOffset>>,
}

impl<'a> TransformContext<'a> {
    pub fn new(periods: &'a dyn PeriodLookup, geographies: &'a dyn GeographyLookup) -> Self {
        Self {
            periods,
            geographies,
            timestamp: None,
        }
    }

    /// Pins the ingestion timestamp instead of reading the clock per batch.
    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalBatch {
    pub columns: Vec<String>,
    pub types: Vec<SemanticType>,
    pub rows: Vec<Vec<Option<Value>>>,
}

impl CanonicalBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_ref()
    }
}

#[derive(Debug, Clone, Copy)]
enum ColumnSource {
    Raw {
        index: Option<usize>,
        decoding: Option<Decoding>,
    },
    Id,
    PeriodId,
    GeographyId,
    Ingestion,
    PeriodStart,
}

#[derive(Debug)]
struct ColumnPlan<'d> {
    name: &'d str,
    ty: SemanticType,
    source: ColumnSource,
}

#[derive(Debug, Clone, Copy)]
enum PeriodSource {
    YearMonth {
        year: Option<usize>,
        month: Option<usize>,
    },
    Competence(Option<usize>),
}

struct Plan<'d> {
    columns: Vec<ColumnPlan<'d>>,
    period: PeriodSource,
    geography: Option<usize>,
}

impl<'d> Plan<'d> {
    fn compile(descriptor: &'d DatasetDescriptor, headers: &[String]) -> Self {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(index, header)| (header.as_str(), index))
            .collect();
        let raw_index_of = |canonical: &str| {
            descriptor
                .mapping
                .iter()
                .find(|entry| entry.to == canonical)
                .and_then(|entry| positions.get(entry.from.as_str()).copied())
        };

        let columns = descriptor
            .columns
            .iter()
            .map(|column| {
                let name = column.name.as_str();
                let source = match name {
                    ID_COLUMN => ColumnSource::Id,
                    PERIOD_ID_COLUMN => ColumnSource::PeriodId,
                    GEOGRAPHY_ID_COLUMN => ColumnSource::GeographyId,
                    CREATED_AT_COLUMN | UPDATED_AT_COLUMN => ColumnSource::Ingestion,
                    _ if name == descriptor.period.target() => ColumnSource::PeriodStart,
                    _ => ColumnSource::Raw {
                        index: raw_index_of(name),
                        decoding: descriptor.decoding_for(name),
                    },
                };
                ColumnPlan {
                    name,
                    ty: column.ty,
                    source,
                }
            })
            .collect();

        let period = match &descriptor.period {
            PeriodRule::YearMonth { year, month, .. } => PeriodSource::YearMonth {
                year: raw_index_of(year),
                month: raw_index_of(month),
            },
            PeriodRule::Competence { column, .. } => PeriodSource::Competence(raw_index_of(column)),
        };

        Self {
            columns,
            period,
            geography: raw_index_of(&descriptor.geography),
        }
    }
}

fn cell(row: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|index| row.get(index))
        .map(String::as_str)
        .unwrap_or("")
}

fn derive_period(source: PeriodSource, row: &[String], row_number: usize) -> Result<NaiveDate, TransformationError> {
    match source {
        PeriodSource::YearMonth { year, month } => {
            let (year, month) = (cell(row, year), cell(row, month));
            let as_number = |value: &str| parse_float(value).ok().flatten().and_then(float_to_integer);
            as_number(year)
                .zip(as_number(month))
                .and_then(|(y, m)| {
                    NaiveDate::from_ymd_opt(i32::try_from(y).ok()?, u32::try_from(m).ok()?, 1)
                })
                .ok_or_else(|| TransformationError::InvalidPeriod {
                    row: row_number,
                    detail: format!("year '{year}' and month '{month}'"),
                })
        }
        PeriodSource::Competence(index) => {
            let value = cell(row, index);
            decode_compact_month(value).ok_or_else(|| TransformationError::InvalidPeriod {
                row: row_number,
                detail: format!("competence '{value}'"),
            })
        }
    }
}

fn decode_cell(
    value: &str,
    decoding: Option<Decoding>,
    ty: SemanticType,
    row: usize,
    column: &str,
) -> Result<Option<Value>, TransformationError> {
    match decoding {
        Some(Decoding::CompactDate) => Ok(decode_compact_date(value).map(Value::Date)),
        Some(Decoding::CompactMonth) => Ok(decode_compact_month(value).map(Value::Date)),
        Some(Decoding::Flag) => Ok(decode_flag(value.trim()).map(Value::Boolean)),
        Some(Decoding::ZeroSentinel) if is_zero_sentinel(value.trim()) => Ok(None),
        Some(Decoding::ZeroSentinel) | None => cast_value(value, ty, row, column),
    }
}

/// Casts one raw cell. Numeric types go through `f64` so blank cells read as null.
pub fn cast_value(
    value: &str,
    ty: SemanticType,
    row: usize,
    column: &str,
) -> Result<Option<Value>, TransformationError> {
    let invalid = |expected: &'static str| TransformationError::InvalidValue {
        row,
        column: column.to_string(),
        value: value.to_string(),
        expected,
    };
    let missing = || TransformationError::MissingValue {
        row,
        column: column.to_string(),
    };

    if value.is_empty() {
        return if ty.is_nullable() { Ok(None) } else { Err(missing()) };
    }

    match ty {
        SemanticType::String | SemanticType::NullableString => Ok(Some(Value::String(value.to_string()))),
        SemanticType::Integer | SemanticType::NullableInteger => {
            match parse_float(value).map_err(|_| invalid("integer"))? {
                Some(number) => float_to_integer(number)
                    .map(|i| Some(Value::Integer(i)))
                    .ok_or_else(|| invalid("integer")),
                None if ty.is_nullable() => Ok(None),
                None => Err(missing()),
            }
        }
        SemanticType::Decimal => match parse_float(value).map_err(|_| invalid("decimal"))? {
            Some(number) => to_decimal(value, number)
                .map(|d| Some(Value::Decimal(d)))
                .ok_or_else(|| invalid("decimal")),
            None => Ok(None),
        },
        SemanticType::Boolean => {
            if value.trim().is_empty() {
                return Ok(None);
            }
            parse_boolean_token(value)
                .map(|b| Some(Value::Boolean(b)))
                .ok_or_else(|| invalid("boolean"))
        }
        SemanticType::Date => {
            if value.trim().is_empty() {
                return Ok(None);
            }
            parse_naive_date(value)
                .map(|d| Some(Value::Date(d)))
                .ok_or_else(|| invalid("date"))
        }
        SemanticType::Timestamp => {
            if value.trim().is_empty() {
                return Ok(None);
            }
            parse_timestamp(value)
                .map(|t| Some(Value::Timestamp(t)))
                .ok_or_else(|| invalid("timestamp"))
        }
    }
}

/// Converts one raw batch into the descriptor's canonical schema.
pub fn transform(
    descriptor: &DatasetDescriptor,
    raw: &RawBatch,
    context: &TransformContext<'_>,
) -> Result<CanonicalBatch> {
    let headers = raw
        .headers
        .iter()
        .map(|header| normalize_raw_column_name(header))
        .collect::<Vec<_>>();
    if let Some(name) = headers.iter().duplicates().next() {
        return Err(MappingError::Duplicate {
            dataset: descriptor.name.clone(),
            what: "source column",
            name: name.clone(),
        }
        .into());
    }
    descriptor.validate(headers.as_slice())?;
    descriptor.check_mandatory(headers.as_slice())?;

    let plan = Plan::compile(descriptor, &headers);
    let ingested_at = context.timestamp.unwrap_or_else(now_brasilia);
    let mut period_cache: HashMap<NaiveDate, String> = HashMap::new();
    let mut geography_cache: HashMap<String, String> = HashMap::new();
    let mut rows = Vec::with_capacity(raw.rows.len());

    for (offset, row) in raw.rows.iter().enumerate() {
        let row_number = offset + 1;
        let period_start = derive_period(plan.period, row, row_number)?;

        let period_id = match period_cache.get(&period_start) {
            Some(id) => id.clone(),
            None => {
                let id = context.periods.period_id(period_start).ok_or(
                    TransformationError::UnresolvedPeriod {
                        row: row_number,
                        date: period_start,
                    },
                )?;
                period_cache.insert(period_start, id.clone());
                id
            }
        };

        let code = cell(row, plan.geography);
        let geography_id = match geography_cache.get(code) {
            Some(id) => id.clone(),
            None => {
                let id = context.geographies.geography_id(code).ok_or_else(|| {
                    TransformationError::UnresolvedGeography {
                        row: row_number,
                        code: code.to_string(),
                    }
                })?;
                geography_cache.insert(code.to_string(), id.clone());
                id
            }
        };

        let mut values = Vec::with_capacity(plan.columns.len());
        for column in &plan.columns {
            let value = match column.source {
                ColumnSource::Raw { index, decoding } => {
                    decode_cell(cell(row, index), decoding, column.ty, row_number, column.name)?
                }
                ColumnSource::Id => Some(Value::String(Uuid::now_v7().simple().to_string())),
                ColumnSource::PeriodId => Some(Value::String(period_id.clone())),
                ColumnSource::GeographyId => Some(Value::String(geography_id.clone())),
                ColumnSource::Ingestion => Some(Value::Timestamp(ingested_at)),
                ColumnSource::PeriodStart => Some(Value::Date(period_start)),
            };
            values.push(value);
        }
        rows.push(values);
    }

    debug!(
        "Transformed {} row(s) of {} ({} period(s), {} geography code(s) resolved)",
        rows.len(),
        descriptor.name,
        period_cache.len(),
        geography_cache.len()
    );
    Ok(CanonicalBatch {
        columns: plan.columns.iter().map(|c| c.name.to_string()).collect(),
        types: plan.columns.iter().map(|c| c.ty).collect(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_columns_reject_blanks() {
        let err = cast_value("", SemanticType::Integer, 3, "diarias").unwrap_err();
        assert_eq!(
            err,
            TransformationError::MissingValue {
                row: 3,
                column: "diarias".to_string()
            }
        );
        assert!(cast_value("", SemanticType::String, 1, "id").is_err());
        assert_eq!(cast_value("", SemanticType::NullableInteger, 1, "n").unwrap(), None);
    }

    #[test]
    fn numeric_cells_go_through_float() {
        assert_eq!(
            cast_value(" 7.0 ", SemanticType::Integer, 1, "diarias").unwrap(),
            Some(Value::Integer(7))
        );
        assert_eq!(cast_value("   ", SemanticType::NullableInteger, 1, "n").unwrap(), None);
        assert!(matches!(
            cast_value("abc", SemanticType::Integer, 1, "diarias"),
            Err(TransformationError::InvalidValue { expected: "integer", .. })
        ));
        assert_eq!(
            cast_value("1234.56", SemanticType::Decimal, 1, "valor_total")
                .unwrap()
                .unwrap()
                .to_string(),
            "1234.56"
        );
    }

    #[test]
    fn decoding_rules_take_precedence_over_casting() {
        assert_eq!(
            decode_cell("20210231", Some(Decoding::CompactDate), SemanticType::Date, 1, "d").unwrap(),
            None
        );
        assert_eq!(
            decode_cell("000", Some(Decoding::ZeroSentinel), SemanticType::NullableString, 1, "c")
                .unwrap(),
            None
        );
        assert_eq!(
            decode_cell("010", Some(Decoding::ZeroSentinel), SemanticType::NullableString, 1, "c")
                .unwrap(),
            Some(Value::String("010".to_string()))
        );
        assert_eq!(
            decode_cell("2", Some(Decoding::Flag), SemanticType::Boolean, 1, "obito").unwrap(),
            None
        );
    }

    #[test]
    fn period_derivation_rejects_impossible_months() {
        let row = vec!["2021".to_string(), "13".to_string()];
        let source = PeriodSource::YearMonth {
            year: Some(0),
            month: Some(1),
        };
        assert!(matches!(
            derive_period(source, &row, 4),
            Err(TransformationError::InvalidPeriod { row: 4, .. })
        ));
        let row = vec!["2021".to_string(), "08".to_string()];
        assert_eq!(
            derive_period(source, &row, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 8, 1).unwrap()
        );
    }
}
