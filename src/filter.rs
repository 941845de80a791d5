//! Row conditions applied to raw batches before transformation.
//!
//! A condition string holds one or more `COLUMN op value` clauses joined by
//! `and`, e.g. `UFMUN == '280030' and IDADE >= 18`. Columns are raw source names.

use std::cmp::Ordering;

use crate::{data::normalize_raw_column_name, error::ConfigError, extract::RawBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCondition {
    pub column: String,
    pub operator: ComparisonOperator,
    pub value: String,
}

fn invalid(reason: String) -> ConfigError {
    ConfigError::Invalid {
        field: "condicoes",
        reason,
    }
}

/// Parses every expression and flattens their `and` clauses into one list.
pub fn parse_conditions<S: AsRef<str>>(expressions: &[S]) -> Result<Vec<RowCondition>, ConfigError> {
    let mut conditions = Vec::new();
    for expression in expressions {
        for clause in split_and(expression.as_ref()) {
            conditions.push(parse_condition(clause)?);
        }
    }
    Ok(conditions)
}

/// Splits on ` and ` outside quoted values.
fn split_and(expression: &str) -> Vec<&str> {
    const SEPARATOR: &[u8] = b" and ";
    let bytes = expression.as_bytes();
    let mut clauses = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        match quote {
            Some(open) if byte == open => quote = None,
            Some(_) => {}
            None if byte == b'\'' || byte == b'"' => quote = Some(byte),
            None if bytes[index..]
                .get(..SEPARATOR.len())
                .is_some_and(|window| window.eq_ignore_ascii_case(SEPARATOR)) =>
            {
                clauses.push(&expression[start..index]);
                index += SEPARATOR.len();
                start = index;
                continue;
            }
            None => {}
        }
        index += 1;
    }
    clauses.push(&expression[start..]);
    clauses.into_iter().filter(|c| !c.trim().is_empty()).collect()
}

fn parse_condition(clause: &str) -> Result<RowCondition, ConfigError> {
    let trimmed = clause.trim();
    let lowered = trimmed.to_ascii_lowercase();
    for (needle, operator) in [
        (" contains ", ComparisonOperator::Contains),
        (" startswith ", ComparisonOperator::StartsWith),
        (" endswith ", ComparisonOperator::EndsWith),
    ] {
        if let Some(idx) = lowered.find(needle) {
            let (left, right) = trimmed.split_at(idx);
            return build(left, operator, &right[needle.len()..], trimmed);
        }
    }

    for (needle, operator) in [
        ("==", ComparisonOperator::Eq),
        ("!=", ComparisonOperator::NotEq),
        (">=", ComparisonOperator::Ge),
        ("<=", ComparisonOperator::Le),
        ("=", ComparisonOperator::Eq),
        (">", ComparisonOperator::Gt),
        ("<", ComparisonOperator::Lt),
    ] {
        if let Some(idx) = trimmed.find(needle) {
            return build(&trimmed[..idx], operator, &trimmed[idx + needle.len()..], trimmed);
        }
    }

    Err(invalid(format!("cannot parse condition '{trimmed}'")))
}

fn build(
    column: &str,
    operator: ComparisonOperator,
    value: &str,
    clause: &str,
) -> Result<RowCondition, ConfigError> {
    let column = normalize_raw_column_name(column);
    if column.is_empty() {
        return Err(invalid(format!("condition '{clause}' has no column")));
    }
    Ok(RowCondition {
        column,
        operator,
        value: unquote(value.trim()).to_string(),
    })
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn compare(left: &str, right: &str) -> Ordering {
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

impl RowCondition {
    pub fn matches(&self, cell: &str) -> bool {
        use ComparisonOperator::*;
        match self.operator {
            Contains => cell.contains(&self.value),
            StartsWith => cell.starts_with(&self.value),
            EndsWith => cell.ends_with(&self.value),
            Eq => compare(cell, &self.value) == Ordering::Equal,
            NotEq => compare(cell, &self.value) != Ordering::Equal,
            Gt => compare(cell, &self.value) == Ordering::Greater,
            Ge => compare(cell, &self.value) != Ordering::Less,
            Lt => compare(cell, &self.value) == Ordering::Less,
            Le => compare(cell, &self.value) != Ordering::Greater,
        }
    }
}

/// Keeps the rows matching every condition. Fails when a condition names a
/// column the batch does not have.
pub fn apply_conditions(batch: RawBatch, conditions: &[RowCondition]) -> Result<RawBatch, ConfigError> {
    if conditions.is_empty() {
        return Ok(batch);
    }
    let headers = batch
        .headers
        .iter()
        .map(|h| normalize_raw_column_name(h))
        .collect::<Vec<_>>();
    let resolved = conditions
        .iter()
        .map(|condition| {
            headers
                .iter()
                .position(|h| *h == condition.column)
                .map(|index| (index, condition))
                .ok_or_else(|| invalid(format!("unknown column '{}'", condition.column)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let RawBatch { headers, rows } = batch;
    let rows = rows
        .into_iter()
        .filter(|row| {
            resolved
                .iter()
                .all(|(index, condition)| condition.matches(row.get(*index).map_or("", String::as_str)))
        })
        .collect();
    Ok(RawBatch::new(headers, rows))
}
