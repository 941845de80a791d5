//! Period and geography dimension lookups.
//!
//! The transformer only sees the two lookup traits. [`Dimensions`] is the
//! in-memory implementation loaded once per run from the `periodos` and
//! `unidades_geograficas` tables.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::debug;
use rusqlite::Connection;

pub trait PeriodLookup {
    /// Identifier of the period containing `date`, shortest period first.
    fn period_id(&self, date: NaiveDate) -> Option<String>;
}

pub trait GeographyLookup {
    /// Internal identifier for a government geography code.
    fn geography_id(&self, code: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(id: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            id: id.into(),
            start,
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// IBGE publishes 7-digit municipality codes; SUS uses the first 6 digits.
pub fn normalize_geography_code(code: &str) -> &str {
    let trimmed = code.trim();
    if trimmed.len() == 7 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        &trimmed[..6]
    } else {
        trimmed
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dimensions {
    periods: Vec<Period>,
    geographies: HashMap<String, String>,
}

impl Dimensions {
    pub fn new<I>(periods: Vec<Period>, geographies: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let geographies = geographies
            .into_iter()
            .map(|(id_sus, id)| (normalize_geography_code(&id_sus).to_string(), id))
            .collect();
        Self {
            periods,
            geographies,
        }
    }

    pub fn load(conn: &Connection) -> rusqlite::Result<Self> {
        let mut statement = conn.prepare("SELECT id, data_inicio, data_fim FROM periodos")?;
        let periods = statement
            .query_map([], |row| Ok(Period::new(row.get::<_, String>(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut statement = conn.prepare("SELECT id_sus, id FROM unidades_geograficas")?;
        let geographies = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!(
            "Loaded {} period(s) and {} geography code(s)",
            periods.len(),
            geographies.len()
        );
        Ok(Self::new(periods, geographies))
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn geography_count(&self) -> usize {
        self.geographies.len()
    }
}

impl PeriodLookup for Dimensions {
    fn period_id(&self, date: NaiveDate) -> Option<String> {
        self.periods
            .iter()
            .filter(|period| period.contains(date))
            .min_by_key(|period| period.end - period.start)
            .map(|period| period.id.clone())
    }
}

impl GeographyLookup for Dimensions {
    fn geography_id(&self, code: &str) -> Option<String> {
        self.geographies.get(normalize_geography_code(code)).cloned()
    }
}
