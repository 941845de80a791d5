//! Dataset descriptors: raw→canonical column mapping, canonical type table and
//! special decoding rules for one government data source.
//!
//! A descriptor is plain data loaded from YAML. Loading validates the static
//! invariants ([`DatasetDescriptor::validate_descriptor`]); every extract is then
//! checked against it with [`DatasetDescriptor::validate`] before any row is
//! transformed, so a new or renamed source column stops the run instead of
//! being silently dropped.
//!
//! ## Invariants
//!
//! - raw names are unique, canonical names are unique, type-table keys are unique;
//! - every mapped canonical column has exactly one declared type, except the
//!   period sub-fields consumed by the [`PeriodRule`];
//! - every type-table key is mapped, derived (period target) or synthesized;
//! - decoding rules only target typed columns of a compatible type.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
    str::FromStr,
    sync::OnceLock,
};

use heck::ToSnakeCase;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{data::normalize_raw_column_name, error::MappingError};

pub const ID_COLUMN: &str = "id";
pub const PERIOD_ID_COLUMN: &str = "periodo_id";
pub const GEOGRAPHY_ID_COLUMN: &str = "unidade_geografica_id";
pub const CREATED_AT_COLUMN: &str = "criacao_data";
pub const UPDATED_AT_COLUMN: &str = "atualizacao_data";

pub const SYNTHESIZED_COLUMNS: [&str; 5] = [
    ID_COLUMN,
    PERIOD_ID_COLUMN,
    GEOGRAPHY_ID_COLUMN,
    CREATED_AT_COLUMN,
    UPDATED_AT_COLUMN,
];

pub const UNDOCUMENTED_PREFIX: &str = "_nao_documentado_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    String,
    NullableString,
    Integer,
    NullableInteger,
    Decimal,
    Boolean,
    Date,
    Timestamp,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::NullableString => "nullable_string",
            SemanticType::Integer => "integer",
            SemanticType::NullableInteger => "nullable_integer",
            SemanticType::Decimal => "decimal",
            SemanticType::Boolean => "boolean",
            SemanticType::Date => "date",
            SemanticType::Timestamp => "timestamp",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "string",
            "nullable_string",
            "integer",
            "nullable_integer",
            "decimal",
            "boolean",
            "date",
            "timestamp",
        ]
    }

    /// Only fixed strings and plain integers reject empty cells.
    pub fn is_nullable(&self) -> bool {
        !matches!(self, SemanticType::String | SemanticType::Integer)
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            SemanticType::String | SemanticType::NullableString => "TEXT",
            SemanticType::Integer | SemanticType::NullableInteger => "INTEGER",
            SemanticType::Decimal => "NUMERIC",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Date => "DATE",
            SemanticType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = MappingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(SemanticType::String),
            "nullable_string" => Ok(SemanticType::NullableString),
            "integer" | "int" => Ok(SemanticType::Integer),
            "nullable_integer" => Ok(SemanticType::NullableInteger),
            "decimal" | "numeric" => Ok(SemanticType::Decimal),
            "boolean" | "bool" => Ok(SemanticType::Boolean),
            "date" => Ok(SemanticType::Date),
            "timestamp" | "datetime" => Ok(SemanticType::Timestamp),
            other => Err(MappingError::Parse(format!(
                "Unknown semantic type '{other}'. Supported types: {}",
                SemanticType::variants().join(", ")
            ))),
        }
    }
}

/// Accepts the short aliases as well as the canonical names.
impl<'de> Deserialize<'de> for SemanticType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMapping {
    pub from: String,
    pub to: String,
    /// Absent from older extracts; backfilled with empty cells.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SemanticType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    /// `YYYYMMDD`
    CompactDate,
    /// `YYYYMM`, first day of the month
    CompactMonth,
    ZeroSentinel,
    Flag,
}

impl Decoding {
    fn accepts(&self, ty: SemanticType) -> bool {
        match self {
            Decoding::CompactDate | Decoding::CompactMonth => ty == SemanticType::Date,
            Decoding::Flag => ty == SemanticType::Boolean,
            Decoding::ZeroSentinel => ty.is_nullable(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decoding::CompactDate => "compact_date",
            Decoding::CompactMonth => "compact_month",
            Decoding::ZeroSentinel => "zero_sentinel",
            Decoding::Flag => "flag",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodingRules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compact_date: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compact_month: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zero_sentinel: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flag: Vec<String>,
}

impl DecodingRules {
    fn entries(&self) -> impl Iterator<Item = (&str, Decoding)> {
        tagged(&self.compact_date, Decoding::CompactDate)
            .chain(tagged(&self.compact_month, Decoding::CompactMonth))
            .chain(tagged(&self.zero_sentinel, Decoding::ZeroSentinel))
            .chain(tagged(&self.flag, Decoding::Flag))
    }
}

fn tagged(columns: &[String], decoding: Decoding) -> impl Iterator<Item = (&str, Decoding)> {
    columns.iter().map(move |column| (column.as_str(), decoding))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PeriodRule {
    YearMonth {
        year: String,
        month: String,
        target: String,
    },
    /// One `YYYYMM` column.
    Competence { column: String, target: String },
}

impl PeriodRule {
    pub fn target(&self) -> &str {
        match self {
            PeriodRule::YearMonth { target, .. } | PeriodRule::Competence { target, .. } => target.as_str(),
        }
    }

    pub fn sources(&self) -> Vec<&str> {
        match self {
            PeriodRule::YearMonth { year, month, .. } => vec![year.as_str(), month.as_str()],
            PeriodRule::Competence { column, .. } => vec![column.as_str()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFormat {
    /// File name template, e.g. `RD{uf_sigla}{yymm}.csv`.
    pub file_name: String,
    #[serde(default = "SourceFormat::default_delimiter")]
    pub delimiter: char,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl SourceFormat {
    const fn default_delimiter() -> char {
        ','
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: SourceFormat,
    pub mapping: Vec<ColumnMapping>,
    pub columns: Vec<CanonicalColumn>,
    #[serde(default)]
    pub decoding: DecodingRules,
    pub period: PeriodRule,
    /// Canonical column holding the government geography code.
    pub geography: String,
}

fn canonical_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid canonical name regex"))
}

pub fn is_canonical_name(name: &str) -> bool {
    canonical_name_pattern().is_match(name)
}

/// Placeholder destination for a raw column the source never documented.
pub fn undocumented_placeholder(raw: &str) -> String {
    format!("{UNDOCUMENTED_PREFIX}{}", raw.trim().to_snake_case())
}

impl DatasetDescriptor {
    pub fn from_yaml_str(text: &str) -> Result<Self, MappingError> {
        let mut descriptor: DatasetDescriptor =
            serde_yaml::from_str(text).map_err(|err| MappingError::Parse(err.to_string()))?;
        for entry in &mut descriptor.mapping {
            entry.from = normalize_raw_column_name(&entry.from);
        }
        descriptor.validate_descriptor()?;
        Ok(descriptor)
    }

    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let file = File::open(path)
            .map_err(|err| MappingError::Parse(format!("Opening descriptor {path:?}: {err}")))?;
        let mut text = String::new();
        std::io::Read::read_to_string(&mut BufReader::new(file), &mut text)
            .map_err(|err| MappingError::Parse(format!("Reading descriptor {path:?}: {err}")))?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, MappingError> {
        serde_yaml::to_string(self).map_err(|err| MappingError::Parse(err.to_string()))
    }

    pub fn type_of(&self, canonical: &str) -> Option<SemanticType> {
        self.columns
            .iter()
            .find(|column| column.name == canonical)
            .map(|column| column.ty)
    }

    pub fn decoding_for(&self, canonical: &str) -> Option<Decoding> {
        self.decoding
            .entries()
            .find(|(name, _)| *name == canonical)
            .map(|(_, decoding)| decoding)
    }

    pub fn raw_columns(&self) -> impl Iterator<Item = &str> {
        self.mapping.iter().map(|entry| entry.from.as_str())
    }

    pub fn mandatory_raw_columns(&self) -> impl Iterator<Item = &str> {
        self.mapping
            .iter()
            .filter(|entry| !entry.optional)
            .map(|entry| entry.from.as_str())
    }

    pub fn mapping_for_raw(&self, raw: &str) -> Option<&ColumnMapping> {
        self.mapping.iter().find(|entry| entry.from == raw)
    }

    pub fn is_synthesized(name: &str) -> bool {
        SYNTHESIZED_COLUMNS.contains(&name)
    }

    /// Checks a sample extract's header against the mapping.
    ///
    /// Fails when a raw column has no mapping, or when the descriptor itself maps
    /// a column that has no declared type.
    pub fn validate<S: AsRef<str>>(&self, sample_columns: &[S]) -> Result<(), MappingError> {
        self.validate_descriptor()?;
        let known: HashSet<&str> = self.raw_columns().collect();
        let unmapped = sample_columns
            .iter()
            .map(|column| normalize_raw_column_name(column.as_ref()))
            .filter(|column| !known.contains(column.as_str()))
            .unique()
            .collect::<Vec<_>>();
        if !unmapped.is_empty() {
            return Err(MappingError::UnmappedColumns {
                dataset: self.name.clone(),
                columns: unmapped,
            });
        }
        Ok(())
    }

    /// Mandatory raw columns absent from an extract header.
    pub fn check_mandatory<S: AsRef<str>>(&self, columns: &[S]) -> Result<(), MappingError> {
        let present: HashSet<String> = columns
            .iter()
            .map(|column| normalize_raw_column_name(column.as_ref()))
            .collect();
        let missing = self
            .mandatory_raw_columns()
            .filter(|raw| !present.contains(*raw))
            .map(str::to_string)
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MappingError::MissingColumns {
                dataset: self.name.clone(),
                columns: missing,
            })
        }
    }

    pub fn validate_descriptor(&self) -> Result<(), MappingError> {
        let dataset = || self.name.clone();

        if let Some(name) = self.raw_columns().duplicates().next() {
            return Err(MappingError::Duplicate {
                dataset: dataset(),
                what: "raw column",
                name: name.to_string(),
            });
        }
        if let Some(name) = self.mapping.iter().map(|e| e.to.as_str()).duplicates().next() {
            return Err(MappingError::Duplicate {
                dataset: dataset(),
                what: "canonical column",
                name: name.to_string(),
            });
        }
        if let Some(name) = self.columns.iter().map(|c| c.name.as_str()).duplicates().next() {
            return Err(MappingError::Duplicate {
                dataset: dataset(),
                what: "type for column",
                name: name.to_string(),
            });
        }
        if let Some(name) = self
            .mapping
            .iter()
            .map(|e| e.to.as_str())
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .find(|name| !is_canonical_name(name))
        {
            return Err(MappingError::InvalidName {
                dataset: dataset(),
                name: name.to_string(),
            });
        }

        let period_sources: HashSet<&str> = self.period.sources().into_iter().collect();
        let mapped: HashSet<&str> = self.mapping.iter().map(|e| e.to.as_str()).collect();
        let typed: HashMap<&str, SemanticType> = self
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.ty))
            .collect();

        let mut untyped = self
            .mapping
            .iter()
            .map(|e| e.to.as_str())
            .filter(|name| !period_sources.contains(name) && !typed.contains_key(name))
            .collect::<BTreeSet<_>>();
        untyped.extend(
            SYNTHESIZED_COLUMNS
                .iter()
                .copied()
                .chain(std::iter::once(self.period.target()))
                .filter(|name| !typed.contains_key(name)),
        );
        if !untyped.is_empty() {
            return Err(MappingError::Untyped {
                dataset: dataset(),
                columns: untyped.into_iter().map(str::to_string).collect(),
            });
        }

        let orphaned = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| {
                period_sources.contains(name)
                    || (!mapped.contains(name)
                        && !Self::is_synthesized(name)
                        && *name != self.period.target())
            })
            .map(str::to_string)
            .collect::<Vec<_>>();
        if !orphaned.is_empty() {
            return Err(MappingError::Orphaned {
                dataset: dataset(),
                columns: orphaned,
            });
        }

        let invalid = |column: &str, reason: String| MappingError::InvalidDecoding {
            dataset: dataset(),
            column: column.to_string(),
            reason,
        };

        for source in &period_sources {
            if !mapped.contains(source) {
                return Err(invalid(source, "period sub-field is not mapped".to_string()));
            }
        }
        if typed.get(self.period.target()) != Some(&SemanticType::Date) {
            return Err(invalid(
                self.period.target(),
                "period target must be typed as date".to_string(),
            ));
        }
        if !mapped.contains(self.geography.as_str()) {
            return Err(invalid(
                &self.geography,
                "geography column is not mapped".to_string(),
            ));
        }
        for synthesized in [ID_COLUMN, PERIOD_ID_COLUMN, GEOGRAPHY_ID_COLUMN] {
            if typed[synthesized] != SemanticType::String {
                return Err(invalid(synthesized, "must be typed as string".to_string()));
            }
        }
        for synthesized in [CREATED_AT_COLUMN, UPDATED_AT_COLUMN] {
            if typed[synthesized] != SemanticType::Timestamp {
                return Err(invalid(synthesized, "must be typed as timestamp".to_string()));
            }
        }

        let mut seen = HashSet::new();
        for (column, decoding) in self.decoding.entries() {
            if !seen.insert(column) {
                return Err(invalid(column, "listed under more than one decoding rule".to_string()));
            }
            if !mapped.contains(column) {
                return Err(invalid(
                    column,
                    format!("{} rule targets an unmapped column", decoding.as_str()),
                ));
            }
            match typed.get(column) {
                Some(ty) if decoding.accepts(*ty) => {}
                Some(ty) => {
                    return Err(invalid(
                        column,
                        format!("{} rule cannot produce type {ty}", decoding.as_str()),
                    ));
                }
                None => {
                    return Err(invalid(
                        column,
                        format!("{} rule targets an untyped column", decoding.as_str()),
                    ));
                }
            }
        }
        Ok(())
    }
}
