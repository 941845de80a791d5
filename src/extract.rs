//! Batch extraction of raw source rows.
//!
//! [`extract`] opens a source (local path, `file://` or `http(s)://`), reads its
//! header and returns a lazy [`RawBatches`] iterator. Rows are pulled from the
//! transcoding reader on demand, at most `batch_size` at a time.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use chrono::{Datelike, NaiveDate};
use log::debug;
use regex::Regex;

use crate::{
    descriptor::SourceFormat,
    error::ExtractionError,
    io_utils::{SourceReader, delimiter_byte, open_source_reader, resolve_encoding},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    File(PathBuf),
    Http(String),
}

impl SourceLocator {
    pub fn parse(locator: &str) -> Result<Self, ExtractionError> {
        let trimmed = locator.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Ok(SourceLocator::Http(trimmed.to_string()))
        } else if let Some(path) = trimmed.strip_prefix("file://") {
            Ok(SourceLocator::File(PathBuf::from(path)))
        } else if trimmed.contains("://") {
            Err(ExtractionError::UnsupportedScheme {
                locator: trimmed.to_string(),
            })
        } else {
            Ok(SourceLocator::File(PathBuf::from(trimmed)))
        }
    }

    /// Joins a rendered file name onto a source root of any supported kind.
    pub fn resolve(root: &str, file_name: &str) -> Result<Self, ExtractionError> {
        match Self::parse(root)? {
            SourceLocator::File(dir) => Ok(SourceLocator::File(dir.join(file_name))),
            SourceLocator::Http(base) => Ok(SourceLocator::Http(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                file_name
            ))),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::File(path) => write!(f, "{}", path.display()),
            SourceLocator::Http(url) => f.write_str(url),
        }
    }
}

/// Values available to file-name templates for one capture.
#[derive(Debug, Clone, Default)]
pub struct TemplateParams(BTreeMap<String, String>);

impl TemplateParams {
    pub fn for_capture(uf_sigla: &str, period_start: NaiveDate) -> Self {
        let mut params = BTreeMap::new();
        params.insert("uf_sigla".to_string(), uf_sigla.trim().to_uppercase());
        params.insert("yymm".to_string(), period_start.format("%y%m").to_string());
        params.insert("yyyymm".to_string(), period_start.format("%Y%m").to_string());
        params.insert("yyyy".to_string(), format!("{:04}", period_start.year()));
        params.insert("mm".to_string(), format!("{:02}", period_start.month()));
        TemplateParams(params)
    }

    /// Later values override the capture defaults.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"))
}

pub fn render_template(template: &str, params: &TemplateParams) -> Result<String, ExtractionError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for captures in placeholder_pattern().captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = params
            .get(name.as_str())
            .ok_or_else(|| ExtractionError::Template {
                template: template.to_string(),
                placeholder: name.as_str().to_string(),
            })?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(value);
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// One bounded slice of source rows. Header names are kept exactly as read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct RawBatches {
    reader: SourceReader<Box<dyn Read>>,
    headers: Vec<String>,
    locator: String,
    batch_size: usize,
    records_read: u64,
    finished: bool,
}

impl RawBatches {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

impl Iterator for RawBatches {
    type Item = Result<RawBatch, ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut rows = Vec::with_capacity(self.batch_size.min(16_384));
        let mut record = csv::StringRecord::new();
        while rows.len() < self.batch_size {
            match self.reader.read_record(&mut record) {
                Ok(true) => {
                    self.records_read += 1;
                    rows.push(record.iter().map(str::to_string).collect());
                }
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(source) => {
                    self.finished = true;
                    return Some(Err(ExtractionError::Decode {
                        locator: self.locator.clone(),
                        record: self.records_read + 1,
                        source,
                    }));
                }
            }
        }
        if rows.is_empty() {
            return None;
        }
        debug!("Read batch of {} row(s) from {}", rows.len(), self.locator);
        Some(Ok(RawBatch::new(self.headers.clone(), rows)))
    }
}

fn open_stream(locator: &SourceLocator) -> Result<Box<dyn Read>, ExtractionError> {
    match locator {
        SourceLocator::File(path) => open_file(path),
        SourceLocator::Http(url) => {
            let response = reqwest::blocking::get(url).map_err(|source| ExtractionError::Http {
                url: url.clone(),
                source,
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(ExtractionError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            Ok(Box::new(response))
        }
    }
}

fn open_file(path: &Path) -> Result<Box<dyn Read>, ExtractionError> {
    let file = File::open(path).map_err(|source| ExtractionError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Box::new(BufReader::new(file)))
}

/// Opens `locator` and returns its rows as lazily read batches.
///
/// The header row is read eagerly so a malformed source fails before the first
/// batch is requested. Calling this again re-reads the source from the start.
pub fn extract(
    locator: &SourceLocator,
    format: &SourceFormat,
    batch_size: usize,
) -> Result<RawBatches, ExtractionError> {
    let encoding = resolve_encoding(format.encoding.as_deref())?;
    let delimiter =
        delimiter_byte(format.delimiter).map_err(|_| ExtractionError::Delimiter(format.delimiter))?;
    let stream = open_stream(locator)?;
    let mut reader = open_source_reader(stream, delimiter, encoding);
    let headers = reader
        .headers()
        .map_err(|source| ExtractionError::Header {
            locator: locator.to_string(),
            source,
        })?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    debug!(
        "Opened {} with {} column(s), encoding {}",
        locator,
        headers.len(),
        encoding.name()
    );
    Ok(RawBatches {
        reader,
        headers,
        locator: locator.to_string(),
        batch_size: batch_size.max(1),
        records_read: 0,
        finished: false,
    })
}
