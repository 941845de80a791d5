//! Reader construction for delimited source extracts.
//!
//! Every extract, local or remote, is read through [`open_source_reader`]: the
//! byte stream is transcoded to UTF-8 on the fly by `encoding_rs_io` and handed
//! to a strict `csv` reader, so no payload is ever held in memory whole.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};

use crate::error::ExtractionError;

pub type SourceReader<R> = csv::Reader<DecodeReaderBytes<R, Vec<u8>>>;

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding, ExtractionError> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| ExtractionError::Encoding(value.to_string())),
        None => Ok(UTF_8),
    }
}

pub fn delimiter_byte(delimiter: char) -> Result<u8, String> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(format!("Delimiter '{delimiter}' must be ASCII"))
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            delimiter_byte(first)
        }
    }
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "tab".to_string(),
        other => (other as char).to_string(),
    }
}

pub fn open_source_reader<R>(reader: R, delimiter: u8, encoding: &'static Encoding) -> SourceReader<R>
where
    R: Read,
{
    let decoded = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(reader);
    csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false)
        .from_reader(decoded)
}

pub fn open_file_reader(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<SourceReader<BufReader<File>>, ExtractionError> {
    let file = File::open(path).map_err(|source| ExtractionError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(open_source_reader(BufReader::new(file), delimiter, encoding))
}

/// Header row of a local extract, as written in the file.
pub fn read_header(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Vec<String>, ExtractionError> {
    let mut reader = open_file_reader(path, delimiter, encoding)?;
    let headers = reader
        .headers()
        .map_err(|source| ExtractionError::Header {
            locator: path.display().to_string(),
            source,
        })?;
    Ok(headers.iter().map(str::to_string).collect())
}
