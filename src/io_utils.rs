//! File I/O helpers: encoding resolution and fallback, CSV reader/writer
//! construction, and atomic JSON writes.
//!
//! Scraped exports arrive as UTF-8 with or without a BOM, and occasionally as
//! Latin-1. Decoding tries strict UTF-8 first and falls back to
//! Windows-1252 (a superset of Latin-1) unless an encoding is forced.

use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::Serialize;
use tempfile::NamedTempFile;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn resolve_encoding(label: Option<&str>) -> Result<Option<&'static Encoding>> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .map(Some)
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(None),
    }
}

/// Decode file bytes, returning the text and the encoding that was used.
/// `None` is returned when a forced encoding reports malformed input.
pub fn decode_with_fallback(
    bytes: &[u8],
    forced: Option<&'static Encoding>,
) -> Option<(String, &'static Encoding)> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Some(encoding) = forced {
        let (text, _, had_errors) = encoding.decode(body);
        return (!had_errors).then(|| (text.into_owned(), encoding));
    }
    match std::str::from_utf8(body) {
        Ok(text) => Some((text.to_string(), UTF_8)),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(body);
            Some((text.into_owned(), WINDOWS_1252))
        }
    }
}

/// Lenient reader for scraped data: ragged rows are accepted and sized by
/// the caller.
pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Writer for staged output. Nulls are written as unquoted empty fields so
/// bulk loaders read them back as NULL.
pub fn open_csv_writer(path: &Path, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    let writer: Box<dyn Write> = Box::new(BufWriter::new(file));
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating output directory {parent:?}"))?;
    }
    Ok(())
}

/// Serialize `value` as pretty JSON into a temp file next to `path`, then
/// rename it into place.
pub fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    ensure_parent(path)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Creating temp file in {dir:?}"))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Serializing JSON for {path:?}"))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Syncing temp file for {path:?}"))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("Renaming temp file onto {path:?}"))?;
    Ok(())
}
