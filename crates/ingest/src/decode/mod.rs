mod delimited;
mod spreadsheet;

use serde_json::Value;
use tabload_core::RawRow;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Corrupt file: content does not match a .{0} file")]
    CorruptSignature(String),
    #[error("Unsupported text encoding: {0}")]
    Encoding(String),
    #[error("CSV parse failed: {0}")]
    Csv(String),
    #[error("Spreadsheet parse failed: {0}")]
    Spreadsheet(String),
}

/// Tabular layouts the importer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Xlsx,
    Xls,
    Ods,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Work out the format of an upload.
///
/// The content signature wins over the file extension: a zip container is a
/// workbook even when named `.csv`. A spreadsheet extension on content with
/// no spreadsheet signature is rejected as corrupt. Anything else must be
/// valid UTF-8 to be treated as CSV; a `.csv`/`.txt` upload that is not gets
/// an encoding error rather than an unsupported-type one.
pub fn detect_format(bytes: &[u8], filename: &str) -> Result<TabularFormat, DecodeError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    if bytes.starts_with(ZIP_MAGIC) {
        return Ok(if ext == "ods" { TabularFormat::Ods } else { TabularFormat::Xlsx });
    }
    if bytes.starts_with(OLE2_MAGIC) {
        return Ok(TabularFormat::Xls);
    }

    if matches!(ext.as_str(), "xlsx" | "xlsm" | "xls" | "ods") {
        return Err(DecodeError::CorruptSignature(ext));
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => Ok(TabularFormat::Csv),
        Err(e) if matches!(ext.as_str(), "csv" | "txt") => Err(DecodeError::Encoding(format!(
            "file is not UTF-8 (invalid byte at offset {}); save it as CSV UTF-8",
            e.valid_up_to()
        ))),
        Err(_) if ext.is_empty() => Err(DecodeError::UnsupportedFormat("unknown".to_string())),
        Err(_) => Err(DecodeError::UnsupportedFormat(ext)),
    }
}

/// Decode an upload into rows, detecting the format first.
pub fn decode(bytes: &[u8], filename: &str) -> Result<Vec<RawRow>, DecodeError> {
    let format = detect_format(bytes, filename)?;
    decode_as(bytes, format)
}

/// Decode with an already-detected format.
pub fn decode_as(bytes: &[u8], format: TabularFormat) -> Result<Vec<RawRow>, DecodeError> {
    let rows = match format {
        TabularFormat::Csv => delimited::decode_csv(bytes)?,
        TabularFormat::Xlsx | TabularFormat::Xls | TabularFormat::Ods => {
            spreadsheet::decode_spreadsheet(bytes)?
        }
    };
    debug!(?format, bytes = bytes.len(), rows = rows.len(), "decoded upload");
    Ok(rows)
}

/// Normalize header cells. Blank headers get a positional name and repeated
/// names get a numeric suffix (`name`, `name_2`), so no column is dropped.
fn header_names<S: AsRef<str>>(cells: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (index, cell) in cells.into_iter().enumerate() {
        let trimmed = cell.as_ref().trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", index + 1)
        } else {
            trimmed.to_string()
        };
        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        names.push(name);
    }
    names
}

/// Zip a data line against the header. Short lines are padded with empty
/// strings; extra cells get positional names.
fn build_row(headers: &[String], cells: impl IntoIterator<Item = Value>) -> RawRow {
    let mut row = RawRow::with_capacity(headers.len());
    let mut cells = cells.into_iter();
    for header in headers {
        let value = cells.next().unwrap_or_else(|| Value::String(String::new()));
        row.insert(header.clone(), value);
    }
    for (offset, extra) in cells.enumerate() {
        row.insert(format!("column_{}", headers.len() + offset + 1), extra);
    }
    row
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
