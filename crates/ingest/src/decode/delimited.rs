use csv::{ReaderBuilder, Trim};
use serde_json::Value;
use tabload_core::RawRow;

use super::{build_row, header_names, is_blank, DecodeError};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub(super) fn decode_csv(bytes: &[u8]) -> Result<Vec<RawRow>, DecodeError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = header_names(reader.headers().map_err(|e| DecodeError::Csv(e.to_string()))?.iter());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DecodeError::Csv(e.to_string()))?;
        let row = build_row(
            &headers,
            record.iter().map(|field| Value::String(field.to_string())),
        );
        if row.values().all(is_blank) {
            continue;
        }
        rows.push(row);
    }

    Ok(rows)
}
