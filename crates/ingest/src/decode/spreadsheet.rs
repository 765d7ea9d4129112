use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::Value;
use tabload_core::RawRow;

use super::{build_row, header_names, is_blank, DecodeError};

/// Read the first worksheet of an XLSX/XLS/ODS workbook. The first row is
/// the header.
pub(super) fn decode_spreadsheet(bytes: &[u8]) -> Result<Vec<RawRow>, DecodeError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| DecodeError::Spreadsheet(e.to_string()))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| DecodeError::Spreadsheet(e.to_string()))?,
        None => return Ok(Vec::new()),
    };

    let mut lines = range.rows();
    let headers: Vec<String> = match lines.next() {
        Some(header) => header_names(header.iter().map(|cell| cell.to_string())),
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for line in lines {
        let row = build_row(&headers, line.iter().map(cell_value));
        if row.values().all(is_blank) {
            continue;
        }
        rows.push(row);
    }

    Ok(rows)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::String(String::new()),
        Data::String(s) => Value::String(s.trim().to_string()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        // Dates, durations and error cells keep their display form.
        other => Value::String(other.to_string()),
    }
}
