//! CSV and JSON import/export for frames

use crate::db::{CellValue, ColumnInfo, Frame};
use crate::error::Result;
use std::path::Path;

/// Read a CSV file with a header row. Fields are typed with
/// [`CellValue::parse_literal`].
pub fn read_csv(path: impl AsRef<Path>) -> Result<Frame> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut frame = Frame {
        columns: rdr.headers()?.iter().map(ColumnInfo::new).collect(),
        rows: Vec::new(),
        index: None,
    };
    for record in rdr.records() {
        let record = record?;
        frame.push_row(record.iter().map(CellValue::parse_literal).collect())?;
    }
    Ok(frame)
}

/// Write a frame to a CSV file; NULLs become empty fields
pub fn write_csv(frame: &Frame, path: impl AsRef<Path>) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(frame.column_names())?;
    for row in &frame.rows {
        let record: Vec<String> = row
            .iter()
            .map(|c| if c.is_null() { String::new() } else { c.to_string() })
            .collect();
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Frame as a pretty JSON array of row objects
pub fn to_json(frame: &Frame) -> Result<String> {
    let mut rows: Vec<serde_json::Map<String, serde_json::Value>> = Vec::new();
    for row in &frame.rows {
        let mut obj = serde_json::Map::new();
        for (col, cell) in frame.columns.iter().zip(row) {
            obj.insert(col.name.clone(), cell.to_json());
        }
        rows.push(obj);
    }
    Ok(serde_json::to_string_pretty(&rows)?)
}

/// Write a frame to a JSON file
pub fn write_json(frame: &Frame, path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path, to_json(frame)?)?;
    Ok(())
}
