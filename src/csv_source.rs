//! CSV export reading and writing
//!
//! Exports from the site builder are loosely formed: quoted fields with
//! embedded newlines, blank separator rows, rows shorter than the header.
//! Reading never fails on row shape; only an unreadable file or a missing
//! identifier column is an error.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::SchemaError;
use crate::reconcile::fold_duplicates;
use crate::types::{Field, ShipmentRecord};

/// One data row: header name -> value, in header order
pub type RawRow = Vec<(String, String)>;

/// Parse CSV text into rows keyed by the first non-empty row
pub fn parse_csv(text: &str) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV record {}", line + 1))?;

        // Blank separator rows are dropped wherever they appear
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let Some(header) = &headers else {
            headers = Some(record.iter().map(|h| h.trim().to_string()).collect());
            continue;
        };

        let row: RawRow = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

pub fn read_csv_file(path: &Path) -> Result<Vec<RawRow>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
    parse_csv(&text)
}

/// Map raw CSV rows onto typed shipment records
pub fn records_from_rows(rows: &[RawRow]) -> Result<Vec<ShipmentRecord>, SchemaError> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let mut columns: HashMap<&str, Field> = HashMap::new();
    for (name, _) in first {
        match Field::from_csv_column(name) {
            Some(field) => {
                columns.insert(name.as_str(), field);
            }
            None => debug!("Ignoring unknown CSV column '{}'", name),
        }
    }

    if !columns.values().any(|f| *f == Field::ShipmentId) {
        return Err(SchemaError::MissingIdentifierColumn(vec![
            Field::ShipmentId.csv_column().to_string(),
            Field::ShipmentId.sheet_header().to_string(),
        ]));
    }

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let id = row
            .iter()
            .find(|(name, _)| columns.get(name.as_str()) == Some(&Field::ShipmentId))
            .map(|(_, value)| value.trim())
            .unwrap_or("");
        if id.is_empty() {
            warn!("Skipping CSV row {} without a shipment identifier", i + 2);
            continue;
        }

        // Alias columns share a field; the first non-empty one wins
        let mut record = ShipmentRecord::new(id);
        for (name, value) in row {
            if let Some(field) = columns.get(name.as_str()) {
                if record.get(*field).is_none() {
                    record.set(*field, value);
                }
            }
        }
        records.push(record);
    }

    Ok(fold_duplicates(records))
}

/// Read and type a CSV export in one step
pub fn load_records(path: &Path) -> Result<Vec<ShipmentRecord>> {
    let rows = read_csv_file(path)?;
    let records = records_from_rows(&rows)
        .with_context(|| format!("Invalid CSV export: {}", path.display()))?;
    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Serialise records with the canonical CSV column names
pub fn write_records<W: std::io::Write>(writer: W, records: &[ShipmentRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(Field::ALL.iter().map(|f| f.csv_column()))?;
    for record in records {
        writer.write_record(
            Field::ALL
                .iter()
                .map(|f| record.sheet_value(*f).unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &Path, records: &[ShipmentRecord]) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    write_records(file, records)
}
