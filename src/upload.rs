//! Push reconciled shipment data back into the spreadsheet.
//!
//! Cells an operator has already filled are never touched, apart from the
//! configured always-overwrite columns. All writes are computed up front as a
//! [`WritePlan`] and sent in a single batch.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::csv_source;
use crate::reconcile::reconcile;
use crate::sheets::{CellWrite, GoogleSheets, SheetStore, SheetTable};
use crate::types::{Field, ShipmentRecord};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct WritePlan {
    pub writes: Vec<CellWrite>,
    /// Identifiers with no row in the sheet
    pub missing: Vec<String>,
    /// Filled cells left alone because the new value differed
    pub preserved: usize,
}

impl WritePlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Work out which cells to fill.
///
/// A cell is written when it is empty and the record has a value for it.
/// Fields in `always_overwrite` are also written when the cell holds a
/// different value. Empty new values are never written.
pub fn plan_updates(
    table: &SheetTable,
    records: &[ShipmentRecord],
    always_overwrite: &[Field],
) -> WritePlan {
    let mut plan = WritePlan::default();

    for record in records {
        let Some(row) = table.find_row(&record.id) else {
            warn!("Shipment {} not found in sheet, skipping", record.id);
            plan.missing.push(record.id.clone());
            continue;
        };

        for field in Field::ALL {
            if field == Field::ShipmentId {
                continue;
            }
            let Some(column) = table.column(field) else {
                continue;
            };
            let Some(value) = record.sheet_value(field) else {
                continue;
            };

            let existing = table.cell(row, column).trim();
            let write = if existing.is_empty() {
                true
            } else if existing == value {
                false
            } else if always_overwrite.contains(&field) {
                true
            } else {
                debug!(
                    "Keeping {} for {} ('{}' over '{}')",
                    field, record.id, existing, value
                );
                plan.preserved += 1;
                false
            };

            if write {
                plan.writes.push(CellWrite {
                    row,
                    column,
                    id: record.id.clone(),
                    field,
                    previous: existing.to_string(),
                    value,
                });
            }
        }
    }

    plan
}

pub fn apply_plan<S: SheetStore>(store: &mut S, plan: &WritePlan) -> Result<()> {
    if plan.is_empty() {
        info!("Nothing to write");
        return Ok(());
    }
    store.write_cells(&plan.writes)
}

fn print_plan(plan: &WritePlan) {
    for write in &plan.writes {
        if write.previous.is_empty() {
            println!("  {} / {}: {}", write.id, write.field, write.value);
        } else {
            println!(
                "  {} / {}: {} -> {}",
                write.id, write.field, write.previous, write.value
            );
        }
    }
}

/// Reconcile the sheet with a CSV export and fill empty cells
pub fn sync_sheet<S: SheetStore>(
    store: &mut S,
    incoming: &[ShipmentRecord],
    config: &Config,
    dry_run: bool,
) -> Result<WritePlan> {
    let always_overwrite = config.always_overwrite_fields()?;
    let table = store.read_table()?;
    let base = table.records()?;
    let records = reconcile(&base, incoming, config);

    let plan = plan_updates(&table, &records, &always_overwrite);
    if dry_run {
        println!("Dry run, {} cells would be written:", plan.writes.len());
        print_plan(&plan);
    } else {
        apply_plan(store, &plan)?;
    }
    Ok(plan)
}

pub fn run_upload(config: &Config, csv_path: &Path, dry_run: bool) -> Result<()> {
    config.ensure_credentials()?;
    config.spreadsheet_id()?;

    let incoming = csv_source::load_records(csv_path)?;
    println!("Read {} shipments from {}", incoming.len(), csv_path.display());

    let mut sheets = GoogleSheets::connect(config)?;
    let plan = sync_sheet(&mut sheets, &incoming, config, dry_run)?;

    println!(
        "Done! {} {} cells in '{}' ({} filled cells kept, {} shipments not in sheet)",
        if dry_run { "Would write" } else { "Wrote" },
        plan.writes.len(),
        config.sheet_name,
        plan.preserved,
        plan.missing.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::fixtures::table;
    use crate::sheets::memory::MemorySheet;

    #[test]
    fn test_fills_only_empty_cells() {
        let sheet = table(&[&[
            ("Shipment ID", "AGL1"),
            ("Description", "Edited by hand"),
        ]]);
        let records = vec![ShipmentRecord::new("agl1")
            .with(Field::Description, "Feed text")
            .with(Field::Origin, "Pará")];

        let plan = plan_updates(&sheet, &records, &[]);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].field, Field::Origin);
        assert_eq!(plan.writes[0].value, "Pará");
        assert_eq!(plan.preserved, 1);
    }

    #[test]
    fn test_exempt_fields_overwrite() {
        let sheet = table(&[&[
            ("Shipment ID", "AGL1"),
            ("Status", "Pending"),
            ("Shipment Date", "2024-01-01"),
            ("Buyer", "Manual buyer"),
        ]]);
        let records = vec![ShipmentRecord::new("AGL1")
            .with(Field::Status, "Delivered")
            .with(Field::ShipmentDate, "2024-02-01")
            .with(Field::Buyer, "Feed buyer")];

        let mut store = MemorySheet::new(sheet);
        let plan = plan_updates(&store.table, &records, &[Field::Status, Field::ShipmentDate]);
        apply_plan(&mut store, &plan).unwrap();

        let t = &store.table;
        assert_eq!(t.cell(0, t.column(Field::Status).unwrap()), "Delivered");
        assert_eq!(t.cell(0, t.column(Field::ShipmentDate).unwrap()), "2024-02-01");
        assert_eq!(t.cell(0, t.column(Field::Buyer).unwrap()), "Manual buyer");
    }

    #[test]
    fn test_empty_new_value_never_clears() {
        let sheet = table(&[&[("Shipment ID", "AGL1"), ("Status", "Pending")]]);
        let records = vec![ShipmentRecord::new("AGL1")];
        let plan = plan_updates(&sheet, &records, &[Field::Status]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_missing_rows_are_reported() {
        let sheet = table(&[&[("Shipment ID", "AGL1")]]);
        let records = vec![ShipmentRecord::new("AGL2").with(Field::Status, "Sent")];
        let plan = plan_updates(&sheet, &records, &[]);
        assert!(plan.is_empty());
        assert_eq!(plan.missing, vec!["AGL2".to_string()]);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let mut store = MemorySheet::new(table(&[
            &[("Shipment ID", "AGL1"), ("Status", "Pending")],
            &[("Shipment ID", "AGL8")],
        ]));
        let incoming = vec![
            ShipmentRecord::new("AGL1")
                .with(Field::Status, "Delivered")
                .with(Field::Origin, "Bahia"),
            ShipmentRecord::new("AGL8").with(
                Field::GoogleMapUrl,
                "https://www.google.com/maps/data=!3d-3.3922222!4d-51.8525278",
            ),
        ];
        let config = Config::default();

        let first = sync_sheet(&mut store, &incoming, &config, false).unwrap();
        assert!(!first.is_empty());
        assert_eq!(store.batches, 1);

        let t = &store.table;
        assert_eq!(t.cell(0, t.column(Field::Status).unwrap()), "Delivered");
        assert_eq!(t.cell(1, t.column(Field::Latitude).unwrap()), "-3.3922222");
        assert_eq!(t.cell(1, t.column(Field::Longitude).unwrap()), "-51.8525278");

        let second = sync_sheet(&mut store, &incoming, &config, false).unwrap();
        assert!(second.is_empty());
        assert_eq!(store.batches, 1);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let mut store = MemorySheet::new(table(&[&[("Shipment ID", "AGL1")]]));
        let incoming = vec![ShipmentRecord::new("AGL1").with(Field::Origin, "Bahia")];
        let plan = sync_sheet(&mut store, &incoming, &Config::default(), true).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(store.batches, 0);
    }
}
