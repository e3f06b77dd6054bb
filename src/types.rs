//! Shipment record types shared by the readers, reconciler and renderer

use std::collections::BTreeMap;
use std::fmt;

/// Values accepted as "true" by boolean-like text columns (compared case-insensitively)
pub const TRUTHY_VALUES: &[&str] = &["true", "yes", "1", "y"];

/// Interpret a free-form flag cell
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    TRUTHY_VALUES.iter().any(|t| t.eq_ignore_ascii_case(value))
}

/// Known shipment fields, in canonical sheet column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    ShipmentId,
    ShipmentDate,
    Status,
    Description,
    FarmName,
    Origin,
    Destination,
    Buyer,
    CargoSize,
    CacaoQuantity,
    FinancingAmount,
    InterestRate,
    TotalCost,
    SalesRevenue,
    NetProfit,
    InvoiceUrl,
    BillOfLadingUrl,
    CertificateOfOriginUrl,
    PhytosanitaryUrl,
    ContractUrl,
    LedgerUrl,
    GoogleMapUrl,
    Latitude,
    Longitude,
    IsCacaoShipment,
    Serialized,
}

impl Field {
    pub const ALL: [Field; 26] = [
        Field::ShipmentId,
        Field::ShipmentDate,
        Field::Status,
        Field::Description,
        Field::FarmName,
        Field::Origin,
        Field::Destination,
        Field::Buyer,
        Field::CargoSize,
        Field::CacaoQuantity,
        Field::FinancingAmount,
        Field::InterestRate,
        Field::TotalCost,
        Field::SalesRevenue,
        Field::NetProfit,
        Field::InvoiceUrl,
        Field::BillOfLadingUrl,
        Field::CertificateOfOriginUrl,
        Field::PhytosanitaryUrl,
        Field::ContractUrl,
        Field::LedgerUrl,
        Field::GoogleMapUrl,
        Field::Latitude,
        Field::Longitude,
        Field::IsCacaoShipment,
        Field::Serialized,
    ];

    /// Document link fields, in display order
    pub const DOCUMENTS: [Field; 6] = [
        Field::InvoiceUrl,
        Field::BillOfLadingUrl,
        Field::CertificateOfOriginUrl,
        Field::PhytosanitaryUrl,
        Field::ContractUrl,
        Field::LedgerUrl,
    ];

    /// Exact spreadsheet header (case-sensitive)
    pub fn sheet_header(&self) -> &'static str {
        match self {
            Field::ShipmentId => "Shipment ID",
            Field::ShipmentDate => "Shipment Date",
            Field::Status => "Status",
            Field::Description => "Description",
            Field::FarmName => "Farm Name",
            Field::Origin => "Origin",
            Field::Destination => "Destination",
            Field::Buyer => "Buyer",
            Field::CargoSize => "Cargo Size (kg)",
            Field::CacaoQuantity => "Cacao Quantity (kg)",
            Field::FinancingAmount => "Financing Amount",
            Field::InterestRate => "Interest Rate",
            Field::TotalCost => "Total Cost",
            Field::SalesRevenue => "Sales Revenue",
            Field::NetProfit => "Net Profit",
            Field::InvoiceUrl => "Invoice URL",
            Field::BillOfLadingUrl => "Bill of Lading URL",
            Field::CertificateOfOriginUrl => "Certificate of Origin URL",
            Field::PhytosanitaryUrl => "Phytosanitary Certificate URL",
            Field::ContractUrl => "Contract URL",
            Field::LedgerUrl => "Ledger URL",
            Field::GoogleMapUrl => "Google Map URL",
            Field::Latitude => "Latitude",
            Field::Longitude => "Longitude",
            Field::IsCacaoShipment => "Is Cacao Shipment",
            Field::Serialized => "Serialized",
        }
    }

    /// Column name used in CSV exports
    pub fn csv_column(&self) -> &'static str {
        match self {
            Field::ShipmentId => "shipment_contract_number",
            Field::ShipmentDate => "shipment_date",
            Field::Status => "status",
            Field::Description => "description",
            Field::FarmName => "farm_name",
            Field::Origin => "origin",
            Field::Destination => "destination",
            Field::Buyer => "buyer",
            Field::CargoSize => "cargo_size",
            Field::CacaoQuantity => "cacao_kg",
            Field::FinancingAmount => "financing_amount",
            Field::InterestRate => "interest_rate",
            Field::TotalCost => "total_cost",
            Field::SalesRevenue => "sales_revenue",
            Field::NetProfit => "net_profit",
            Field::InvoiceUrl => "invoice_url",
            Field::BillOfLadingUrl => "bill_of_lading_url",
            Field::CertificateOfOriginUrl => "certificate_of_origin_url",
            Field::PhytosanitaryUrl => "phytosanitary_url",
            Field::ContractUrl => "contract_url",
            Field::LedgerUrl => "ledger_url",
            Field::GoogleMapUrl => "google_map_url",
            Field::Latitude => "latitude",
            Field::Longitude => "longitude",
            Field::IsCacaoShipment => "is_cacao_shipment",
            Field::Serialized => "serialized",
        }
    }

    fn csv_aliases(&self) -> &'static [&'static str] {
        match self {
            Field::ShipmentId => &["shipment_id", "shipment_number", "contract_number"],
            Field::ShipmentDate => &["date"],
            Field::CacaoQuantity => &["cacao_quantity", "cacao_quantity_kg"],
            Field::SalesRevenue => &["revenue"],
            Field::GoogleMapUrl => &["map_url", "google_maps_url"],
            Field::Latitude => &["lat"],
            Field::Longitude => &["lng", "lon"],
            Field::Serialized => &["is_serialized"],
            _ => &[],
        }
    }

    /// Resolve a CSV column name (case-insensitive, also accepts the sheet header)
    pub fn from_csv_column(column: &str) -> Option<Field> {
        let column = column.trim();
        let normalized = column.to_lowercase().replace([' ', '-'], "_");
        Field::ALL.iter().copied().find(|field| {
            field.csv_column() == normalized
                || field.csv_aliases().contains(&normalized.as_str())
                || field.sheet_header() == column
        })
    }

    /// Fields where the base source is considered the curated one
    pub fn is_location(&self) -> bool {
        matches!(
            self,
            Field::GoogleMapUrl | Field::Latitude | Field::Longitude
        )
    }

    /// Display label for document links
    pub fn document_label(&self) -> &'static str {
        match self {
            Field::InvoiceUrl => "Invoice",
            Field::BillOfLadingUrl => "Bill of Lading",
            Field::CertificateOfOriginUrl => "Certificate of Origin",
            Field::PhytosanitaryUrl => "Phytosanitary Certificate",
            Field::ContractUrl => "Contract",
            Field::LedgerUrl => "Ledger",
            other => other.sheet_header(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sheet_header())
    }
}

/// Latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Which page family a record renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFamily {
    CacaoShipment,
    Serialized,
}

impl OutputFamily {
    pub fn flag_field(&self) -> Field {
        match self {
            OutputFamily::CacaoShipment => Field::IsCacaoShipment,
            OutputFamily::Serialized => Field::Serialized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFamily::CacaoShipment => "cacao shipment",
            OutputFamily::Serialized => "serialized",
        }
    }
}

/// A single shipment, keyed by its identifier
///
/// Only non-empty values are stored, so a missing key always means "no value".
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentRecord {
    pub id: String,
    values: BTreeMap<Field, String>,
    pub coordinates: Option<Coordinates>,
    pub image_path: Option<String>,
}

impl ShipmentRecord {
    pub fn new(id: &str) -> Self {
        let id = id.trim().to_string();
        let mut values = BTreeMap::new();
        values.insert(Field::ShipmentId, id.clone());
        Self {
            id,
            values,
            coordinates: None,
            image_path: None,
        }
    }

    /// Upper-cased identifier used to match records across sources
    pub fn key(&self) -> String {
        record_key(&self.id)
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    /// Store a value; empty (after trimming) values clear the field
    pub fn set(&mut self, field: Field, value: &str) {
        if field == Field::ShipmentId {
            return;
        }
        let value = value.trim();
        if value.is_empty() {
            self.values.remove(&field);
        } else {
            self.values.insert(field, value.to_string());
        }
    }

    #[cfg(test)]
    pub fn with(mut self, field: Field, value: &str) -> Self {
        self.set(field, value);
        self
    }

    /// Fields that currently hold a value
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.values.keys().copied()
    }

    pub fn flag(&self, field: Field) -> bool {
        self.get(field).map(is_truthy).unwrap_or(false)
    }

    /// Families whose flag is truthy; the two flags are independent
    pub fn output_families(&self) -> Vec<OutputFamily> {
        [OutputFamily::CacaoShipment, OutputFamily::Serialized]
            .into_iter()
            .filter(|family| self.flag(family.flag_field()))
            .collect()
    }

    /// Value as it should appear in the spreadsheet, falling back to derived coordinates
    pub fn sheet_value(&self, field: Field) -> Option<String> {
        if let Some(value) = self.get(field) {
            return Some(value.to_string());
        }
        match (field, self.coordinates) {
            (Field::Latitude, Some(c)) => Some(c.lat.to_string()),
            (Field::Longitude, Some(c)) => Some(c.lng.to_string()),
            _ => None,
        }
    }
}

pub fn record_key(id: &str) -> String {
    id.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        for value in ["true", "TRUE", "Yes", "1", "y", "Y", " yes "] {
            assert!(is_truthy(value), "{value:?} should be truthy");
        }
        for value in ["", "false", "no", "0", "n", "on", "truthy"] {
            assert!(!is_truthy(value), "{value:?} should be falsy");
        }
    }

    #[test]
    fn test_field_column_lookup() {
        assert_eq!(
            Field::from_csv_column("shipment_contract_number"),
            Some(Field::ShipmentId)
        );
        assert_eq!(Field::from_csv_column("Is Cacao Shipment"), Some(Field::IsCacaoShipment));
        assert_eq!(Field::from_csv_column("Google_Map_URL"), Some(Field::GoogleMapUrl));
        assert_eq!(Field::from_csv_column("is_serialized"), Some(Field::Serialized));
        assert_eq!(Field::from_csv_column("favourite_colour"), None);
    }

    #[test]
    fn test_set_empty_clears() {
        let mut record = ShipmentRecord::new("AGL1").with(Field::Status, "Delivered");
        assert_eq!(record.get(Field::Status), Some("Delivered"));
        record.set(Field::Status, "   ");
        assert_eq!(record.get(Field::Status), None);
    }

    #[test]
    fn test_output_families_independent() {
        let both = ShipmentRecord::new("AGL1")
            .with(Field::IsCacaoShipment, "yes")
            .with(Field::Serialized, "TRUE");
        assert_eq!(
            both.output_families(),
            vec![OutputFamily::CacaoShipment, OutputFamily::Serialized]
        );

        let neither = ShipmentRecord::new("AGL2").with(Field::Serialized, "no");
        assert!(neither.output_families().is_empty());

        let mixed_case = ShipmentRecord::new("AGL3").with(Field::Serialized, "Y");
        assert_eq!(mixed_case.output_families(), vec![OutputFamily::Serialized]);
    }

    #[test]
    fn test_sheet_value_uses_derived_coordinates() {
        let mut record = ShipmentRecord::new("AGL8");
        record.coordinates = Some(Coordinates::new(-3.39, -51.85));
        assert_eq!(record.sheet_value(Field::Latitude).as_deref(), Some("-3.39"));
        assert_eq!(record.sheet_value(Field::Longitude).as_deref(), Some("-51.85"));
        assert_eq!(record.sheet_value(Field::Status), None);
    }
}
