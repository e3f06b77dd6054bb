//! Google Sheets access
//!
//! The pipeline only needs two operations from the spreadsheet: read the
//! whole ledger tab as a table, and write a batch of single cells. Both go
//! through [`SheetStore`] so the writer can be exercised without a network.

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, SchemaError};
use crate::reconcile::fold_duplicates;
use crate::types::{record_key, Field, ShipmentRecord};

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// A sheet tab as rows of text; row 0 of `rows` is the first row below the header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// Build from raw API values; the first row is the header row
    pub fn from_values(mut values: Vec<Vec<String>>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let headers: Vec<String> = values
            .remove(0)
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        let width = headers.len();
        let rows = values
            .into_iter()
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, String::new());
                }
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn column(&self, field: Field) -> Option<usize> {
        self.headers.iter().position(|h| h == field.sheet_header())
    }

    /// Every known header must be present, spelled exactly
    pub fn validate(&self) -> Result<(), SchemaError> {
        let missing: Vec<String> = Field::ALL
            .iter()
            .filter(|f| self.column(**f).is_none())
            .map(|f| f.sheet_header().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::MissingHeaders(missing))
        }
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Data row holding the given identifier (case-insensitive)
    pub fn find_row(&self, id: &str) -> Option<usize> {
        let column = self.column(Field::ShipmentId)?;
        let key = record_key(id);
        (0..self.rows.len()).find(|&row| record_key(self.cell(row, column)) == key)
    }

    pub fn records(&self) -> Result<Vec<ShipmentRecord>, SchemaError> {
        self.validate()?;
        let columns: Vec<(Field, usize)> = Field::ALL
            .iter()
            .filter_map(|f| self.column(*f).map(|c| (*f, c)))
            .collect();
        let id_column = self.column(Field::ShipmentId).unwrap_or_default();

        let mut records = Vec::with_capacity(self.rows.len());
        for row in 0..self.rows.len() {
            let id = self.cell(row, id_column).trim();
            if id.is_empty() {
                continue;
            }
            let mut record = ShipmentRecord::new(id);
            for (field, column) in &columns {
                record.set(*field, self.cell(row, *column));
            }
            records.push(record);
        }
        Ok(fold_duplicates(records))
    }
}

/// One cell to write, addressed by data row and column index
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub row: usize,
    pub column: usize,
    pub id: String,
    pub field: Field,
    pub previous: String,
    pub value: String,
}

pub trait SheetStore {
    fn read_table(&self) -> Result<SheetTable>;
    fn write_cells(&mut self, writes: &[CellWrite]) -> Result<()>;
}

/// Column index to A1 letters: 0 -> A, 25 -> Z, 26 -> AA
pub fn column_letter(column: usize) -> String {
    let mut letters = Vec::new();
    let mut n = column + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

fn quote_sheet(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

/// A1 reference for a data cell; data row 0 sits on sheet row 2
pub fn a1_cell(sheet: &str, row: usize, column: usize) -> String {
    format!("{}!{}{}", quote_sheet(sheet), column_letter(column), row + 2)
}

// Service account and API payloads
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct BatchUpdateRequest {
    #[serde(rename = "valueInputOption")]
    value_input_option: &'static str,
    data: Vec<ValueRangeWrite>,
}

#[derive(Debug, Serialize)]
struct ValueRangeWrite {
    range: String,
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(rename = "totalUpdatedCells", default)]
    total_updated_cells: usize,
}

/// Values are stored as typed so Sheets never evaluates formulas or converts
/// dates, and the formatted value read back matches what was written
fn batch_request(sheet: &str, writes: &[CellWrite]) -> BatchUpdateRequest {
    BatchUpdateRequest {
        value_input_option: "RAW",
        data: writes
            .iter()
            .map(|w| ValueRangeWrite {
                range: a1_cell(sheet, w.row, w.column),
                values: vec![vec![w.value.clone()]],
            })
            .collect(),
    }
}

/// Live spreadsheet client authenticated with a service account
pub struct GoogleSheets {
    client: reqwest::blocking::Client,
    access_token: String,
    spreadsheet_id: String,
    sheet_name: String,
}

impl GoogleSheets {
    /// Authenticate and check that the configured tab exists
    pub fn connect(config: &Config) -> Result<Self> {
        config.ensure_credentials()?;
        let spreadsheet_id = config.spreadsheet_id()?.to_string();

        let client = reqwest::blocking::Client::builder()
            .user_agent("truesight-pages/0.1")
            .build()?;

        let key_json = fs::read_to_string(&config.credentials_path).with_context(|| {
            format!("Failed to read credentials: {}", config.credentials_path.display())
        })?;
        let key: ServiceAccountKey =
            serde_json::from_str(&key_json).context("Failed to parse service account key")?;

        let access_token = fetch_access_token(&client, &key)?;
        info!("Authenticated as {}", key.client_email);

        let sheets = Self {
            client,
            access_token,
            spreadsheet_id,
            sheet_name: config.sheet_name.clone(),
        };
        sheets.ensure_sheet_exists()?;
        Ok(sheets)
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(SHEETS_API_URL)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid Sheets API base URL"))?
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    fn ensure_sheet_exists(&self) -> Result<()> {
        let mut url = self.url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let meta: SpreadsheetMeta = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .context("Failed to fetch spreadsheet metadata")?
            .error_for_status()
            .context("Spreadsheet metadata request failed")?
            .json()
            .context("Failed to parse spreadsheet metadata")?;

        if meta.sheets.iter().any(|s| s.properties.title == self.sheet_name) {
            Ok(())
        } else {
            Err(PipelineError::SheetNotFound {
                spreadsheet_id: self.spreadsheet_id.clone(),
                sheet: self.sheet_name.clone(),
            }
            .into())
        }
    }
}

fn fetch_access_token(
    client: &reqwest::blocking::Client,
    key: &ServiceAccountKey,
) -> Result<String> {
    let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .context("Invalid private key in service account file")?;
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .context("Failed to sign token request")?;

    let response: TokenResponse = client
        .post(token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .context("Failed to contact token endpoint")?
        .error_for_status()
        .context("Token request rejected")?
        .json()
        .context("Failed to parse token response")?;

    Ok(response.access_token)
}

impl SheetStore for GoogleSheets {
    fn read_table(&self) -> Result<SheetTable> {
        let range = quote_sheet(&self.sheet_name);
        let url = self.url(&["values", range.as_str()])?;
        let range: ValueRange = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .context("Failed to fetch sheet values")?
            .error_for_status()
            .context("Sheet values request failed")?
            .json()
            .context("Failed to parse sheet values")?;

        let table = SheetTable::from_values(range.values);
        debug!("Read {} rows from '{}'", table.rows.len(), self.sheet_name);
        Ok(table)
    }

    fn write_cells(&mut self, writes: &[CellWrite]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let request = batch_request(&self.sheet_name, writes);
        let url = self.url(&["values:batchUpdate"])?;
        let response: BatchUpdateResponse = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .context("Failed to send batch update")?
            .error_for_status()
            .context("Batch update rejected")?
            .json()
            .context("Failed to parse batch update response")?;

        if response.total_updated_cells != writes.len() {
            warn!(
                "Sheets reported {} updated cells, expected {}",
                response.total_updated_cells,
                writes.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;

    /// In-memory stand-in for a spreadsheet tab
    #[derive(Debug, Default)]
    pub struct MemorySheet {
        pub table: SheetTable,
        pub batches: usize,
    }

    impl MemorySheet {
        pub fn new(table: SheetTable) -> Self {
            Self { table, batches: 0 }
        }
    }

    impl SheetStore for MemorySheet {
        fn read_table(&self) -> Result<SheetTable> {
            Ok(self.table.clone())
        }

        fn write_cells(&mut self, writes: &[CellWrite]) -> Result<()> {
            self.batches += 1;
            for write in writes {
                let row = self
                    .table
                    .rows
                    .get_mut(write.row)
                    .ok_or_else(|| anyhow!("Row {} out of range", write.row))?;
                if row.len() <= write.column {
                    row.resize(write.column + 1, String::new());
                }
                row[write.column] = write.value.clone();
            }
            Ok(())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_a1_cell() {
        assert_eq!(a1_cell("Ledger", 0, 2), "'Ledger'!C2");
        assert_eq!(a1_cell("Bob's Sheet", 3, 26), "'Bob''s Sheet'!AA5");
    }

    #[test]
    fn test_batch_request_writes_raw_values() {
        let writes = [
            CellWrite {
                row: 0,
                column: 1,
                id: "AGL1".into(),
                field: Field::ShipmentDate,
                previous: String::new(),
                value: "2024-02-01".into(),
            },
            CellWrite {
                row: 4,
                column: 3,
                id: "AGL5".into(),
                field: Field::Description,
                previous: String::new(),
                value: "=IMPORTXML(\"x\")".into(),
            },
        ];
        let json = serde_json::to_value(batch_request("Ledger", &writes)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "valueInputOption": "RAW",
                "data": [
                    { "range": "'Ledger'!B2", "values": [["2024-02-01"]] },
                    { "range": "'Ledger'!D6", "values": [["=IMPORTXML(\"x\")"]] }
                ]
            })
        );
    }

    #[test]
    fn test_from_values_pads_ragged_rows() {
        let table = SheetTable::from_values(vec![
            vec!["Shipment ID".into(), "Status".into()],
            vec!["AGL1".into()],
        ]);
        assert_eq!(table.rows[0], vec!["AGL1".to_string(), String::new()]);
    }

    #[test]
    fn test_validate_reports_missing_headers() {
        let table = SheetTable::from_values(vec![vec!["Shipment ID".into(), "status".into()]]);
        let Err(SchemaError::MissingHeaders(missing)) = table.validate() else {
            panic!("expected missing headers");
        };
        assert!(missing.contains(&"Status".to_string()));
        assert!(!missing.contains(&"Shipment ID".to_string()));
    }

    #[test]
    fn test_records_and_find_row() {
        let table = fixtures::table(&[
            &[("Shipment ID", "AGL1"), ("Status", "Delivered")],
            &[("Shipment ID", ""), ("Status", "orphan")],
            &[("Shipment ID", "AGL13"), ("Serialized", "yes")],
        ]);
        let records = table.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(Field::Status), Some("Delivered"));
        assert!(records[1].flag(Field::Serialized));
        assert_eq!(table.find_row("agl13"), Some(2));
        assert_eq!(table.find_row("AGL99"), None);
    }

    #[test]
    fn test_memory_sheet_writes() {
        let mut sheet = memory::MemorySheet::new(fixtures::table(&[&[("Shipment ID", "AGL1")]]));
        let column = sheet.table.column(Field::Status).unwrap();
        sheet
            .write_cells(&[CellWrite {
                row: 0,
                column,
                id: "AGL1".into(),
                field: Field::Status,
                previous: String::new(),
                value: "Delivered".into(),
            }])
            .unwrap();
        assert_eq!(sheet.table.cell(0, column), "Delivered");
        assert_eq!(sheet.batches, 1);
    }
}
