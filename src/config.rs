//! Pipeline configuration loaded from a CONL file
//!
//! Every key is optional. A missing file yields the defaults below, which
//! match the layout of the truesight.me repository.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::types::{record_key, Field, OutputFamily};

pub const DEFAULT_CONFIG_FILE: &str = "truesight.conl";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Google spreadsheet holding the shipment ledger
    pub spreadsheet_id: Option<String>,
    /// Tab inside the spreadsheet
    pub sheet_name: String,
    /// Service account key file
    pub credentials_path: PathBuf,
    /// Root of the static site checkout
    pub site_root: PathBuf,
    pub cacao_output_dir: String,
    pub serialized_output_dir: String,
    /// Site-relative directory holding shipment photos
    pub image_dir: String,
    pub image_extension: String,
    /// Identifier -> extension for photos that break the naming convention
    pub image_extension_overrides: BTreeMap<String, String>,
    /// Sheet headers the uploader may overwrite even when the cell is filled
    pub always_overwrite: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            sheet_name: "Shipment Ledger Listing".to_string(),
            credentials_path: PathBuf::from("google-service-account.json"),
            site_root: PathBuf::from("."),
            cacao_output_dir: "shipments".to_string(),
            serialized_output_dir: "serialized".to_string(),
            image_dir: "assets/shipments".to_string(),
            image_extension: "jpg".to_string(),
            image_extension_overrides: BTreeMap::from([("AGL4".to_string(), "png".to_string())]),
            always_overwrite: vec![
                Field::Status.sheet_header().to_string(),
                Field::ShipmentDate.sheet_header().to_string(),
            ],
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::from_conl(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        debug!(?config, "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_conl(content: &str) -> Result<Self> {
        let config: Config = serde_conl::from_str(content)?;
        config.always_overwrite_fields()?;
        Ok(config)
    }

    pub fn spreadsheet_id(&self) -> Result<&str, PipelineError> {
        self.spreadsheet_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(PipelineError::MissingConfig {
                key: "spreadsheet_id",
            })
    }

    /// Fail before any work if the service account key is absent
    pub fn ensure_credentials(&self) -> Result<(), PipelineError> {
        if self.credentials_path.is_file() {
            Ok(())
        } else {
            Err(PipelineError::MissingCredentials {
                path: self.credentials_path.clone(),
            })
        }
    }

    pub fn always_overwrite_fields(&self) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        for header in &self.always_overwrite {
            let Some(field) = Field::ALL.iter().find(|f| f.sheet_header() == header) else {
                bail!("Unknown header in always_overwrite: '{}'", header);
            };
            if *field == Field::ShipmentId {
                bail!("The identifier column cannot be overwritten");
            }
            fields.push(*field);
        }
        Ok(fields)
    }

    pub fn output_root(&self, family: OutputFamily) -> PathBuf {
        let dir = match family {
            OutputFamily::CacaoShipment => &self.cacao_output_dir,
            OutputFamily::Serialized => &self.serialized_output_dir,
        };
        self.site_root.join(dir)
    }

    /// Site-relative photo path for a shipment, e.g. `assets/shipments/agl8.jpg`
    pub fn image_path_for(&self, id: &str) -> String {
        let key = record_key(id);
        let extension = self
            .image_extension_overrides
            .iter()
            .find(|(override_id, _)| record_key(override_id) == key)
            .map(|(_, ext)| ext.as_str())
            .unwrap_or(&self.image_extension);
        let file = format!("{}.{}", id.trim().to_lowercase(), extension.trim_start_matches('.'));
        let dir = self.image_dir.trim_matches('/');
        if dir.is_empty() {
            file
        } else {
            format!("{}/{}", dir, file)
        }
    }
}
