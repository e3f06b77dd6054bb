//! Static page generation for shipment records

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::csv_source;
use crate::reconcile::reconcile;
use crate::sheets::{GoogleSheets, SheetStore};
use crate::types::{Field, OutputFamily, ShipmentRecord};
use crate::utils::osc8_file_link;

const PAGE_FILE: &str = "index.html";

static CACAO_TEMPLATE: Template = Template {
    name: "cacao_shipment",
    source: include_str!("../templates/cacao_shipment.html"),
};

static SERIALIZED_TEMPLATE: Template = Template {
    name: "serialized",
    source: include_str!("../templates/serialized.html"),
};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap());

// Debris left in descriptions by the site builder's rich-text editor.
// An unclosed tag only takes its own attr=value pairs on the same line.
static LINK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<link\b(?:[ \t]+[\w:-]+[ \t]*=[ \t]*(?:"[^"\n<>]*"?|'[^'\n<>]*'?|[^\s"'<>]+))*[ \t]*/?>?"#,
    )
    .unwrap()
});
static FONT_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:https?:)?//fonts\.(?:googleapis|gstatic)\.com/[^\s"'<>]*"#).unwrap()
});
static FONT_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)[^\s"'<>]*family=[^\s"'<>]*display=swap[^\s"'<>]*["']?"#).unwrap()
});
static EMPTY_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhref\s*=\s*["']\s*["']"#).unwrap());
static STYLESHEET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\brel\s*=\s*["']?stylesheet["']?\s*/?>?"#).unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").unwrap());

/// HTML page with `{{name}}` insertion points
pub struct Template {
    name: &'static str,
    source: &'static str,
}

impl Template {
    /// Substitute values; placeholders without a value are removed
    pub fn render(&self, values: &HashMap<&str, String>) -> String {
        PLACEHOLDER_RE
            .replace_all(self.source, |caps: &regex::Captures| {
                let key = &caps[1];
                match values.get(key) {
                    Some(value) => value.clone(),
                    None => {
                        debug!("Template {} has no value for '{}'", self.name, key);
                        String::new()
                    }
                }
            })
            .into_owned()
    }
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Remove stray stylesheet links and font-service fragments.
///
/// These must be stripped, not escaped, or they show up as visible text.
pub fn strip_link_debris(s: &str) -> String {
    let s = LINK_TAG_RE.replace_all(s, "");
    let s = FONT_URL_RE.replace_all(&s, "");
    let s = FONT_PARAM_RE.replace_all(&s, "");
    let s = EMPTY_HREF_RE.replace_all(&s, "");
    let s = STYLESHEET_RE.replace_all(&s, "");
    SPACES_RE.replace_all(&s, " ").trim().to_string()
}

/// Text safe for any attribute or body position
pub fn safe_text(s: &str) -> String {
    html_escape(&strip_link_debris(s))
}

/// Paragraphs on blank lines, `<br>` on single newlines
pub fn description_html(text: &str) -> String {
    let text = strip_link_debris(&text.replace("\r\n", "\n"));
    PARAGRAPH_RE
        .split(&text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.lines().map(|l| html_escape(l.trim())).collect();
            format!("<p>{}</p>", lines.join("<br>\n"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Thousands separators for numeric amounts; anything else is shown as written
pub fn format_amount(raw: &str) -> String {
    let raw = raw.trim();
    let (prefix, number) = match raw.strip_prefix('$') {
        Some(rest) => ("$", rest.trim()),
        None => ("", raw),
    };
    let cleaned: String = number.chars().filter(|c| *c != ',').collect();
    let Ok(value) = cleaned.parse::<f64>() else {
        return raw.to_string();
    };
    if !value.is_finite() {
        return raw.to_string();
    }

    let negative = value < 0.0;
    let abs = value.abs();
    let formatted = if abs.fract() == 0.0 {
        format!("{:.0}", abs)
    } else {
        format!("{:.2}", abs)
    };
    let (whole, frac) = match formatted.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if let Some(frac) = frac {
        grouped.push('.');
        grouped.push_str(frac);
    }

    format!("{}{}{}", if negative { "-" } else { "" }, prefix, grouped)
}

/// Show known date layouts as "March 5, 2024"
pub fn format_date(raw: &str) -> String {
    let raw = raw.trim();
    ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|date| date.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Lower-cased identifier as a single directory name, `None` when it could escape the root
fn page_dir_name(record: &ShipmentRecord) -> Option<String> {
    let name = record.id.trim().to_lowercase();
    let unsafe_name = name.is_empty()
        || name.contains(['/', '\\', ':'])
        || name.contains("..")
        || name.starts_with('.');
    (!unsafe_name).then_some(name)
}

fn meta_row(label: &str, value: &str) -> String {
    format!(
        r#"<span class="shipment-meta-label">{}</span><span>{}</span>"#,
        label, value
    )
}

fn details_html(record: &ShipmentRecord, fields: &[Field]) -> String {
    fields
        .iter()
        .filter_map(|field| {
            let value = record.get(*field)?;
            let shown = match field {
                Field::ShipmentDate => safe_text(&format_date(value)),
                Field::CargoSize | Field::CacaoQuantity => safe_text(&format_amount(value)),
                _ => safe_text(value),
            };
            Some(meta_row(field.sheet_header(), &shown))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Photo element, omitted when the file is not on disk
fn image_html(record: &ShipmentRecord, config: &Config) -> String {
    let Some(path) = &record.image_path else {
        return String::new();
    };
    if !config.site_root.join(path).is_file() {
        warn!("Image {} not found for {}, omitting", path, record.id);
        return String::new();
    }
    format!(
        r#"<div class="shipment-image"><img src="/{}" alt="Shipment {}"></div>"#,
        html_escape(path),
        safe_text(&record.id)
    )
}

fn map_html(record: &ShipmentRecord) -> String {
    let url = record.get(Field::GoogleMapUrl);
    if url.is_none() && record.coordinates.is_none() {
        return String::new();
    }

    let mut html = String::from(r#"<section class="shipment-map"><h2>Origin</h2>"#);
    if let Some(coords) = record.coordinates {
        let embed = format!(
            "https://maps.google.com/maps?q={},{}&z=8&output=embed",
            coords.lat, coords.lng
        );
        html.push_str(&format!(
            r#"<iframe src="{}" width="100%" height="360" style="border:0" loading="lazy" title="Map of shipment {}"></iframe>"#,
            html_escape(&embed),
            safe_text(&record.id)
        ));
    }
    if let Some(url) = url {
        html.push_str(&format!(
            r#"<p><a href="{}" target="_blank" rel="noopener">View on Google Maps</a></p>"#,
            safe_text(url)
        ));
    }
    html.push_str("</section>");
    html
}

fn financing_html(record: &ShipmentRecord) -> String {
    if record.get(Field::FinancingAmount).is_none() {
        return String::new();
    }
    let rows: Vec<String> = [
        Field::FinancingAmount,
        Field::InterestRate,
        Field::TotalCost,
        Field::SalesRevenue,
        Field::NetProfit,
    ]
    .iter()
    .filter_map(|field| {
        let value = record.get(*field)?;
        let shown = match field {
            Field::InterestRate => value.to_string(),
            _ => format_amount(value),
        };
        Some(meta_row(field.sheet_header(), &safe_text(&shown)))
    })
    .collect();

    format!(
        r#"<section class="shipment-financing"><h2>Financing</h2><div class="shipment-meta-grid">{}</div></section>"#,
        rows.join("")
    )
}

fn documents_html(record: &ShipmentRecord) -> String {
    let items: Vec<String> = Field::DOCUMENTS
        .iter()
        .filter_map(|field| {
            let url = record.get(*field)?;
            Some(format!(
                r#"<li><a href="{}" target="_blank" rel="noopener">{}</a></li>"#,
                safe_text(url),
                field.document_label()
            ))
        })
        .collect();
    if items.is_empty() {
        return String::new();
    }
    format!(
        r#"<section class="shipment-documents"><h2>Documents</h2><ul>{}</ul></section>"#,
        items.join("")
    )
}

fn summary_text(record: &ShipmentRecord) -> String {
    let description = record
        .get(Field::Description)
        .map(strip_link_debris)
        .unwrap_or_default();
    let first_line = description.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        html_escape(&format!("Shipment {}", record.id))
    } else {
        html_escape(first_line)
    }
}

fn common_values(record: &ShipmentRecord, config: &Config) -> HashMap<&'static str, String> {
    let mut values = HashMap::new();
    values.insert("id", safe_text(&record.id));
    values.insert("summary", summary_text(record));
    values.insert("image", image_html(record, config));
    values.insert(
        "description",
        record
            .get(Field::Description)
            .map(description_html)
            .unwrap_or_default(),
    );
    values
}

pub fn render_cacao_page(record: &ShipmentRecord, config: &Config) -> String {
    let mut values = common_values(record, config);
    values.insert("title", format!("Shipment {}", safe_text(&record.id)));
    values.insert("family_dir", html_escape(&config.cacao_output_dir));
    values.insert(
        "details",
        details_html(
            record,
            &[
                Field::ShipmentDate,
                Field::Status,
                Field::FarmName,
                Field::Origin,
                Field::Destination,
                Field::Buyer,
                Field::CargoSize,
                Field::CacaoQuantity,
            ],
        ),
    );
    values.insert("map", map_html(record));
    values.insert("financing", financing_html(record));
    values.insert("documents", documents_html(record));
    if let Some(dir) = page_dir_name(record).filter(|_| record.flag(Field::Serialized)) {
        values.insert(
            "serialized_link",
            format!(
                r#"<p class="shipment-link"><a href="/{}/{}/">View serialized lot</a></p>"#,
                html_escape(&config.serialized_output_dir),
                html_escape(&dir)
            ),
        );
    }
    CACAO_TEMPLATE.render(&values)
}

pub fn render_serialized_page(record: &ShipmentRecord, config: &Config) -> String {
    let mut values = common_values(record, config);
    values.insert("title", format!("Lot {}", safe_text(&record.id)));
    values.insert(
        "details",
        details_html(
            record,
            &[
                Field::ShipmentDate,
                Field::FarmName,
                Field::Origin,
                Field::CacaoQuantity,
            ],
        ),
    );
    if let Some(dir) = page_dir_name(record).filter(|_| record.flag(Field::IsCacaoShipment)) {
        values.insert(
            "shipment_link",
            format!(
                r#"<p class="shipment-link"><a href="/{}/{}/">View shipment details</a></p>"#,
                html_escape(&config.cacao_output_dir),
                html_escape(&dir)
            ),
        );
    }
    SERIALIZED_TEMPLATE.render(&values)
}

/// Write `<root>/<lowercase id>/index.html`, replacing any previous page
pub fn write_page(root: &Path, record: &ShipmentRecord, html: &str) -> Result<PathBuf> {
    let Some(dir) = page_dir_name(record) else {
        bail!("Shipment identifier '{}' is not a valid page directory", record.id);
    };
    let page_dir = root.join(dir);
    fs::create_dir_all(&page_dir)
        .with_context(|| format!("Failed to create {}", page_dir.display()))?;
    let page_path = page_dir.join(PAGE_FILE);
    fs::write(&page_path, html)
        .with_context(|| format!("Failed to write {}", page_path.display()))?;
    Ok(page_path)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateSummary {
    pub cacao: usize,
    pub serialized: usize,
    pub skipped: usize,
}

/// Route every record to its page families and write the pages
pub fn generate_pages(records: &[ShipmentRecord], config: &Config) -> Result<GenerateSummary> {
    let mut summary = GenerateSummary::default();

    for record in records {
        let families = record.output_families();
        if families.is_empty() {
            debug!("{} is neither a cacao shipment nor serialized, skipping", record.id);
            summary.skipped += 1;
            continue;
        }
        if page_dir_name(record).is_none() {
            warn!(
                "Shipment identifier '{}' cannot be used as a page directory, skipping",
                record.id
            );
            summary.skipped += 1;
            continue;
        }

        for family in families {
            let html = match family {
                OutputFamily::CacaoShipment => render_cacao_page(record, config),
                OutputFamily::Serialized => render_serialized_page(record, config),
            };
            let path = write_page(&config.output_root(family), record, &html)?;
            debug!("Wrote {} page {}", family.as_str(), path.display());
            match family {
                OutputFamily::CacaoShipment => summary.cacao += 1,
                OutputFamily::Serialized => summary.serialized += 1,
            }
        }
    }

    Ok(summary)
}

/// Base records come from a CSV export when given, otherwise from the spreadsheet
fn load_base(config: &Config, base: Option<&Path>) -> Result<Vec<ShipmentRecord>> {
    match base {
        Some(path) => csv_source::load_records(path),
        None => {
            let sheets = GoogleSheets::connect(config)?;
            let records = sheets.read_table()?.records()?;
            info!("Loaded {} records from '{}'", records.len(), config.sheet_name);
            Ok(records)
        }
    }
}

pub fn run_generate(config: &Config, base: Option<&Path>, incoming: Option<&Path>) -> Result<()> {
    println!("Loading shipments...");
    let base_records = load_base(config, base)?;
    let incoming_records = match incoming {
        Some(path) => csv_source::load_records(path)?,
        None => Vec::new(),
    };

    let records = reconcile(&base_records, &incoming_records, config);
    println!("Reconciled {} shipments", records.len());

    println!("Generating pages...");
    let summary = generate_pages(&records, config)?;

    println!(
        "Done! Generated {} cacao shipment pages in {} and {} serialized pages in {} ({} records skipped)",
        summary.cacao,
        osc8_file_link(&config.output_root(OutputFamily::CacaoShipment)),
        summary.serialized,
        osc8_file_link(&config.output_root(OutputFamily::Serialized)),
        summary.skipped
    );
    Ok(())
}
