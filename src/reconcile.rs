//! Keyed merge of two shipment sources and derived-field computation

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::config::Config;
use crate::coords::extract_coordinates;
use crate::types::{Coordinates, Field, ShipmentRecord};

/// Merge one record pair field by field.
///
/// The incoming value wins when it is non-empty, except for location fields
/// where the base value wins when it is non-empty. Derived coordinates follow
/// the location rule and the image path follows the regular one, so merging
/// already-derived records keeps them.
pub fn merge_record(base: &ShipmentRecord, incoming: &ShipmentRecord) -> ShipmentRecord {
    let mut merged = ShipmentRecord::new(&base.id);
    merged.coordinates = base.coordinates.or(incoming.coordinates);
    merged.image_path = incoming.image_path.clone().or_else(|| base.image_path.clone());
    let fields: BTreeSet<Field> = base.fields().chain(incoming.fields()).collect();

    for field in fields {
        let (preferred, fallback) = if field.is_location() {
            (base.get(field), incoming.get(field))
        } else {
            (incoming.get(field), base.get(field))
        };
        if let Some(value) = preferred.or(fallback) {
            merged.set(field, value);
        }
    }

    merged
}

/// Merge two record sets keyed by case-insensitive identifier.
///
/// Every identifier from either side appears exactly once. Base order is
/// kept, incoming-only records follow in their own order.
pub fn merge(base: &[ShipmentRecord], incoming: &[ShipmentRecord]) -> Vec<ShipmentRecord> {
    let incoming_by_key: HashMap<String, &ShipmentRecord> =
        incoming.iter().map(|r| (r.key(), r)).collect();

    let mut merged: Vec<ShipmentRecord> = base
        .iter()
        .map(|record| match incoming_by_key.get(&record.key()) {
            Some(newer) => merge_record(record, newer),
            None => record.clone(),
        })
        .collect();

    let base_keys: BTreeSet<String> = base.iter().map(|r| r.key()).collect();
    merged.extend(
        incoming
            .iter()
            .filter(|r| !base_keys.contains(&r.key()))
            .cloned(),
    );

    debug!(
        "Merged {} base and {} incoming records into {}",
        base.len(),
        incoming.len(),
        merged.len()
    );
    merged
}

/// Collapse repeated identifiers within a single source
pub fn fold_duplicates(records: Vec<ShipmentRecord>) -> Vec<ShipmentRecord> {
    let mut folded: Vec<ShipmentRecord> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        match positions.get(&record.key()) {
            Some(&i) => {
                warn!("Duplicate shipment identifier {}, merging rows", record.id);
                folded[i] = merge_record(&folded[i], &record);
            }
            None => {
                positions.insert(record.key(), folded.len());
                folded.push(record);
            }
        }
    }

    folded
}

/// Fill in the image path and coordinates of a merged record
pub fn derive(record: &mut ShipmentRecord, config: &Config) {
    record.image_path = Some(config.image_path_for(&record.id));
    let coordinates = explicit_coordinates(record).or_else(|| {
        let url = record.get(Field::GoogleMapUrl)?;
        let coordinates = extract_coordinates(url);
        if coordinates.is_none() {
            warn!("No coordinates found in map URL for {}", record.id);
        }
        coordinates
    });
    record.coordinates = coordinates;
}

fn explicit_coordinates(record: &ShipmentRecord) -> Option<Coordinates> {
    let (lat, lng) = (record.get(Field::Latitude)?, record.get(Field::Longitude)?);
    match (lat.trim().parse::<f64>(), lng.trim().parse::<f64>()) {
        (Ok(lat), Ok(lng)) if lat.is_finite() && lng.is_finite() => {
            Some(Coordinates::new(lat, lng))
        }
        _ => {
            warn!(
                "Unusable coordinates '{}', '{}' for {}, falling back to map URL",
                lat, lng, record.id
            );
            None
        }
    }
}

/// Merge both sources, then derive fields on the result
pub fn reconcile(
    base: &[ShipmentRecord],
    incoming: &[ShipmentRecord],
    config: &Config,
) -> Vec<ShipmentRecord> {
    let mut records = merge(base, incoming);
    for record in &mut records {
        derive(record, config);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ShipmentRecord> {
        vec![
            ShipmentRecord::new("AGL1")
                .with(Field::Status, "Delivered")
                .with(Field::GoogleMapUrl, "https://maps.google.com/@1,2"),
            ShipmentRecord::new("AGL2").with(Field::Description, "Cacao nibs"),
        ]
    }

    #[test]
    fn test_merge_with_itself_is_identity() {
        let records = sample();
        assert_eq!(merge(&records, &records), records);
    }

    #[test]
    fn test_incoming_fills_empty_base() {
        let base = vec![ShipmentRecord::new("AGL1")];
        let incoming = vec![ShipmentRecord::new("agl1").with(Field::Status, "In transit")];
        let merged = merge(&base, &incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "AGL1");
        assert_eq!(merged[0].get(Field::Status), Some("In transit"));
    }

    #[test]
    fn test_incoming_wins_for_regular_fields() {
        let base = vec![ShipmentRecord::new("AGL1").with(Field::Status, "Pending")];
        let incoming = vec![ShipmentRecord::new("AGL1").with(Field::Status, "Delivered")];
        assert_eq!(merge(&base, &incoming)[0].get(Field::Status), Some("Delivered"));
    }

    #[test]
    fn test_base_wins_for_location_fields() {
        let base = vec![ShipmentRecord::new("AGL1")
            .with(Field::GoogleMapUrl, "https://maps.google.com/curated")
            .with(Field::Latitude, "-3.1")];
        let incoming = vec![ShipmentRecord::new("AGL1")
            .with(Field::GoogleMapUrl, "https://maps.google.com/other")
            .with(Field::Latitude, "9.9")
            .with(Field::Longitude, "-51.2")];
        let merged = &merge(&base, &incoming)[0];
        assert_eq!(merged.get(Field::GoogleMapUrl), Some("https://maps.google.com/curated"));
        assert_eq!(merged.get(Field::Latitude), Some("-3.1"));
        assert_eq!(merged.get(Field::Longitude), Some("-51.2"));
    }

    #[test]
    fn test_merge_is_total() {
        let base = vec![ShipmentRecord::new("AGL1"), ShipmentRecord::new("AGL2")];
        let incoming = vec![ShipmentRecord::new("agl2"), ShipmentRecord::new("AGL3")];
        let ids: Vec<String> = merge(&base, &incoming).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["AGL1", "AGL2", "AGL3"]);
    }

    #[test]
    fn test_fold_duplicates() {
        let records = vec![
            ShipmentRecord::new("AGL1").with(Field::Status, "Pending"),
            ShipmentRecord::new("AGL2"),
            ShipmentRecord::new("agl1").with(Field::Origin, "Pará"),
        ];
        let folded = fold_duplicates(records);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].get(Field::Status), Some("Pending"));
        assert_eq!(folded[0].get(Field::Origin), Some("Pará"));
    }

    #[test]
    fn test_derive_from_map_url() {
        let mut record = ShipmentRecord::new("AGL8").with(
            Field::GoogleMapUrl,
            "https://www.google.com/maps/place/Brazil/@-1.0,-50.0,8z/data=!4m2!3d-3.3922222!4d-51.8525278",
        );
        derive(&mut record, &Config::default());
        assert_eq!(record.coordinates, Some(Coordinates::new(-3.3922222, -51.8525278)));
        assert_eq!(record.image_path.as_deref(), Some("assets/shipments/agl8.jpg"));
    }

    #[test]
    fn test_explicit_coordinates_take_precedence() {
        let mut record = ShipmentRecord::new("AGL5")
            .with(Field::Latitude, "1.25")
            .with(Field::Longitude, "-2.5")
            .with(Field::GoogleMapUrl, "https://maps.google.com/@9,9");
        derive(&mut record, &Config::default());
        assert_eq!(record.coordinates, Some(Coordinates::new(1.25, -2.5)));
    }

    #[test]
    fn test_non_numeric_explicit_falls_back() {
        let mut record = ShipmentRecord::new("AGL5")
            .with(Field::Latitude, "north")
            .with(Field::Longitude, "-2.5")
            .with(Field::GoogleMapUrl, "https://maps.google.com/@9,9");
        derive(&mut record, &Config::default());
        assert_eq!(record.coordinates, Some(Coordinates::new(9.0, 9.0)));
    }

    #[test]
    fn test_non_finite_explicit_falls_back() {
        for (lat, lng) in [("NaN", "inf"), ("1.5", "-infinity"), ("nan", "2")] {
            let mut record = ShipmentRecord::new("AGL7")
                .with(Field::Latitude, lat)
                .with(Field::Longitude, lng)
                .with(Field::GoogleMapUrl, "https://maps.google.com/@-3.5,-51.5,8z");
            derive(&mut record, &Config::default());
            assert_eq!(record.coordinates, Some(Coordinates::new(-3.5, -51.5)));
        }
    }

    #[test]
    fn test_merge_keeps_derived_fields() {
        let config = Config::default();
        let mut records = sample();
        for record in &mut records {
            derive(record, &config);
        }
        assert_eq!(records[0].coordinates, Some(Coordinates::new(1.0, 2.0)));
        assert_eq!(merge(&records, &records), records);

        let incoming = vec![ShipmentRecord::new("AGL1").with(Field::Status, "Lost")];
        let merged = merge(&records, &incoming);
        assert_eq!(merged[0].coordinates, Some(Coordinates::new(1.0, 2.0)));
        assert_eq!(merged[0].image_path.as_deref(), Some("assets/shipments/agl1.jpg"));
    }

    #[test]
    fn test_missing_coordinates_is_soft() {
        let mut record = ShipmentRecord::new("AGL6").with(Field::GoogleMapUrl, "https://goo.gl/x");
        derive(&mut record, &Config::default());
        assert_eq!(record.coordinates, None);
    }
}
