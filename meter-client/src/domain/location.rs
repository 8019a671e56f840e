use std::collections::BTreeMap;

use super::meter::Meter;

/// Composite identity of a location: the full address of a meter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationKey {
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub house_number: String,
    pub addition: Option<String>,
}

/// A distinct address across all cached meters.
///
/// Locations are never authored: they are regenerated from the meter set on
/// every refresh.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Location {
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub house_number: String,
    pub addition: Option<String>,
    pub meter_count: i64,
}

impl Location {
    pub fn key(&self) -> LocationKey {
        LocationKey {
            street: self.street.clone(),
            postal_code: self.postal_code.clone(),
            city: self.city.clone(),
            house_number: self.house_number.clone(),
            addition: self.addition.clone(),
        }
    }
}

/// Derive the distinct location set, ordered by (street, postal code, city,
/// house number, addition).
pub fn derive_locations(meters: &[Meter]) -> Vec<Location> {
    let mut counts: BTreeMap<LocationKey, i64> = BTreeMap::new();
    for meter in meters {
        *counts.entry(meter.location_key()).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(key, meter_count)| Location {
            street: key.street,
            postal_code: key.postal_code,
            city: key.city,
            house_number: key.house_number,
            addition: key.addition,
            meter_count,
        })
        .collect()
}
