// Deterministic form of a measurement site, used as its identity.
//
// Deliveries do not keep a stable element order, so the same physical
// topology can arrive with its locations, lanes and cameras shuffled. Sorting
// every nested collection before hashing makes those deliveries collapse onto
// one site.
use crate::error::IngestError;
use crate::model::{MeasurementSite, SiteType};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 of the canonical form, hex encoded. Equal keys mean the same site.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct SiteKey(String);

impl SiteKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CanonicalSite {
    site: MeasurementSite,
    form: String,
    key: SiteKey,
}

impl CanonicalSite {
    pub fn site(&self) -> &MeasurementSite {
        &self.site
    }

    /// The sorted site serialized as JSON. Stored next to the key so a site
    /// row can be inspected without rebuilding its graph.
    pub fn form(&self) -> &str {
        &self.form
    }

    pub fn key(&self) -> &SiteKey {
        &self.key
    }

    pub fn into_site(self) -> MeasurementSite {
        self.site
    }
}

/// Sort locations by index, lanes by name and cameras by all of their fields,
/// then derive the canonical form and key.
///
/// Ties fall through to the contents: lanes sharing a name are ordered by
/// their sorted cameras, locations sharing an index (or lacking one) by their
/// sorted lanes. Only `location` sites may have locations without an index;
/// such a location sorts before any indexed one.
pub fn canonicalize(mut site: MeasurementSite) -> Result<CanonicalSite, IngestError> {
    if site.kind != SiteType::Location && site.locations.iter().any(|l| l.index.is_none()) {
        return Err(IngestError::SchemaMismatch(format!(
            "{} site {} has a location without an index",
            site.kind, site.reference_id
        )));
    }

    // Innermost first, so the derived orderings compare sorted contents.
    for location in site.locations.iter_mut() {
        for lane in location.lanes.iter_mut() {
            lane.cameras.sort();
        }
        location.lanes.sort();
    }
    site.locations.sort();

    let form = serde_json::to_string(&site).map_err(|e| {
        IngestError::SchemaMismatch(format!(
            "cannot serialize site {}: {e}",
            site.reference_id
        ))
    })?;
    let key = SiteKey(hex::encode(Sha256::digest(form.as_bytes())));
    Ok(CanonicalSite { site, form, key })
}
