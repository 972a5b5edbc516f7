//! Content fingerprints of features.
//!
//! A fingerprint combines a feature's type tag, its relevant property values and the
//! current fingerprints of its direct dependencies. Dependency fingerprints are combined
//! rather than re-derived, so a change anywhere upstream reaches every dependent without
//! re-reading its whole ancestry.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{TrackerError, TrackerResult};
use crate::host::DocumentHost;
use crate::models::{FeatureCatalog, FeatureHash, FeatureId, PropertyValue, FEATURE_HASH};

/// Bumped whenever the canonical serialization changes.
const SCHEMA_VERSION: u32 = 1;

/// Everything a fingerprint is computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintInput {
    pub type_id: String,
    pub properties: BTreeMap<String, PropertyValue>,
    /// Direct dependencies and their current fingerprints, in any order. `None` marks a
    /// dependency that has not been fingerprinted yet.
    pub dependencies: Vec<(FeatureId, Option<FeatureHash>)>,
}

#[derive(Serialize)]
struct Canonical<'a> {
    version: u32,
    type_id: &'a str,
    properties: &'a BTreeMap<String, PropertyValue>,
    dependencies: Vec<(&'a str, &'a str)>,
}

/// Computes the fingerprint of `input`.
///
/// Deterministic: equal inputs give equal tokens, whatever the order of
/// `input.dependencies`.
pub fn fingerprint(input: &FingerprintInput) -> TrackerResult<FeatureHash> {
    let mut dependencies: Vec<(&str, &str)> = input
        .dependencies
        .iter()
        .map(|(id, hash)| (id.as_str(), hash.as_ref().map_or("", FeatureHash::as_str)))
        .collect();
    dependencies.sort_unstable();

    let canonical = Canonical {
        version: SCHEMA_VERSION,
        type_id: &input.type_id,
        properties: &input.properties,
        dependencies,
    };
    let bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(FeatureHash::from_hex(format!("{:x}", hasher.finalize())))
}

/// Reads the fingerprint input of `id` from the host.
///
/// Declared properties the feature does not carry are left out. A property the host
/// cannot read, or a type the catalog does not know, is a
/// [`TrackerError::PropertyUnreadable`]: a fingerprint over partial input would be
/// meaningless.
pub fn collect_input<H: DocumentHost + ?Sized>(
    host: &H,
    catalog: &FeatureCatalog,
    id: &FeatureId,
) -> TrackerResult<FingerprintInput> {
    let type_id = host
        .type_id(id)
        .map_err(|e| TrackerError::unreadable(id, "TypeId", format!("{:#}", e)))?;
    let relevant = catalog.relevant_properties(&type_id).ok_or_else(|| {
        TrackerError::unreadable(id, "TypeId", format!("unsupported feature type {}", type_id))
    })?;

    let mut properties = BTreeMap::new();
    for name in relevant {
        match host.read_property(id, name) {
            Ok(Some(value)) => {
                properties.insert(name.clone(), value);
            }
            Ok(None) => {}
            Err(e) => return Err(TrackerError::unreadable(id, name.clone(), format!("{:#}", e))),
        }
    }

    let mut dependencies = Vec::new();
    for dep in host.direct_dependencies(id)? {
        let hash = stored_hash(host, &dep)?;
        dependencies.push((dep, hash));
    }

    Ok(FingerprintInput {
        type_id,
        properties,
        dependencies,
    })
}

/// The fingerprint currently stored on `id`, if any.
pub fn stored_hash<H: DocumentHost + ?Sized>(
    host: &H,
    id: &FeatureId,
) -> TrackerResult<Option<FeatureHash>> {
    let value = host
        .read_property(id, FEATURE_HASH)
        .map_err(|e| TrackerError::unreadable(id, FEATURE_HASH, format!("{:#}", e)))?;
    match value {
        None => Ok(None),
        Some(PropertyValue::Text(s)) if s.is_empty() => Ok(None),
        Some(PropertyValue::Text(s)) => Ok(Some(FeatureHash::from_hex(s))),
        Some(other) => Err(TrackerError::unreadable(
            id,
            FEATURE_HASH,
            format!("expected text, found {}", other.kind().as_str()),
        )),
    }
}

/// Collects the input of `id` and fingerprints it.
pub fn fingerprint_feature<H: DocumentHost + ?Sized>(
    host: &H,
    catalog: &FeatureCatalog,
    id: &FeatureId,
) -> TrackerResult<FeatureHash> {
    let input = collect_input(host, catalog, id)?;
    fingerprint(&input)
}
