//! Centralized filename parsing for the BIDS naming convention.
//!
//! Every image and sidecar file in a BIDS dataset follows the same pattern:
//! underscore-separated `key-value` entities followed by a final suffix,
//! e.g. `sub-01_ses-02_dir-AP_dwi.nii.gz`. This module provides the single
//! parser used by the scanner, plus the inverse builder for constructing
//! output filenames.

/// Result of parsing a BIDS filename stem like `sub-01_ses-02_dwi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsName {
    /// Entity pairs in filename order, e.g. `[("sub", "01"), ("ses", "02")]`.
    pub entities: Vec<(String, String)>,
    /// The trailing suffix, e.g. `dwi` or `T1w`.
    pub suffix: String,
}

impl BidsName {
    /// Look up an entity value by key, e.g. `entity("dir")` → `Some("AP")`.
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a filename stem following the BIDS `key-value_..._suffix` pattern.
///
/// Returns `None` when the stem has no suffix component, or when a
/// non-final component lacks the `key-value` form:
/// - `"sub-01_T1w"` → entities `[("sub", "01")]`, suffix `"T1w"`
/// - `"sub-01_ses-02_dir-AP_dwi"` → three entities, suffix `"dwi"`
/// - `"T1w"` → no entities, suffix `"T1w"`
/// - `"sub-01"` → `None` (a lone entity is not a suffix)
pub fn parse_bids_name(stem: &str) -> Option<BidsName> {
    if stem.is_empty() {
        return None;
    }
    let parts: Vec<&str> = stem.split('_').collect();
    let (suffix, entity_parts) = parts.split_last()?;
    if suffix.is_empty() || suffix.contains('-') {
        return None;
    }

    let mut entities = Vec::with_capacity(entity_parts.len());
    for part in entity_parts {
        let (key, value) = part.split_once('-')?;
        if key.is_empty() || value.is_empty() {
            return None;
        }
        entities.push((key.to_string(), value.to_string()));
    }
    Some(BidsName {
        entities,
        suffix: suffix.to_string(),
    })
}

/// Build a BIDS style filename stem from its parts.
///
/// The inverse of [`parse_bids_name`]: subject first, session if present,
/// then any extra labels in the given order, then the suffix.
pub fn bids_filename(
    suffix: &str,
    subject: &str,
    session: Option<&str>,
    labels: &[(&str, &str)],
) -> String {
    let mut name = format!("sub-{subject}");
    if let Some(session) = session {
        name.push_str(&format!("_ses-{session}"));
    }
    for (key, value) in labels {
        name.push_str(&format!("_{key}-{value}"));
    }
    name.push_str(&format!("_{suffix}"));
    name
}

/// Strip a NIfTI extension (`.nii` or `.nii.gz`) from a filename,
/// returning the stem. `None` when the name has no NIfTI extension.
pub fn strip_nii_extension(name: &str) -> Option<&str> {
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
}
