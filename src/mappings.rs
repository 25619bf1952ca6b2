//! Mapping of BIDS sidecar metadata onto pipeline options.
//!
//! Each image file in a BIDS dataset carries a JSON sidecar of acquisition
//! parameters. The external processing pipelines speak a different, flatter
//! vocabulary: `tis`, `casl`, `echospacing`, `pedir` and so on. This module is
//! the translation layer between the two.
//!
//! ## Rule tables
//!
//! Every file category ([`Category`]) owns a fixed, ordered list of rules.
//! A rule is one of:
//!
//! - **Copy**: rename a metadata field into the option vocabulary, when the
//!   field is present. Two copy rules may target the same option; the later
//!   one wins (e.g. `PostLabelingDelay` overrides `InitialPostLabelDelay`).
//! - **Derive**: compute an option from the metadata and the options resolved
//!   so far. A derivation returning `None` binds nothing; that absence is
//!   meaningful (a PASL study simply has no `casl` option).
//! - **Post**: a finishing pass over the whole options map, run after the
//!   per-field rules. Used where one option's final form depends on several
//!   others (ASL timing-field selection, cblip echo spacing).
//! - **Reserved**: an option name in the pipeline vocabulary with no mapped
//!   source yet. Contributes nothing; kept so the tables document the full
//!   vocabulary.
//!
//! Rule order is load-bearing: `casl` must resolve before `bolus` reads it,
//! and `pedir` before the cblip finishing pass divides by an image extent.
//! The options map is threaded through the rules in declared order, so a
//! later rule always observes every earlier write.
//!
//! ## Strictness
//!
//! Fields the BIDS specification guarantees for a modality (a labeling type
//! for ASL, `PhaseEncodingDirection` where a distortion correction is being
//! set up) are required: a missing one aborts the whole mapping call rather
//! than guessing, since a silently defaulted value would corrupt the
//! physics downstream. The one soft spot is echo-spacing back-calculation
//! without a resolved `pedir`, which logs a warning and leaves the option
//! unset.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("unknown file category: {0}")]
    UnknownCategory(String),
    #[error("missing required metadata field: {0}")]
    MissingField(&'static str),
    #[error("unsupported value for {field}: {value}")]
    UnsupportedValue { field: &'static str, value: String },
}

/// Sidecar metadata for one image: the parsed JSON object, plus an injected
/// `img_shape` triple from the image header (see [`crate::sidecar`]).
pub type Metadata = serde_json::Map<String, Value>;

/// Resolved pipeline options for one image. Values keep their sidecar-native
/// JSON form; the dispatch layer formats them into command-line arguments.
pub type Options = BTreeMap<String, Value>;

/// The file categories the pipelines distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// ASL time series.
    Asl,
    /// Structural (T1w/T2w) image.
    Struct,
    /// Calibration (M0) image.
    Calib,
    /// Reversed phase-encode image for distortion correction.
    Cblip,
    /// Diffusion-weighted series.
    Dwi,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Asl,
        Category::Struct,
        Category::Calib,
        Category::Cblip,
        Category::Dwi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Asl => "asl",
            Category::Struct => "struct",
            Category::Calib => "calib",
            Category::Cblip => "cblip",
            Category::Dwi => "dwi",
        }
    }

    fn rules(self) -> &'static [Rule] {
        match self {
            Category::Asl => ASL_RULES,
            Category::Struct => STRUCT_RULES,
            Category::Calib => CALIB_RULES,
            Category::Cblip => CBLIP_RULES,
            Category::Dwi => DWI_RULES,
        }
    }
}

impl FromStr for Category {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, MappingError> {
        match s {
            "asl" => Ok(Category::Asl),
            "struct" => Ok(Category::Struct),
            "calib" => Ok(Category::Calib),
            "cblip" => Ok(Category::Cblip),
            "dwi" => Ok(Category::Dwi),
            other => Err(MappingError::UnknownCategory(other.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type DeriveFn = fn(&Metadata, &Options) -> Result<Option<Value>, MappingError>;
type PostFn = fn(&Metadata, &mut Options) -> Result<(), MappingError>;

enum Rule {
    /// `(option, metadata field)` — copy the field's value when present.
    Copy(&'static str, &'static str),
    /// `(option, fn)` — bind the option when the function yields a value.
    Derive(&'static str, DeriveFn),
    /// Finishing pass mutating the options map in place.
    Post(PostFn),
    /// Vocabulary entry with no mapped source.
    Reserved(&'static str),
}

const ASL_RULES: &[Rule] = &[
    Rule::Reserved("order"),
    Rule::Copy("tis", "InitialPostLabelDelay"),
    Rule::Copy("tis", "PostLabelingDelay"),
    Rule::Copy("plds", "InitialPostLabelDelay"),
    Rule::Copy("plds", "PostLabelingDelay"),
    Rule::Copy("tes", "EchoTime"),
    Rule::Reserved("ntis"),
    Rule::Reserved("nplds"),
    Rule::Reserved("rpts"),
    Rule::Reserved("nphases"),
    Rule::Reserved("nenc"),
    Rule::Derive("casl", derive_is_casl),
    Rule::Derive("bolus", derive_bolus),
    Rule::Derive("slicedt", derive_slicedt),
    Rule::Reserved("sliceband"),
    Rule::Copy("artsupp", "VascularCrushing"),
    Rule::Post(finalize_asl_timing),
];

const STRUCT_RULES: &[Rule] = &[Rule::Reserved("struc"), Rule::Reserved("fsl_anat")];

const CALIB_RULES: &[Rule] = &[
    Rule::Reserved("calib-alpha"),
    Rule::Copy("tr", "RepetitionTimePreparation"),
    Rule::Copy("tr", "RepetitionTime"),
    Rule::Copy("te", "EchoTime"),
];

const CBLIP_RULES: &[Rule] = &[
    Rule::Copy("echospacing", "EffectiveEchoSpacing"),
    Rule::Copy("totalreadouttime", "TotalReadoutTime"),
    Rule::Derive("pedir", derive_pedir),
    Rule::Post(finalize_cblip_echospacing),
];

const DWI_RULES: &[Rule] = &[
    Rule::Copy("echospacing", "EffectiveEchoSpacing"),
    Rule::Derive("pedir", derive_pedir),
];

/// Map one image's sidecar metadata to the option vocabulary of `category`.
///
/// Walks the category's rule list in declared order, building the options
/// map incrementally. See the module docs for rule semantics.
pub fn options_from_metadata(
    metadata: &Metadata,
    category: Category,
) -> Result<Options, MappingError> {
    options_from_metadata_with(metadata, category, &Metadata::new())
}

/// Like [`options_from_metadata`], with caller-supplied overrides merged
/// into a copy of the metadata first. An override key replaces the sidecar
/// value wholesale; the caller's metadata map is never mutated.
pub fn options_from_metadata_with(
    metadata: &Metadata,
    category: Category,
    overrides: &Metadata,
) -> Result<Options, MappingError> {
    let mut metadata = metadata.clone();
    for (key, value) in overrides {
        metadata.insert(key.clone(), value.clone());
    }

    let mut options = Options::new();
    for rule in category.rules() {
        match rule {
            Rule::Copy(option, field) => {
                if let Some(value) = metadata.get(*field) {
                    options.insert((*option).to_string(), value.clone());
                }
            }
            Rule::Derive(option, derive) => {
                if let Some(value) = derive(&metadata, &options)? {
                    options.insert((*option).to_string(), value);
                }
            }
            Rule::Post(post) => post(&metadata, &mut options)?,
            Rule::Reserved(_) => {}
        }
    }
    Ok(options)
}

// ============================================================================
// Derivations
// ============================================================================

/// `casl` is set (to true) for any labeling type other than PASL. A PASL
/// study binds nothing; downstream treats the absence as "not CASL".
fn derive_is_casl(metadata: &Metadata, _options: &Options) -> Result<Option<Value>, MappingError> {
    let label_type = metadata
        .get("LabelingType")
        .or_else(|| metadata.get("ArterialSpinLabelingType"))
        .ok_or(MappingError::MissingField(
            "LabelingType/ArterialSpinLabelingType",
        ))?;
    if label_type.as_str() == Some("PASL") {
        Ok(None)
    } else {
        Ok(Some(Value::Bool(true)))
    }
}

/// Bolus duration: for PASL, the bolus cut-off timing sequence if recorded;
/// otherwise the labeling duration.
///
/// `BolusCutOffTImingSequence` is spelled here exactly as the sidecars we
/// consume spell it. The standard BIDS fields are `BolusCutOffDelayTime` /
/// `BolusCutOffTechnique`, so this key is almost never present and the rule
/// falls through to `LabelingDuration`, pending upstream confirmation of
/// the intended field.
fn derive_bolus(metadata: &Metadata, options: &Options) -> Result<Option<Value>, MappingError> {
    let casl = options.get("casl").and_then(Value::as_bool).unwrap_or(false);
    if !casl && metadata.contains_key("BolusCutOffTImingSequence") {
        Ok(metadata.get("BolusCutOffTImingSequence").cloned())
    } else if let Some(duration) = metadata.get("LabelingDuration") {
        Ok(Some(duration.clone()))
    } else {
        Ok(None)
    }
}

/// Time per slice, as the mean difference between consecutive entries of
/// `SliceTiming`. Absent when there is no slice timing, or when there are
/// fewer than two slices (no consecutive pairs to average).
fn derive_slicedt(metadata: &Metadata, _options: &Options) -> Result<Option<Value>, MappingError> {
    let Some(value) = metadata.get("SliceTiming") else {
        return Ok(None);
    };
    let times = as_f64_array(value, "SliceTiming")?;
    if times.len() < 2 {
        return Ok(None);
    }
    let total: f64 = times.windows(2).map(|pair| pair[1] - pair[0]).sum();
    Ok(Some(Value::from(total / (times.len() - 1) as f64)))
}

/// Translate `PhaseEncodingDirection` from BIDS axis letters (`i`/`j`/`k`,
/// optional trailing `-` for reversed polarity) to the pipelines' spatial
/// form (`x`/`y`/`z`, sign as a leading `-`).
fn derive_pedir(metadata: &Metadata, _options: &Options) -> Result<Option<Value>, MappingError> {
    let value = metadata
        .get("PhaseEncodingDirection")
        .ok_or(MappingError::MissingField("PhaseEncodingDirection"))?;
    let pedir = value.as_str().ok_or_else(|| MappingError::UnsupportedValue {
        field: "PhaseEncodingDirection",
        value: value.to_string(),
    })?;

    let axis = match pedir.trim_matches('-') {
        "i" => "x",
        "j" => "y",
        "k" => "z",
        _ => {
            return Err(MappingError::UnsupportedValue {
                field: "PhaseEncodingDirection",
                value: pedir.to_string(),
            });
        }
    };
    let mapped = if pedir.contains('-') {
        format!("-{axis}")
    } else {
        axis.to_string()
    };
    Ok(Some(Value::String(mapped)))
}

// ============================================================================
// Finishing passes
// ============================================================================

/// Pick the active ASL timing field: PCASL/CASL data uses `plds`, PASL uses
/// `tis`. The inactive field is removed, and a scalar timing value is
/// wrapped into a single-element list; the pipelines always take a list.
fn finalize_asl_timing(_metadata: &Metadata, options: &mut Options) -> Result<(), MappingError> {
    let casl = options.get("casl").and_then(Value::as_bool).unwrap_or(false);
    let (keep, discard) = if casl { ("plds", "tis") } else { ("tis", "plds") };

    options.remove(discard);
    match options.get_mut(keep) {
        Some(value) => {
            if value.is_number() {
                let single = value.take();
                *value = Value::Array(vec![single]);
            }
            Ok(())
        }
        None => Err(MappingError::MissingField(
            "PostLabelingDelay/InitialPostLabelDelay",
        )),
    }
}

/// The distortion correction wants an effective echo spacing, not a total
/// readout time. When only the latter was recorded, back-calculate:
/// `echospacing = totalreadouttime / (N - 1)` with `N` the image extent
/// along the phase-encode axis. Needs `pedir` already resolved; without it
/// the spacing is left unset (warning, not an error).
fn finalize_cblip_echospacing(
    metadata: &Metadata,
    options: &mut Options,
) -> Result<(), MappingError> {
    let Some(readout) = options.remove("totalreadouttime") else {
        return Ok(());
    };
    let readout = readout.as_f64().ok_or_else(|| MappingError::UnsupportedValue {
        field: "TotalReadoutTime",
        value: readout.to_string(),
    })?;

    let Some(pedir) = options.get("pedir").and_then(Value::as_str) else {
        warn!(
            "found total readout time for cblip image but no PE dir - \
             cannot calculate effective echo spacing"
        );
        return Ok(());
    };

    let shape = metadata
        .get("img_shape")
        .ok_or(MappingError::MissingField("img_shape"))?;
    let shape = as_u64_array(shape, "img_shape")?;
    let extent = match pedir.trim_start_matches('-') {
        "x" => shape.first(),
        "y" => shape.get(1),
        "z" => shape.get(2),
        other => {
            return Err(MappingError::UnsupportedValue {
                field: "pedir",
                value: other.to_string(),
            });
        }
    }
    .copied()
    .ok_or(MappingError::MissingField("img_shape"))?;
    if extent < 2 {
        return Err(MappingError::UnsupportedValue {
            field: "img_shape",
            value: extent.to_string(),
        });
    }

    options.insert(
        "echospacing".to_string(),
        Value::from(readout / (extent - 1) as f64),
    );
    Ok(())
}

// ============================================================================
// Value helpers
// ============================================================================

fn as_f64_array(value: &Value, field: &'static str) -> Result<Vec<f64>, MappingError> {
    value
        .as_array()
        .and_then(|array| array.iter().map(Value::as_f64).collect())
        .ok_or_else(|| MappingError::UnsupportedValue {
            field,
            value: value.to_string(),
        })
}

fn as_u64_array(value: &Value, field: &'static str) -> Result<Vec<u64>, MappingError> {
    value
        .as_array()
        .and_then(|array| array.iter().map(Value::as_u64).collect())
        .ok_or_else(|| MappingError::UnsupportedValue {
            field,
            value: value.to_string(),
        })
}
