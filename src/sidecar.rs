//! Sidecar metadata loading.
//!
//! Every NIfTI image in a BIDS dataset is accompanied by a JSON sidecar of
//! acquisition parameters: `sub-01_asl.nii.gz` pairs with `sub-01_asl.json`.
//! This module loads the sidecar into the mapper's [`Metadata`] form and
//! injects one extra field the mapping rules need but no sidecar records:
//! `img_shape`, the voxel-grid dimensions read from the image header.

use std::path::{Path, PathBuf};

use nifti::{NiftiObject, ReaderOptions};
use serde_json::{Value, json};
use thiserror::Error;

use crate::mappings::Metadata;
use crate::naming::strip_nii_extension;

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a NIfTI image file: {0}")]
    NotAnImage(PathBuf),
    #[error("no JSON sidecar found for image: {0}")]
    MissingSidecar(PathBuf),
    #[error("JSON parse error in {path}: {err}")]
    Json {
        path: PathBuf,
        err: serde_json::Error,
    },
    #[error("sidecar is not a JSON object: {0}")]
    NotAnObject(PathBuf),
    #[error("failed to read NIfTI header from {path}: {err}")]
    Nifti {
        path: PathBuf,
        err: nifti::NiftiError,
    },
}

/// The sidecar path for an image: `x.nii[.gz]` → `x.json`.
///
/// `None` when the path does not carry a NIfTI extension.
pub fn sidecar_path(image: &Path) -> Option<PathBuf> {
    let name = image.file_name()?.to_string_lossy();
    let stem = strip_nii_extension(&name)?;
    Some(image.with_file_name(format!("{stem}.json")))
}

/// Load an image's sidecar metadata, with `img_shape` injected from the
/// image header. This is the full [`Metadata`] the mapping rules expect.
pub fn load_metadata(image: &Path) -> Result<Metadata, SidecarError> {
    let mut metadata = load_sidecar(image)?;
    let shape = read_img_shape(image)?;
    metadata.insert("img_shape".to_string(), json!(shape));
    Ok(metadata)
}

/// Load and parse an image's JSON sidecar, without touching the image.
pub fn load_sidecar(image: &Path) -> Result<Metadata, SidecarError> {
    let sidecar = sidecar_path(image).ok_or_else(|| SidecarError::NotAnImage(image.to_path_buf()))?;
    if !sidecar.exists() {
        return Err(SidecarError::MissingSidecar(image.to_path_buf()));
    }
    let text = std::fs::read_to_string(&sidecar)?;
    let value: Value = serde_json::from_str(&text).map_err(|err| SidecarError::Json {
        path: sidecar.clone(),
        err,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(SidecarError::NotAnObject(sidecar)),
    }
}

/// Read the first three header dimensions of a NIfTI image.
fn read_img_shape(image: &Path) -> Result<[u64; 3], SidecarError> {
    let object = ReaderOptions::new()
        .read_file(image)
        .map_err(|err| SidecarError::Nifti {
            path: image.to_path_buf(),
            err,
        })?;
    let dim = object.header().dim;
    Ok([u64::from(dim[1]), u64::from(dim[2]), u64::from(dim[3])])
}
