//! Diffusion preprocessing dispatch.
//!
//! Each DWI file's sidecar is mapped through the `dwi` category to recover
//! its echo spacing and phase-encode direction, then the session's scans
//! are checked for consistency and split into forward/reversed groups by
//! phase-encode polarity. The preprocessing script receives the forward
//! scans as its main input and the reversed scans (when present) for
//! distortion correction.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use crate::mappings::{Category, Options, options_from_metadata};
use crate::scan::Session;
use crate::sidecar;
use crate::submit::{JobId, Submitter};

use super::{DispatchError, RunOptions};

/// Echo spacings closer than this are treated as identical.
const ECHOSPACING_TOLERANCE: f64 = 1e-5;

/// Build the diffusion preprocessing command line from the per-scan
/// mapped options.
///
/// Checks that every scan agrees on phase-encode axis and echo spacing,
/// then splits forward from reversed scans by polarity.
pub fn build_command(
    scans: &[(PathBuf, Options)],
    subject: &str,
    outdir: &Path,
    script: &str,
) -> Result<Vec<String>, DispatchError> {
    let mut echospacings = Vec::with_capacity(scans.len());
    let mut pedirs = Vec::with_capacity(scans.len());
    for (path, options) in scans {
        echospacings.push(
            options
                .get("echospacing")
                .and_then(Value::as_f64)
                .ok_or_else(|| DispatchError::MissingOption {
                    option: "echospacing",
                    path: path.clone(),
                })?,
        );
        pedirs.push(
            options
                .get("pedir")
                .and_then(Value::as_str)
                .ok_or_else(|| DispatchError::MissingOption {
                    option: "pedir",
                    path: path.clone(),
                })?
                .to_string(),
        );
    }

    // The script takes a single PE axis for the whole session
    let axes: BTreeSet<&str> = pedirs.iter().map(|p| p.trim_matches('-')).collect();
    if axes.len() != 1 {
        return Err(DispatchError::InconsistentPeDirs(pedirs));
    }
    let axis = match axes.into_iter().next().unwrap_or_default() {
        "x" => "1",
        "y" => "2",
        other => return Err(DispatchError::UnsupportedPeDir(other.to_string())),
    };

    let spread = echospacings.iter().cloned().fold(f64::MIN, f64::max)
        - echospacings.iter().cloned().fold(f64::MAX, f64::min);
    if spread > ECHOSPACING_TOLERANCE {
        return Err(DispatchError::InconsistentEchoSpacing(echospacings));
    }
    let mean_echospacing = echospacings.iter().sum::<f64>() / echospacings.len() as f64;

    let join = |paths: Vec<&Path>| {
        paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("@")
    };
    let fwd: Vec<&Path> = scans
        .iter()
        .zip(&pedirs)
        .filter(|(_, pedir)| !pedir.contains('-'))
        .map(|((path, _), _)| path.as_path())
        .collect();
    let rev: Vec<&Path> = scans
        .iter()
        .zip(&pedirs)
        .filter(|(_, pedir)| pedir.contains('-'))
        .map(|((path, _), _)| path.as_path())
        .collect();

    let mut argv = vec![
        script.to_string(),
        "--input".to_string(),
        join(fwd),
        "--path".to_string(),
        outdir.display().to_string(),
        "--subject".to_string(),
        subject.to_string(),
        "--echospacing".to_string(),
        mean_echospacing.to_string(),
        "--pe_dir".to_string(),
        axis.to_string(),
        "--qc".to_string(),
    ];
    if !rev.is_empty() {
        argv.push("--input_2".to_string());
        argv.push(join(rev));
    }
    Ok(argv)
}

/// Dispatch diffusion preprocessing for one session. Sessions without DWI
/// data are skipped.
pub fn run(
    session: &Session,
    subject: &str,
    opts: &RunOptions,
    submitter: &Submitter,
    deps: &[JobId],
) -> Result<Option<JobId>, DispatchError> {
    let files = session.files("dwi");
    if files.is_empty() {
        info!(subject, "no DWI files found - will not run diffusion pipeline");
        return Ok(None);
    }

    let mut scans = Vec::with_capacity(files.len());
    for file in files {
        let metadata = sidecar::load_metadata(&file.path)?;
        let options = options_from_metadata(&metadata, Category::Dwi)?;
        scans.push((file.path.clone(), options));
    }

    let argv = build_command(&scans, subject, opts.outdir, &opts.config.scripts.dwi)?;
    Ok(submitter.submit(&argv, deps)?)
}
