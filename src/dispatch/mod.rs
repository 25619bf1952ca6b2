//! Per-modality pipeline dispatch.
//!
//! Turns a scanned [`Dataset`] into external processing invocations, one
//! set per subject/session:
//!
//! | Module | Pipeline |
//! |--------|----------|
//! | [`struc`] | Structural preprocessing (`struc_preproc.sh`) |
//! | [`dwi`] | Diffusion preprocessing (`dMRI_preproc.sh`) |
//! | [`asl`] | Perfusion processing (`oxasl`) |
//! | [`idps`] | Imaging-derived phenotype extraction (`idp_extract.sh`) |
//! | [`mriqc`] | Dataset-level quality control (MRIQC via singularity) |
//!
//! Each module separates pure command construction (a `build_command`
//! function returning an argv vector, unit-testable without touching the
//! filesystem) from a thin `run` wrapper that loads sidecar metadata, maps
//! it through [`crate::mappings`], and hands the argv to a
//! [`Submitter`](crate::submit::Submitter).
//!
//! In cluster mode the stages are chained through scheduler dependencies:
//! diffusion and perfusion jobs wait for the session's structural job, and
//! IDP extraction waits for everything.

pub mod asl;
pub mod dwi;
pub mod idps;
pub mod mriqc;
pub mod struc;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::config::PipelineConfig;
use crate::mappings::MappingError;
use crate::scan::{Dataset, ImageFile, Session, Subject};
use crate::sidecar::SidecarError;
use crate::submit::{JobId, ProcessRunner, SubmitError, Submitter};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("no T1w image found for {0} - structural processing is required")]
    NoStructural(String),
    #[error("option {option} missing or malformed for {path}")]
    MissingOption { option: &'static str, path: PathBuf },
    #[error("inconsistent phase-encode directions for DWI scans: {0:?}")]
    InconsistentPeDirs(Vec<String>),
    #[error("phase-encode direction not supported for DWI: {0}")]
    UnsupportedPeDir(String),
    #[error("inconsistent echo spacings for DWI scans: {0:?}")]
    InconsistentEchoSpacing(Vec<f64>),
}

/// Settings for one full dispatch run.
pub struct RunOptions<'a> {
    pub bidsdir: &'a Path,
    pub outdir: &'a Path,
    pub config: &'a PipelineConfig,
    pub cluster: bool,
    pub mriqc: bool,
    pub dry_run: bool,
}

/// Take the first of a session's images for a suffix, warning when there
/// are several; the pipelines take only one.
pub(crate) fn pick_first<'a>(
    files: &'a [ImageFile],
    suffix: &str,
    subject: &str,
) -> Option<&'a ImageFile> {
    if files.len() > 1 {
        tracing::warn!(
            subject,
            suffix,
            count = files.len(),
            "more than one image found - using first"
        );
    }
    files.first()
}

/// The output-directory label for a session: `<subject>_<session>`, or just
/// the subject when the dataset has no session level.
pub fn session_label(subject: &Subject, session: &Session) -> String {
    match &session.id {
        Some(ses) => format!("{}_{}", subject.id, ses),
        None => subject.id.clone(),
    }
}

/// Dispatch every pipeline for every subject/session of the dataset, then
/// the dataset-level steps.
pub fn run_all(dataset: &Dataset, opts: &RunOptions) -> Result<(), DispatchError> {
    let runner = ProcessRunner;
    let cluster = opts.cluster.then_some(&opts.config.cluster);
    let submitter = Submitter::new(&runner, cluster, opts.dry_run);

    let mut subject_dirs = Vec::new();
    let mut session_jobs: Vec<JobId> = Vec::new();
    for subject in &dataset.subjects {
        for session in &subject.sessions {
            let label = session_label(subject, session);
            info!(session = %label, "dispatching session");

            // A missing T1w aborts the run: every other stage consumes the
            // structural outputs.
            let struc_job = struc::run(session, &label, opts, &submitter)?;
            let deps: Vec<JobId> = struc_job.into_iter().collect();

            if let Some(job) = dwi::run(session, &label, opts, &submitter, &deps)? {
                session_jobs.push(job);
            }
            if let Some(job) = asl::run(session, &label, opts, &submitter, &deps)? {
                session_jobs.push(job);
            }
            session_jobs.extend(deps);
            subject_dirs.push(label);
        }
    }

    idps::run(&subject_dirs, opts, &submitter, &session_jobs)?;
    if opts.mriqc {
        mriqc::run(opts, &submitter)?;
    }
    Ok(())
}
