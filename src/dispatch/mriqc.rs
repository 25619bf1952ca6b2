//! MRIQC dispatch.
//!
//! Quality control runs over the raw BIDS directory through a singularity
//! image, independent of the processing pipelines. It is flag-gated and
//! uses its own (larger) resource requests.

use std::path::Path;

use crate::submit::{JobId, Submitter};

use super::{DispatchError, RunOptions};

/// Build the MRIQC invocation.
pub fn build_command(image: &str, bidsdir: &Path, outdir: &Path) -> Vec<String> {
    vec![
        "singularity".to_string(),
        "run".to_string(),
        "--cleanenv".to_string(),
        image.to_string(),
        bidsdir.display().to_string(),
        outdir.display().to_string(),
        "participant".to_string(),
        "--no-sub".to_string(),
    ]
}

/// Dispatch MRIQC over the dataset.
pub fn run(opts: &RunOptions, submitter: &Submitter) -> Result<Option<JobId>, DispatchError> {
    let argv = build_command(&opts.config.mriqc.image, opts.bidsdir, opts.outdir);
    Ok(submitter.submit_with_resources(
        &argv,
        &[],
        opts.config.mriqc.minutes,
        opts.config.mriqc.ram_mb,
    )?)
}
