//! Imaging-derived phenotype extraction dispatch.
//!
//! Runs once over the whole output directory after the per-session
//! pipelines: writes `subjs.txt` listing every processed subject directory,
//! then invokes the extraction script over it. In cluster mode the job
//! depends on all previously submitted session jobs.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::submit::{JobId, Submitter};

use super::{DispatchError, RunOptions};

/// Build the IDP extraction command line.
pub fn build_command(subjfile: &Path, outdir: &Path, script: &str) -> Vec<String> {
    vec![
        script.to_string(),
        "--in".to_string(),
        subjfile.display().to_string(),
        "--indir".to_string(),
        outdir.display().to_string(),
        "--outdir".to_string(),
        outdir.join("idps").display().to_string(),
    ]
}

/// Write the subject list and dispatch IDP extraction. Skipped when no
/// session was processed.
pub fn run(
    subject_dirs: &[String],
    opts: &RunOptions,
    submitter: &Submitter,
    deps: &[JobId],
) -> Result<Option<JobId>, DispatchError> {
    if subject_dirs.is_empty() {
        info!("no processed sessions - will not run IDP extraction");
        return Ok(None);
    }

    let subjfile = opts.outdir.join("subjs.txt");
    let mut contents = subject_dirs.join("\n");
    contents.push('\n');
    fs::write(&subjfile, contents)?;

    let argv = build_command(&subjfile, opts.outdir, &opts.config.scripts.idp);
    Ok(submitter.submit(&argv, deps)?)
}
