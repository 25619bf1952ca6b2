//! Structural preprocessing dispatch.
//!
//! Builds the `struc_preproc.sh` invocation from a session's T1w image
//! (required) and T2w image (optional). When several candidates exist the
//! first is used, with a warning: repeat structural scans are common and
//! the pipeline takes only one.

use std::path::Path;

use crate::scan::Session;
use crate::submit::{JobId, Submitter};

use super::{DispatchError, RunOptions, pick_first};

/// Build the structural preprocessing command line.
pub fn build_command(
    t1: &Path,
    t2: Option<&Path>,
    subject: &str,
    outdir: &Path,
    script: &str,
) -> Vec<String> {
    let mut argv = vec![
        script.to_string(),
        "--input".to_string(),
        t1.display().to_string(),
        "--path".to_string(),
        outdir.display().to_string(),
        "--subject".to_string(),
        subject.to_string(),
    ];
    if let Some(t2) = t2 {
        argv.push("--t2".to_string());
        argv.push(t2.display().to_string());
    }
    argv
}

/// Dispatch structural preprocessing for one session.
///
/// Fails when the session has no T1w image: the rest of the pipeline
/// consumes the structural outputs, so there is nothing useful to do
/// without one.
pub fn run(
    session: &Session,
    subject: &str,
    opts: &RunOptions,
    submitter: &Submitter,
) -> Result<Option<JobId>, DispatchError> {
    let t1 = pick_first(session.files("T1w"), "T1w", subject)
        .ok_or_else(|| DispatchError::NoStructural(subject.to_string()))?;
    let t2 = pick_first(session.files("T2w"), "T2w", subject);

    let argv = build_command(
        &t1.path,
        t2.map(|f| f.path.as_path()),
        subject,
        opts.outdir,
        &opts.config.scripts.struc,
    );
    Ok(submitter.submit(&argv, &[])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ImageFile;
    use std::path::PathBuf;

    #[test]
    fn command_with_t1_only() {
        let argv = build_command(
            Path::new("/bids/sub-01/anat/sub-01_T1w.nii.gz"),
            None,
            "01",
            Path::new("/out"),
            "struc_preproc.sh",
        );
        assert_eq!(
            argv,
            vec![
                "struc_preproc.sh",
                "--input",
                "/bids/sub-01/anat/sub-01_T1w.nii.gz",
                "--path",
                "/out",
                "--subject",
                "01",
            ]
        );
    }

    #[test]
    fn command_includes_t2_when_present() {
        let argv = build_command(
            Path::new("/bids/t1.nii.gz"),
            Some(Path::new("/bids/t2.nii.gz")),
            "01_02",
            Path::new("/out"),
            "struc_preproc.sh",
        );
        assert_eq!(&argv[7..], &["--t2", "/bids/t2.nii.gz"]);
    }

    #[test]
    fn missing_t1_is_an_error() {
        let session = Session {
            id: None,
            images: Default::default(),
        };
        let config = crate::config::PipelineConfig::default();
        let opts = RunOptions {
            bidsdir: Path::new("/bids"),
            outdir: Path::new("/out"),
            config: &config,
            cluster: false,
            mriqc: false,
            dry_run: false,
        };
        let runner = crate::submit::tests::MockRunner::new();
        let submitter = Submitter::new(&runner, None, false);

        let result = run(&session, "01", &opts, &submitter);
        assert!(matches!(result, Err(DispatchError::NoStructural(_))));
        assert!(runner.recorded().is_empty());
    }

    #[test]
    fn dispatches_first_t1_through_submitter() {
        let mut images = std::collections::BTreeMap::new();
        images.insert(
            "T1w".to_string(),
            vec![
                ImageFile {
                    path: PathBuf::from("/bids/sub-01/anat/sub-01_run-1_T1w.nii.gz"),
                    suffix: "T1w".to_string(),
                    entities: vec![],
                },
                ImageFile {
                    path: PathBuf::from("/bids/sub-01/anat/sub-01_run-2_T1w.nii.gz"),
                    suffix: "T1w".to_string(),
                    entities: vec![],
                },
            ],
        );
        let session = Session { id: None, images };
        let config = crate::config::PipelineConfig::default();
        let opts = RunOptions {
            bidsdir: Path::new("/bids"),
            outdir: Path::new("/out"),
            config: &config,
            cluster: false,
            mriqc: false,
            dry_run: false,
        };
        let runner = crate::submit::tests::MockRunner::new();
        let submitter = Submitter::new(&runner, None, false);

        run(&session, "01", &opts, &submitter).unwrap();

        let recorded = runner.recorded();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains(&"/bids/sub-01/anat/sub-01_run-1_T1w.nii.gz".to_string()));
    }
}
