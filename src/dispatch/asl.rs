//! Perfusion (ASL) processing dispatch.
//!
//! The one place all three perfusion-related mapping categories come
//! together: the ASL series itself maps through `asl`, a calibration
//! (M0) image through `calib`, and a reversed phase-encode image through
//! `cblip`. The resolved options become `oxasl` command-line arguments.

use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::mappings::{Category, Options, options_from_metadata};
use crate::scan::Session;
use crate::sidecar;
use crate::submit::{JobId, Submitter};

use super::{DispatchError, RunOptions, pick_first};

/// Render a resolved options map as command-line arguments.
///
/// - booleans become bare flags (`casl: true` → `--casl`)
/// - lists become comma-joined values (`plds: [1.8, 2.3]` → `--plds=1.8,2.3`)
/// - everything else becomes `--key=value`
pub fn option_args(options: &Options) -> Vec<String> {
    let mut args = Vec::with_capacity(options.len());
    for (key, value) in options {
        match value {
            Value::Bool(true) => args.push(format!("--{key}")),
            Value::Bool(false) => {}
            other => args.push(format!("--{key}={}", format_value(other))),
        }
    }
    args
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(format_scalar)
            .collect::<Vec<_>>()
            .join(","),
        other => format_scalar(other),
    }
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the perfusion processing command line.
pub fn build_command(
    asl: &Path,
    asl_options: &Options,
    calib: Option<(&Path, &Options)>,
    cblip: Option<(&Path, &Options)>,
    subject: &str,
    outdir: &Path,
    script: &str,
) -> Vec<String> {
    let mut argv = vec![
        script.to_string(),
        "-i".to_string(),
        asl.display().to_string(),
        "-o".to_string(),
        outdir.join(format!("{subject}_oxasl")).display().to_string(),
        "--overwrite".to_string(),
    ];
    argv.extend(option_args(asl_options));
    if let Some((path, options)) = calib {
        argv.push("-c".to_string());
        argv.push(path.display().to_string());
        argv.extend(option_args(options));
    }
    if let Some((path, options)) = cblip {
        argv.push("--cblip".to_string());
        argv.push(path.display().to_string());
        argv.extend(option_args(options));
    }
    argv
}

/// Dispatch perfusion processing for one session. Sessions without ASL
/// data are skipped.
pub fn run(
    session: &Session,
    subject: &str,
    opts: &RunOptions,
    submitter: &Submitter,
    deps: &[JobId],
) -> Result<Option<JobId>, DispatchError> {
    let Some(asl) = pick_first(session.files("asl"), "asl", subject) else {
        info!(subject, "no ASL files found - will not run perfusion pipeline");
        return Ok(None);
    };
    let calib = pick_first(session.files("m0scan"), "m0scan", subject);
    let cblip = pick_first(session.files("epi"), "epi", subject);

    let asl_options = options_from_metadata(&sidecar::load_metadata(&asl.path)?, Category::Asl)?;
    let calib_mapped = match calib {
        Some(file) => Some((
            file.path.as_path(),
            options_from_metadata(&sidecar::load_metadata(&file.path)?, Category::Calib)?,
        )),
        None => None,
    };
    let cblip_mapped = match cblip {
        Some(file) => Some((
            file.path.as_path(),
            options_from_metadata(&sidecar::load_metadata(&file.path)?, Category::Cblip)?,
        )),
        None => None,
    };

    let argv = build_command(
        &asl.path,
        &asl_options,
        calib_mapped.as_ref().map(|(p, o)| (*p, o)),
        cblip_mapped.as_ref().map(|(p, o)| (*p, o)),
        subject,
        opts.outdir,
        &opts.config.scripts.asl,
    );
    Ok(submitter.submit(&argv, deps)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(pairs: &[(&str, Value)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // =========================================================================
    // Option rendering
    // =========================================================================

    #[test]
    fn true_flag_renders_bare() {
        let opts = options(&[("casl", json!(true))]);
        assert_eq!(option_args(&opts), vec!["--casl"]);
    }

    #[test]
    fn list_renders_comma_joined() {
        let opts = options(&[("plds", json!([0.25, 0.5, 1.0]))]);
        assert_eq!(option_args(&opts), vec!["--plds=0.25,0.5,1.0"]);
    }

    #[test]
    fn scalar_renders_key_value() {
        let opts = options(&[("bolus", json!(1.4)), ("pedir", json!("-y"))]);
        assert_eq!(option_args(&opts), vec!["--bolus=1.4", "--pedir=-y"]);
    }

    #[test]
    fn rendering_is_deterministic() {
        let opts = options(&[
            ("slicedt", json!(0.03)),
            ("casl", json!(true)),
            ("bolus", json!(1.8)),
        ]);
        assert_eq!(
            option_args(&opts),
            vec!["--bolus=1.8", "--casl", "--slicedt=0.03"]
        );
    }

    // =========================================================================
    // Command assembly
    // =========================================================================

    #[test]
    fn minimal_command_has_input_and_output() {
        let asl_opts = options(&[("casl", json!(true)), ("plds", json!([1.8]))]);
        let argv = build_command(
            Path::new("/bids/sub-01_asl.nii.gz"),
            &asl_opts,
            None,
            None,
            "01",
            Path::new("/out"),
            "oxasl",
        );
        assert_eq!(
            argv,
            vec![
                "oxasl",
                "-i",
                "/bids/sub-01_asl.nii.gz",
                "-o",
                "/out/01_oxasl",
                "--overwrite",
                "--casl",
                "--plds=1.8",
            ]
        );
    }

    #[test]
    fn calibration_image_and_options_appended() {
        let asl_opts = options(&[("tis", json!([1.6]))]);
        let calib_opts = options(&[("tr", json!(4.0)), ("te", json!(0.012))]);
        let argv = build_command(
            Path::new("/bids/asl.nii.gz"),
            &asl_opts,
            Some((Path::new("/bids/m0.nii.gz"), &calib_opts)),
            None,
            "01",
            Path::new("/out"),
            "oxasl",
        );
        let pos = argv.iter().position(|a| a == "-c").unwrap();
        assert_eq!(argv[pos + 1], "/bids/m0.nii.gz");
        assert!(argv.contains(&"--tr=4.0".to_string()));
        assert!(argv.contains(&"--te=0.012".to_string()));
    }

    #[test]
    fn cblip_image_and_options_appended() {
        let asl_opts = options(&[("tis", json!([1.6]))]);
        let cblip_opts = options(&[
            ("echospacing", json!(0.0008)),
            ("pedir", json!("-y")),
        ]);
        let argv = build_command(
            Path::new("/bids/asl.nii.gz"),
            &asl_opts,
            None,
            Some((Path::new("/bids/epi.nii.gz"), &cblip_opts)),
            "01",
            Path::new("/out"),
            "oxasl",
        );
        let pos = argv.iter().position(|a| a == "--cblip").unwrap();
        assert_eq!(argv[pos + 1], "/bids/epi.nii.gz");
        assert!(argv.contains(&"--echospacing=0.0008".to_string()));
        assert!(argv.contains(&"--pedir=-y".to_string()));
    }

    #[test]
    fn session_without_asl_is_skipped() {
        let session = Session {
            id: None,
            images: Default::default(),
        };
        let config = crate::config::PipelineConfig::default();
        let run_opts = RunOptions {
            bidsdir: Path::new("/bids"),
            outdir: Path::new("/out"),
            config: &config,
            cluster: false,
            mriqc: false,
            dry_run: false,
        };
        let runner = crate::submit::tests::MockRunner::new();
        let submitter = Submitter::new(&runner, None, false);

        let job = run(&session, "01", &run_opts, &submitter, &[]).unwrap();
        assert_eq!(job, None);
        assert!(runner.recorded().is_empty());
    }
}
