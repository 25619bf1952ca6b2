//! Pipeline configuration module.
//!
//! Handles loading and validating the optional `bidsrun.toml` config file.
//! Everything is defaulted: a dataset can be processed with no config at
//! all, and a config file need only override the values that differ from
//! stock: site-specific script paths or cluster resource requests, most
//! commonly.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [scripts]
//! struc = "struc_preproc.sh"   # Structural preprocessing executable
//! dwi = "dMRI_preproc.sh"      # Diffusion preprocessing executable
//! idp = "idp_extract.sh"       # IDP extraction executable
//! asl = "oxasl"                # ASL/perfusion processing executable
//!
//! [cluster]
//! minutes = 240                # Requested wall time per job
//! ram_mb = 16000               # Requested memory per job
//!
//! [mriqc]
//! image = "/software/imaging/singularity_images/mriqc.simg"
//! minutes = 600                # MRIQC needs more time and memory
//! ram_mb = 64000
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Pipeline configuration loaded from `bidsrun.toml`.
///
/// All fields have working defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// External processing executables, resolved through `PATH` unless
    /// given as absolute paths.
    pub scripts: ScriptsConfig,
    /// Cluster resource requests for ordinary jobs.
    pub cluster: ClusterConfig,
    /// MRIQC settings.
    pub mriqc: MriqcConfig,
}

impl PipelineConfig {
    /// Validate config values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, script) in [
            ("scripts.struc", &self.scripts.struc),
            ("scripts.dwi", &self.scripts.dwi),
            ("scripts.idp", &self.scripts.idp),
            ("scripts.asl", &self.scripts.asl),
        ] {
            if script.is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        if self.cluster.minutes == 0 || self.mriqc.minutes == 0 {
            return Err(ConfigError::Validation(
                "cluster/mriqc minutes must be non-zero".into(),
            ));
        }
        if self.cluster.ram_mb == 0 || self.mriqc.ram_mb == 0 {
            return Err(ConfigError::Validation(
                "cluster/mriqc ram_mb must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// External processing executables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptsConfig {
    pub struc: String,
    pub dwi: String,
    pub idp: String,
    pub asl: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            struc: "struc_preproc.sh".to_string(),
            dwi: "dMRI_preproc.sh".to_string(),
            idp: "idp_extract.sh".to_string(),
            asl: "oxasl".to_string(),
        }
    }
}

/// Cluster resource requests for ordinary jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Requested wall time per job, in minutes.
    pub minutes: u32,
    /// Requested memory per job, in megabytes.
    pub ram_mb: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            minutes: 240,
            ram_mb: 16000,
        }
    }
}

/// MRIQC settings. Quality control runs over the whole dataset and needs
/// substantially more time and memory than the per-subject jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MriqcConfig {
    /// Singularity image to run MRIQC from.
    pub image: String,
    pub minutes: u32,
    pub ram_mb: u32,
}

impl Default for MriqcConfig {
    fn default() -> Self {
        Self {
            image: "/software/imaging/singularity_images/mriqc.simg".to_string(),
            minutes: 600,
            ram_mb: 64000,
        }
    }
}

/// Load the pipeline config.
///
/// With no path, or a path that does not exist, the stock defaults are
/// returned. A present-but-invalid file is an error, never silently
/// ignored.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }
    let text = fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

/// A stock `bidsrun.toml` with every option present and documented.
pub fn stock_config_toml() -> String {
    let defaults = PipelineConfig::default();
    format!(
        r#"# bidsrun pipeline configuration
# All options are optional - the values below are the defaults.

[scripts]
# External processing executables, resolved through PATH unless absolute.
struc = "{struc}"
dwi = "{dwi}"
idp = "{idp}"
asl = "{asl}"

[cluster]
# Resource requests passed to the cluster submitter for ordinary jobs.
minutes = {minutes}
ram_mb = {ram_mb}

[mriqc]
# Singularity image to run MRIQC from, and its (larger) resource requests.
image = "{image}"
minutes = {mriqc_minutes}
ram_mb = {mriqc_ram}
"#,
        struc = defaults.scripts.struc,
        dwi = defaults.scripts.dwi,
        idp = defaults.scripts.idp,
        asl = defaults.scripts.asl,
        minutes = defaults.cluster.minutes,
        ram_mb = defaults.cluster.ram_mb,
        image = defaults.mriqc.image,
        mriqc_minutes = defaults.mriqc.minutes,
        mriqc_ram = defaults.mriqc.ram_mb,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_no_path_given() {
        let config = load_config(None).unwrap();
        assert_eq!(config.scripts.dwi, "dMRI_preproc.sh");
        assert_eq!(config.cluster.minutes, 240);
    }

    #[test]
    fn defaults_when_file_missing() {
        let config = load_config(Some(Path::new("/no/such/bidsrun.toml"))).unwrap();
        assert_eq!(config.scripts.struc, "struc_preproc.sh");
    }

    #[test]
    fn partial_config_overrides_only_named_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bidsrun.toml");
        fs::write(&path, "[cluster]\nminutes = 60\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.cluster.minutes, 60);
        assert_eq!(config.cluster.ram_mb, 16000);
        assert_eq!(config.scripts.asl, "oxasl");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bidsrun.toml");
        fs::write(&path, "[cluster]\nminuets = 60\n").unwrap();

        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn empty_script_name_fails_validation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bidsrun.toml");
        fs::write(&path, "[scripts]\ndwi = \"\"\n").unwrap();

        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn zero_resources_fail_validation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bidsrun.toml");
        fs::write(&path, "[cluster]\nram_mb = 0\n").unwrap();

        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn stock_config_round_trips() {
        let config: PipelineConfig = toml::from_str(&stock_config_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.mriqc.minutes, 600);
    }
}
