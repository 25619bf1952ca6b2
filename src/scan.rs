//! BIDS dataset traversal and manifest generation.
//!
//! Walks a BIDS dataset root to discover subjects, sessions and the image
//! files each one holds, producing a structured [`Dataset`] that the dispatch
//! stage consumes.
//!
//! ## Directory Structure
//!
//! A BIDS dataset lays out one directory per subject, with an optional
//! session level beneath it and modality subdirectories below that:
//!
//! ```text
//! bids/                            # Dataset root
//! ├── dataset_description.json
//! ├── sub-01/
//! │   ├── ses-01/
//! │   │   ├── anat/
//! │   │   │   ├── sub-01_ses-01_T1w.nii.gz
//! │   │   │   └── sub-01_ses-01_T1w.json
//! │   │   ├── perf/
//! │   │   │   ├── sub-01_ses-01_asl.nii.gz
//! │   │   │   ├── sub-01_ses-01_asl.json
//! │   │   │   └── sub-01_ses-01_m0scan.nii.gz
//! │   │   ├── fmap/
//! │   │   │   └── sub-01_ses-01_dir-PA_epi.nii.gz
//! │   │   └── dwi/
//! │   │       └── sub-01_ses-01_dwi.nii.gz
//! │   └── ses-02/
//! │       └── ...
//! └── sub-02/                      # No session level - also valid
//!     └── anat/
//!         └── sub-02_T1w.nii.gz
//! ```
//!
//! The scanner does not hardcode the modality directory names: it walks the
//! whole subject (or session) tree and classifies files by their BIDS
//! filename suffix, so flat layouts are tolerated too.
//!
//! ## Output
//!
//! Produces a [`Dataset`]: subjects → sessions → suffix-keyed image file
//! lists. Only the suffixes the pipelines consume ([`IMAGE_SUFFIXES`]) are
//! collected; every session carries a list (possibly empty) for each, so
//! the dispatch stage can index without existence checks. The manifest is
//! serializable to JSON for inspection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::naming::{parse_bids_name, strip_nii_extension};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("no subjects (sub-*) found in: {0}")]
    NoSubjects(PathBuf),
}

/// The BIDS filename suffixes the pipelines consume.
pub const IMAGE_SUFFIXES: &[&str] = &["asl", "dwi", "epi", "m0scan", "T1w", "T2w"];

/// Manifest output from the scan stage.
#[derive(Debug, Serialize)]
pub struct Dataset {
    pub root: PathBuf,
    pub subjects: Vec<Subject>,
}

/// One subject and its sessions.
#[derive(Debug, Serialize)]
pub struct Subject {
    /// Subject label without the `sub-` prefix.
    pub id: String,
    pub sessions: Vec<Session>,
}

/// One scanning session of a subject.
///
/// Datasets without a session level yield a single session with `id: None`
/// holding the files found directly under the subject directory.
#[derive(Debug, Serialize)]
pub struct Session {
    /// Session label without the `ses-` prefix.
    pub id: Option<String>,
    /// Image files keyed by BIDS suffix; every entry of [`IMAGE_SUFFIXES`]
    /// is present, possibly with an empty list.
    pub images: BTreeMap<String, Vec<ImageFile>>,
}

impl Session {
    /// The files discovered for a suffix, in filename order.
    pub fn files(&self, suffix: &str) -> &[ImageFile] {
        self.images.get(suffix).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A discovered image file.
#[derive(Debug, Clone, Serialize)]
pub struct ImageFile {
    pub path: PathBuf,
    pub suffix: String,
    /// BIDS entities parsed from the filename, in filename order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<(String, String)>,
}

impl ImageFile {
    /// Look up a filename entity, e.g. `entity("dir")` → `Some("PA")`.
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Scan a BIDS dataset root into a [`Dataset`] manifest.
pub fn scan(root: &Path) -> Result<Dataset, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut subjects = Vec::new();
    for dir in sorted_subdirs(root)? {
        let name = dir.file_name().unwrap_or_default().to_string_lossy();
        let Some(id) = name.strip_prefix("sub-") else {
            continue;
        };
        debug!(subject = id, "scanning subject");
        subjects.push(Subject {
            id: id.to_string(),
            sessions: scan_subject(&dir)?,
        });
    }

    if subjects.is_empty() {
        return Err(ScanError::NoSubjects(root.to_path_buf()));
    }
    Ok(Dataset {
        root: root.to_path_buf(),
        subjects,
    })
}

fn scan_subject(subject_dir: &Path) -> Result<Vec<Session>, ScanError> {
    let session_dirs: Vec<PathBuf> = sorted_subdirs(subject_dir)?
        .into_iter()
        .filter(|d| {
            d.file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .starts_with("ses-")
        })
        .collect();

    // Deal with the case where there is no session level
    if session_dirs.is_empty() {
        return Ok(vec![Session {
            id: None,
            images: collect_images(subject_dir)?,
        }]);
    }

    let mut sessions = Vec::new();
    for dir in session_dirs {
        let name = dir.file_name().unwrap_or_default().to_string_lossy();
        let id = name.trim_start_matches("ses-").to_string();
        sessions.push(Session {
            id: Some(id),
            images: collect_images(&dir)?,
        });
    }
    Ok(sessions)
}

/// Collect all recognized image files beneath a subject or session
/// directory, classified by BIDS suffix.
fn collect_images(dir: &Path) -> Result<BTreeMap<String, Vec<ImageFile>>, ScanError> {
    let mut images: BTreeMap<String, Vec<ImageFile>> = IMAGE_SUFFIXES
        .iter()
        .map(|suffix| (suffix.to_string(), Vec::new()))
        .collect();

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let Some(stem) = strip_nii_extension(&file_name) else {
            continue;
        };
        let Some(bids) = parse_bids_name(stem) else {
            debug!(file = %entry.path().display(), "ignoring non-BIDS filename");
            continue;
        };
        match images.get_mut(&bids.suffix) {
            Some(list) => {
                debug!(file = %entry.path().display(), suffix = %bids.suffix, "found image");
                list.push(ImageFile {
                    path: entry.path().to_path_buf(),
                    suffix: bids.suffix,
                    entities: bids.entities,
                });
            }
            None => {
                debug!(file = %entry.path().display(), suffix = %bids.suffix, "ignoring unhandled suffix");
            }
        }
    }
    Ok(images)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn fixture_dataset() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"));
        touch(&root.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.json"));
        touch(&root.join("sub-01/ses-01/perf/sub-01_ses-01_asl.nii.gz"));
        touch(&root.join("sub-01/ses-01/perf/sub-01_ses-01_m0scan.nii.gz"));
        touch(&root.join("sub-01/ses-01/fmap/sub-01_ses-01_dir-PA_epi.nii.gz"));
        touch(&root.join("sub-01/ses-01/dwi/sub-01_ses-01_dir-AP_dwi.nii.gz"));
        touch(&root.join("sub-01/ses-01/dwi/sub-01_ses-01_dir-PA_dwi.nii.gz"));
        touch(&root.join("sub-01/ses-02/anat/sub-01_ses-02_T1w.nii"));
        touch(&root.join("sub-02/anat/sub-02_T1w.nii.gz"));
        touch(&root.join("sub-02/anat/sub-02_T2w.nii.gz"));
        tmp
    }

    #[test]
    fn scan_finds_all_subjects_in_order() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let ids: Vec<&str> = dataset.subjects.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["01", "02"]);
    }

    #[test]
    fn sessions_discovered_per_subject() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let ids: Vec<Option<&str>> = dataset.subjects[0]
            .sessions
            .iter()
            .map(|s| s.id.as_deref())
            .collect();
        assert_eq!(ids, vec![Some("01"), Some("02")]);
    }

    #[test]
    fn subject_without_session_level_gets_one_unnamed_session() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let sub02 = &dataset.subjects[1];
        assert_eq!(sub02.sessions.len(), 1);
        assert_eq!(sub02.sessions[0].id, None);
        assert_eq!(sub02.sessions[0].files("T1w").len(), 1);
        assert_eq!(sub02.sessions[0].files("T2w").len(), 1);
    }

    #[test]
    fn images_classified_by_suffix() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let session = &dataset.subjects[0].sessions[0];
        assert_eq!(session.files("T1w").len(), 1);
        assert_eq!(session.files("asl").len(), 1);
        assert_eq!(session.files("m0scan").len(), 1);
        assert_eq!(session.files("epi").len(), 1);
        assert_eq!(session.files("dwi").len(), 2);
    }

    #[test]
    fn every_suffix_has_a_list_even_when_empty() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let session = &dataset.subjects[1].sessions[0];
        for suffix in IMAGE_SUFFIXES {
            assert!(session.images.contains_key(*suffix), "missing {suffix}");
        }
        assert!(session.files("asl").is_empty());
    }

    #[test]
    fn sidecars_and_unhandled_suffixes_are_ignored() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("sub-01/anat/sub-01_T1w.nii.gz"));
        touch(&tmp.path().join("sub-01/anat/sub-01_T1w.json"));
        touch(&tmp.path().join("sub-01/anat/sub-01_scout.nii.gz"));
        touch(&tmp.path().join("sub-01/anat/notes.txt"));

        let dataset = scan(tmp.path()).unwrap();
        let session = &dataset.subjects[0].sessions[0];
        let total: usize = session.images.values().map(Vec::len).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn filename_entities_are_preserved() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let session = &dataset.subjects[0].sessions[0];
        let epi = &session.files("epi")[0];
        assert_eq!(epi.entity("dir"), Some("PA"));
        assert_eq!(epi.entity("sub"), Some("01"));
    }

    #[test]
    fn dwi_files_sorted_by_filename() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let session = &dataset.subjects[0].sessions[0];
        let dirs: Vec<Option<&str>> =
            session.files("dwi").iter().map(|f| f.entity("dir")).collect();
        assert_eq!(dirs, vec![Some("AP"), Some("PA")]);
    }

    #[test]
    fn non_subject_directories_are_skipped() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("sub-01/anat/sub-01_T1w.nii.gz"));
        touch(&tmp.path().join("derivatives/sub-99/anat/sub-99_T1w.nii.gz"));

        let dataset = scan(tmp.path()).unwrap();
        assert_eq!(dataset.subjects.len(), 1);
        assert_eq!(dataset.subjects[0].id, "01");
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("not-a-subject")).unwrap();
        let result = scan(tmp.path());
        assert!(matches!(result, Err(ScanError::NoSubjects(_))));
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = scan(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(ScanError::NotADirectory(_))));
    }

    #[test]
    fn manifest_serializes_to_json() {
        let tmp = fixture_dataset();
        let dataset = scan(tmp.path()).unwrap();
        let json = serde_json::to_string_pretty(&dataset).unwrap();
        assert!(json.contains("\"suffix\": \"asl\""));
        assert!(json.contains("sub-01_ses-01_asl.nii.gz"));
    }
}
