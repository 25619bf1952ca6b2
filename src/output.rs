//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. The primary display
//! for every entity (subject, session) is its identity — label and
//! positional index — with the discovered image files shown as indented
//! context lines grouped by suffix. This makes the output readable as a
//! dataset inventory while still letting users trace every entry back to a
//! specific file.
//!
//! ## Scan
//!
//! ```text
//! Subjects
//! 001 sub-01
//!     001 ses-01 (5 images)
//!         asl     sub-01_ses-01_asl.nii.gz
//!         dwi     sub-01_ses-01_dir-AP_dwi.nii.gz
//!         dwi     sub-01_ses-01_dir-PA_dwi.nii.gz
//!         m0scan  sub-01_ses-01_m0scan.nii.gz
//!         T1w     sub-01_ses-01_T1w.nii.gz
//!
//! Found 1 subject, 1 session, 5 images
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure — no I/O, no side effects.

use crate::scan::{Dataset, Session};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn session_image_count(session: &Session) -> usize {
    session.images.values().map(Vec::len).sum()
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Format the scanned dataset as an indented inventory tree.
pub fn format_scan_output(dataset: &Dataset) -> Vec<String> {
    let mut lines = vec!["Subjects".to_string()];
    let mut total_sessions = 0;
    let mut total_images = 0;

    for (subject_pos, subject) in dataset.subjects.iter().enumerate() {
        lines.push(format!("{} sub-{}", format_index(subject_pos + 1), subject.id));
        for (session_pos, session) in subject.sessions.iter().enumerate() {
            total_sessions += 1;
            let images = session_image_count(session);
            total_images += images;

            let title = match &session.id {
                Some(id) => format!("ses-{id}"),
                None => "(no session level)".to_string(),
            };
            lines.push(format!(
                "{}{} {} ({})",
                indent(1),
                format_index(session_pos + 1),
                title,
                plural(images, "image")
            ));
            for (suffix, files) in &session.images {
                for file in files {
                    let name = file
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    lines.push(format!("{}{suffix:<8}{name}", indent(2)));
                }
            }
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Found {}, {}, {}",
        plural(dataset.subjects.len(), "subject"),
        plural(total_sessions, "session"),
        plural(total_images, "image")
    ));
    lines
}

/// Print the scan inventory to stdout.
pub fn print_scan_output(dataset: &Dataset) {
    for line in format_scan_output(dataset) {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{ImageFile, Subject};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn image(path: &str, suffix: &str) -> ImageFile {
        ImageFile {
            path: PathBuf::from(path),
            suffix: suffix.to_string(),
            entities: vec![],
        }
    }

    fn fixture_dataset() -> Dataset {
        let mut images = BTreeMap::new();
        images.insert(
            "asl".to_string(),
            vec![image("/bids/sub-01/ses-01/perf/sub-01_ses-01_asl.nii.gz", "asl")],
        );
        images.insert(
            "T1w".to_string(),
            vec![image("/bids/sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz", "T1w")],
        );
        let mut no_session_images = BTreeMap::new();
        no_session_images.insert(
            "T1w".to_string(),
            vec![image("/bids/sub-02/anat/sub-02_T1w.nii.gz", "T1w")],
        );
        Dataset {
            root: PathBuf::from("/bids"),
            subjects: vec![
                Subject {
                    id: "01".to_string(),
                    sessions: vec![Session {
                        id: Some("01".to_string()),
                        images,
                    }],
                },
                Subject {
                    id: "02".to_string(),
                    sessions: vec![Session {
                        id: None,
                        images: no_session_images,
                    }],
                },
            ],
        }
    }

    #[test]
    fn subjects_listed_with_indices() {
        let lines = format_scan_output(&fixture_dataset());
        assert_eq!(lines[0], "Subjects");
        assert_eq!(lines[1], "001 sub-01");
        assert!(lines.contains(&"002 sub-02".to_string()));
    }

    #[test]
    fn sessions_show_image_counts() {
        let lines = format_scan_output(&fixture_dataset());
        assert!(lines.contains(&"    001 ses-01 (2 images)".to_string()));
    }

    #[test]
    fn missing_session_level_is_labelled() {
        let lines = format_scan_output(&fixture_dataset());
        assert!(lines.contains(&"    001 (no session level) (1 image)".to_string()));
    }

    #[test]
    fn files_grouped_under_suffix() {
        let lines = format_scan_output(&fixture_dataset());
        assert!(lines.iter().any(|l| l.contains("asl") && l.contains("sub-01_ses-01_asl.nii.gz")));
    }

    #[test]
    fn summary_counts_everything() {
        let lines = format_scan_output(&fixture_dataset());
        assert_eq!(lines.last().unwrap(), "Found 2 subjects, 2 sessions, 3 images");
    }
}
