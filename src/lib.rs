//! # bidsrun
//!
//! Run ASL, diffusion and structural processing pipelines from a BIDS
//! dataset. Your dataset is the data source: subject and session
//! directories are discovered, each image's JSON sidecar is translated
//! into pipeline options, and the external processing tools are invoked
//! per subject/session, directly or through a cluster scheduler.
//!
//! # Architecture: Scan → Map → Dispatch
//!
//! ```text
//! 1. Scan      bids/      →  Dataset        (filesystem → structured data)
//! 2. Map       sidecars   →  Options        (BIDS metadata → pipeline vocabulary)
//! 3. Dispatch  Options    →  commands       (per-modality invocations, run or submitted)
//! ```
//!
//! The stages are independent: scanning touches only filenames, mapping is
//! pure computation over parsed metadata, and dispatch is the only place a
//! child process is spawned. Unit tests exercise each stage without the
//! others: mapping tests need no filesystem, dispatch tests need no real
//! executables.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Walks the BIDS tree, classifies image files by suffix, produces the dataset manifest |
//! | [`naming`] | BIDS `key-value_..._suffix` filename convention parser used by the scanner |
//! | [`sidecar`] | Loads JSON sidecar metadata and injects the image shape from the NIfTI header |
//! | [`mappings`] | The metadata-to-options rule tables: renames, derivations, finishing passes |
//! | [`dispatch`] | Per-modality command construction and dispatch (structural, DWI, ASL, IDPs, MRIQC) |
//! | [`submit`] | Command execution seam: direct, cluster-wrapped (`fsl_sub`), or dry-run |
//! | [`config`] | Optional `bidsrun.toml`: script paths, singularity image, cluster resources |
//! | [`output`] | CLI output formatting — tree display of the scanned dataset |
//!
//! # Design Decisions
//!
//! ## Rule Tables as Data
//!
//! The metadata translation is a declarative table per file category, not
//! a pile of `if` chains: an ordered list of copy/derive/post entries
//! walked in declared order. Order is part of the contract: whether a
//! study is CASL must be known before the bolus duration can be chosen,
//! and the phase-encode direction before an echo spacing can be
//! back-calculated from a readout time. Keeping the rules in one table per
//! category makes that ordering visible and testable.
//!
//! ## Absence is Meaningful
//!
//! A derivation that produces nothing binds nothing. Downstream code
//! treats a missing option as "unset", never as a default value; a PASL
//! study has no `casl` option at all rather than `casl = false`. This
//! mirrors how the external tools interpret their command lines, where an
//! absent flag and a flag set to false are different things.
//!
//! ## Strict Where Physics Depends on It
//!
//! Metadata fields that feed physical computations (labeling type, phase
//! encoding, image shape) are required: a missing one fails the mapping
//! call rather than guessing. Distortion-correction parameters computed
//! from a wrong guess corrupt results silently, which is far worse than a
//! loud error naming the missing field.
//!
//! ## Commands are Values
//!
//! Every external invocation is built as a plain argv vector by a pure
//! function, then handed to a [`submit::Runner`]. The production runner
//! spawns the process; tests substitute a recorder. Cluster submission is
//! a wrapper around the same vector, so the same construction code serves
//! direct, cluster and dry-run modes.

pub mod config;
pub mod dispatch;
pub mod mappings;
pub mod naming;
pub mod output;
pub mod scan;
pub mod sidecar;
pub mod submit;
