//! # pipeqa
//!
//! Data-access layer for **quality analysis of survey image-processing
//! pipelines**.
//!
//! A pipeline run leaves behind catalogs, match lists, and calibrated
//! exposures for thousands of detectors, stored either as a file repository
//! or loaded into a per-rerun database. QA test suites need to pull slices
//! of that output by exposure and detector, repeatedly and cheaply. This
//! crate provides that retrieval layer: identifier translation between
//! camera conventions, wildcard queries against what a run actually
//! produced, and aggressive memoization so a suite of tests touching the
//! same detectors pays for each load once.
//!
//! ## Example
//!
//! ```no_run
//! use pipeqa::{make_qa_data, CameraInfo, DataId, RefKind, RetrievalKind};
//!
//! let camera = CameraInfo::hsc(None);
//! let mut qa = make_qa_data(
//!     "rerun-2013b",
//!     RetrievalKind::Butler { root: "/data/rerun-2013b".into() },
//!     camera,
//! ).unwrap();
//!
//! // All science detectors of one visit; guide CCDs are excluded
//! // automatically.
//! let query = DataId::from_pairs([("visit", "1236"), ("ccd", ".*")]).unwrap();
//! for (key, sources) in qa.source_set_by_sensor(&query).unwrap() {
//!     println!("{key}: {} sources", sources.len());
//! }
//!
//! // Matched/blended/orphan/undetected classification per detector.
//! for (key, matches) in qa.match_list_by_sensor(&query, RefKind::Object).unwrap() {
//!     println!("{key}: {} matched, {} undetected",
//!         matches.matched.len(), matches.undetected.len());
//! }
//! ```
//!
//! ## Retrieval pipeline
//!
//! 1. **Translate** — the query's standard field names are rewritten into
//!    the camera's native identifier scheme ([`CameraInfo`])
//! 2. **Select** — wildcard constraints are evaluated against the run's
//!    identifier listing, applying per-camera exclusions ([`query`])
//! 3. **Check the caches** — each query records the exact set of concrete
//!    identifiers that satisfied it; a new query is answered from memory
//!    when its resolved set is already loaded ([`cache`])
//! 4. **Fetch** — misses go to the backend, file repository or database,
//!    and land in the per-detector caches ([`backend`])
//! 5. **Derive** — calibrations, WCS transforms, and match classifications
//!    are computed once per detector and memoized with the raw data

pub mod backend;
pub mod cache;
pub mod calexp;
pub mod calib;
pub mod camera;
pub mod classify;
pub mod dataid;
pub mod error;
pub mod query;
pub mod records;
pub mod wcs;

pub use backend::butler::{ButlerQaData, DiskRepository, Repository};
pub use backend::db::{DbAuth, DbQaData, SqlExecutor, SqlValue, SqliteExecutor};
pub use backend::{make_qa_data, QaData, RetrievalKind};
pub use calexp::{CalexpData, CalexpEntry, CalexpHeader};
pub use calib::{Calib, ZeropointSource};
pub use camera::{CameraInfo, DetectorInfo, FocalPlaneGeometry};
pub use dataid::{DataId, DataIdSchema, IdValue};
pub use error::{QaError, Result};
pub use query::Granularity;
pub use records::{
    FilterBand, MatchSet, MatchedPair, RawMatch, RefKind, RefObject, RefObjectSet, SourceRecord,
    SourceSet,
};
pub use wcs::TanWcs;
