//! Retrieval backends.
//!
//! [`QaData`] is the one interface the test suites see: every getter takes a
//! (possibly wildcarded) dataId and returns a map keyed by canonical
//! concrete key, one entry per matched detector. Two implementations exist,
//! one reading a file repository ([`butler::ButlerQaData`]) and one reading
//! a pipeline database ([`db::DbQaData`]); [`make_qa_data`] picks between
//! them.
//!
//! All getters take `&mut self`: retrieval fills the memoizers in
//! [`QaCache`], and repeated queries are answered from there. Callers that
//! want parallelism hold one `QaData` per worker; the caches are
//! per-instance and never shared.

pub mod butler;
pub mod db;

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::cache::{KeyedMap, Memoizer};
use crate::calexp::{CalexpData, CalexpEntry};
use crate::calib::Calib;
use crate::camera::{CameraInfo, DetectorInfo};
use crate::dataid::{DataId, IdTuple};
use crate::error::{QaError, Result};
use crate::query::{self, Granularity};
use crate::records::{MatchSet, RefKind, RefObjectSet, SourceSet};
use crate::wcs::TanWcs;

// ── The retrieval interface ─────────────────────────────────────────────────

/// Uniform retrieval interface over any pipeline-output store.
pub trait QaData {
    fn camera(&self) -> &CameraInfo;

    /// Human-readable name of the dataset (rerun) being read.
    fn label(&self) -> &str;

    /// All visit values with data matching the query, sorted.
    fn visits(&mut self, query: &DataId) -> Result<Vec<String>>;

    /// Matched identifiers collapsed to the given granularity.
    fn break_data_id(&mut self, query: &DataId, granularity: Granularity) -> Result<Vec<DataId>>;

    /// True when at least one identifier matches the query.
    fn verify(&mut self, query: &DataId) -> Result<bool> {
        Ok(!self.break_data_id(query, Granularity::Ccd)?.is_empty())
    }

    fn source_set_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<SourceSet>>;

    fn match_list_by_sensor(
        &mut self,
        query: &DataId,
        kind: RefKind,
    ) -> Result<KeyedMap<MatchSet>>;

    fn ref_object_set_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<RefObjectSet>>;

    fn detector_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<DetectorInfo>>;

    fn calexp_entry_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<CalexpEntry>>;

    fn wcs_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<TanWcs>>;

    fn calib_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<Calib>>;

    fn filter_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<String>>;

    /// Drop every memoized result.
    fn clear_cache(&mut self);
}

// ── Shared cache bundle ─────────────────────────────────────────────────────

/// Per-kind memoizers shared by both backends.
#[derive(Default)]
pub struct QaCache {
    pub sources: Memoizer<SourceSet>,
    pub matches_obj: Memoizer<MatchSet>,
    pub matches_src: Memoizer<MatchSet>,
    pub refs: Memoizer<RefObjectSet>,
    pub calexp: Memoizer<CalexpData>,
}

impl QaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&mut self, kind: RefKind) -> &mut Memoizer<MatchSet> {
        match kind {
            RefKind::Object => &mut self.matches_obj,
            RefKind::Source => &mut self.matches_src,
        }
    }

    pub fn clear(&mut self) {
        self.sources.clear();
        self.matches_obj.clear();
        self.matches_src.clear();
        self.refs.clear();
        self.calexp.clear();
    }
}

/// The resolved targets of one query: its as-supplied key plus every
/// matching concrete identifier with its canonical key.
pub struct QueryPlan {
    pub query_key: String,
    pub targets: Vec<(String, DataId)>,
}

impl QueryPlan {
    pub fn wanted(&self) -> BTreeSet<String> {
        self.targets.iter().map(|(k, _)| k.clone()).collect()
    }
}

/// Resolve a query against the repository listing into concrete targets.
pub fn plan_query(camera: &CameraInfo, query: &DataId, known: &[IdTuple]) -> Result<QueryPlan> {
    let schema = camera.schema();
    let query_key = query.to_key(schema, false);
    let mut targets = Vec::new();
    for tuple in query::select_ids(camera, query, known)? {
        let id = DataId::from_tuple(schema, &tuple)?;
        let key = id.to_key(schema, true);
        targets.push((key, id));
    }
    Ok(QueryPlan { query_key, targets })
}

/// Resolve detector identities for every target of a plan. Detectors the
/// camera cannot name (missing geometry, unknown serial) are logged and
/// left out of the map.
pub(crate) fn detectors_for_plan(camera: &CameraInfo, plan: &QueryPlan) -> KeyedMap<DetectorInfo> {
    let mut out = KeyedMap::new();
    for (key, id) in &plan.targets {
        match camera.detector_info(id) {
            Ok(info) => {
                out.insert(key.clone(), info);
            }
            Err(e) => warn!(key = key.as_str(), error = %e, "cannot resolve detector"),
        }
    }
    out
}

/// Visit values sort numerically where they parse, lexicographically
/// otherwise (composite visit schemes).
pub(crate) fn sort_visit_values(values: BTreeSet<String>) -> Vec<String> {
    let mut out: Vec<String> = values.into_iter().collect();
    out.sort_by_key(|v| (v.parse::<i64>().ok(), v.clone()));
    out
}

/// Drop reference objects that project outside the detector's usable area.
/// Without exposure geometry the set passes through unfiltered.
pub(crate) fn refs_inside_detector(set: &RefObjectSet, calexp: Option<&CalexpData>) -> RefObjectSet {
    match calexp {
        Some(data) => {
            let (w, h) = (data.entry.width, data.entry.height);
            set.iter()
                .filter(|r| !data.wcs.at_edge(r.ra, r.dec, w, h))
                .cloned()
                .collect()
        }
        None => set.clone(),
    }
}

// ── Factory ─────────────────────────────────────────────────────────────────

/// How pipeline outputs are stored.
#[derive(Debug, Clone)]
pub enum RetrievalKind {
    /// A file repository rooted at this path.
    Butler { root: PathBuf },
    /// A named pipeline database, located through the credentials file.
    Db { database: String },
}

/// Build the right backend for a dataset label.
pub fn make_qa_data(
    label: &str,
    kind: RetrievalKind,
    camera: CameraInfo,
) -> Result<Box<dyn QaData>> {
    match kind {
        RetrievalKind::Butler { root } => {
            info!(label, root = %root.display(), camera = camera.name(), "opening file repository");
            if !root.is_dir() {
                return Err(QaError::Config(format!(
                    "repository root {} does not exist",
                    root.display()
                )));
            }
            let repo = butler::DiskRepository::open(root, camera.schema().clone())?;
            Ok(Box::new(butler::ButlerQaData::new(camera, repo).with_label(label)))
        }
        RetrievalKind::Db { database } => {
            info!(label, database, camera = camera.name(), "opening pipeline database");
            let auth = db::DbAuth::load_default()?;
            let exec = db::connect(&database, &auth)?;
            Ok(Box::new(db::DbQaData::new(camera, exec).with_label(label)))
        }
    }
}
