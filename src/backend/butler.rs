//! File-repository backend.
//!
//! A repository is a directory tree with a `registry.csv` listing every
//! identifier the pipeline produced (one column per identifier field, in the
//! camera's field order) and one subdirectory per identifier, named by its
//! canonical key, holding the per-detector products:
//!
//! ```text
//! root/
//!   registry.csv
//!   visit1000-snap0-raft22-sensor11/
//!     sources.csv      detected sources
//!     matches_obj.csv  raw matches against the object catalog
//!     matches_src.csv  raw matches against another visit's sources
//!     refs.csv         reference objects overlapping the detector
//!     calexp.json      calibrated-exposure header
//!     mosaic.json      externally-fit zero point, when present
//! ```
//!
//! [`ButlerQaData`] layers the memoizers over any [`Repository`], so tests
//! drive it with an in-memory store.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::KeyedMap;
use crate::calexp::{CalexpData, CalexpEntry, CalexpHeader};
use crate::calib::Calib;
use crate::camera::{CameraInfo, DetectorInfo};
use crate::classify::classify_raw_matches;
use crate::dataid::{DataId, DataIdSchema, IdTuple};
use crate::error::{QaError, Result};
use crate::query::Granularity;
use crate::records::{
    FilterBand, MatchSet, RawMatch, RefKind, RefObject, RefObjectSet, SourceSet,
};
use crate::wcs::TanWcs;

use super::{plan_query, QaCache, QaData, QueryPlan};

// ── Repository abstraction ──────────────────────────────────────────────────

/// Read access to pipeline products for concrete identifiers. `None` means
/// the product was never written for that identifier.
pub trait Repository {
    /// Every identifier the pipeline produced, schema-ordered.
    fn known_ids(&self) -> Result<Vec<IdTuple>>;

    fn source_catalog(&self, id: &DataId) -> Result<Option<SourceSet>>;

    fn match_pairs(&self, id: &DataId, kind: RefKind) -> Result<Option<Vec<RawMatch>>>;

    fn ref_objects(&self, id: &DataId) -> Result<Option<RefObjectSet>>;

    fn calexp_header(&self, id: &DataId) -> Result<Option<CalexpHeader>>;

    /// Externally-fit `(flux_mag0, flux_mag0_err)`, when a mosaic solution
    /// was computed for this identifier.
    fn mosaic_zeropoint(&self, id: &DataId) -> Result<Option<(f64, f64)>>;
}

// ── Disk repository ─────────────────────────────────────────────────────────

/// Reference-object row as stored on disk (per-band magnitude columns).
#[derive(Debug, Serialize, Deserialize)]
struct RefRow {
    id: i64,
    ra: f64,
    dec: f64,
    is_star: bool,
    u_mag: f64,
    g_mag: f64,
    r_mag: f64,
    i_mag: f64,
    z_mag: f64,
    y_mag: f64,
}

impl From<RefRow> for RefObject {
    fn from(r: RefRow) -> RefObject {
        RefObject {
            id: r.id,
            ra: r.ra,
            dec: r.dec,
            is_star: r.is_star,
            mags: [r.u_mag, r.g_mag, r.r_mag, r.i_mag, r.z_mag, r.y_mag],
        }
    }
}

impl From<&RefObject> for RefRow {
    fn from(r: &RefObject) -> RefRow {
        RefRow {
            id: r.id,
            ra: r.ra,
            dec: r.dec,
            is_star: r.is_star,
            u_mag: r.mag(FilterBand::U),
            g_mag: r.mag(FilterBand::G),
            r_mag: r.mag(FilterBand::R),
            i_mag: r.mag(FilterBand::I),
            z_mag: r.mag(FilterBand::Z),
            y_mag: r.mag(FilterBand::Y),
        }
    }
}

/// [`Repository`] over the on-disk layout described in the module docs.
pub struct DiskRepository {
    root: PathBuf,
    schema: DataIdSchema,
}

impl DiskRepository {
    pub fn open(root: PathBuf, schema: DataIdSchema) -> Result<Self> {
        if !root.join("registry.csv").is_file() {
            return Err(QaError::Config(format!(
                "{} has no registry.csv",
                root.display()
            )));
        }
        Ok(DiskRepository { root, schema })
    }

    fn id_dir(&self, id: &DataId) -> Result<PathBuf> {
        // Concrete ids always key cleanly; the tuple check catches misuse.
        id.to_tuple(&self.schema)?;
        Ok(self.root.join(id.to_key(&self.schema, true)))
    }

    fn read_csv<T: for<'de> Deserialize<'de>>(&self, path: &PathBuf) -> Result<Option<Vec<T>>> {
        if !path.is_file() {
            return Ok(None);
        }
        let mut rdr = csv::Reader::from_path(path)?;
        let mut out = Vec::new();
        for row in rdr.deserialize() {
            out.push(row?);
        }
        Ok(Some(out))
    }
}

impl Repository for DiskRepository {
    fn known_ids(&self) -> Result<Vec<IdTuple>> {
        let path = self.root.join("registry.csv");
        let mut rdr = csv::Reader::from_path(&path)?;
        let n_fields = self.schema.fields().len();
        if rdr.headers()?.len() != n_fields {
            return Err(QaError::Config(format!(
                "registry.csv has {} columns, camera declares {} identifier fields",
                rdr.headers()?.len(),
                n_fields
            )));
        }
        let mut out = Vec::new();
        for row in rdr.records() {
            let row = row?;
            out.push(row.iter().map(str::to_string).collect());
        }
        Ok(out)
    }

    fn source_catalog(&self, id: &DataId) -> Result<Option<SourceSet>> {
        self.read_csv(&self.id_dir(id)?.join("sources.csv"))
    }

    fn match_pairs(&self, id: &DataId, kind: RefKind) -> Result<Option<Vec<RawMatch>>> {
        let file = format!("matches_{}.csv", kind.label());
        self.read_csv(&self.id_dir(id)?.join(file))
    }

    fn ref_objects(&self, id: &DataId) -> Result<Option<RefObjectSet>> {
        let rows: Option<Vec<RefRow>> = self.read_csv(&self.id_dir(id)?.join("refs.csv"))?;
        Ok(rows.map(|rows| rows.into_iter().map(RefObject::from).collect()))
    }

    fn calexp_header(&self, id: &DataId) -> Result<Option<CalexpHeader>> {
        let path = self.id_dir(id)?.join("calexp.json");
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn mosaic_zeropoint(&self, id: &DataId) -> Result<Option<(f64, f64)>> {
        let path = self.id_dir(id)?.join("mosaic.json");
        if !path.is_file() {
            return Ok(None);
        }
        #[derive(Deserialize)]
        struct Mosaic {
            flux_mag0: f64,
            #[serde(default)]
            flux_mag0_err: f64,
        }
        let text = fs::read_to_string(path)?;
        let m: Mosaic = serde_json::from_str(&text)?;
        Ok(Some((m.flux_mag0, m.flux_mag0_err)))
    }
}

// ── The backend proper ──────────────────────────────────────────────────────

/// Memoizing retrieval over any [`Repository`].
pub struct ButlerQaData<R: Repository> {
    camera: CameraInfo,
    repo: R,
    cache: QaCache,
    known: Option<Vec<IdTuple>>,
    label: Option<String>,
}

impl<R: Repository> ButlerQaData<R> {
    pub fn new(camera: CameraInfo, repo: R) -> Self {
        ButlerQaData { camera, repo, cache: QaCache::new(), known: None, label: None }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn plan(&mut self, query: &DataId) -> Result<QueryPlan> {
        if self.known.is_none() {
            let ids = self.repo.known_ids()?;
            info!(count = ids.len(), camera = self.camera.name(), "repository listing loaded");
            self.known = Some(ids);
        }
        plan_query(&self.camera, query, self.known.as_deref().unwrap_or(&[]))
    }

    /// Fill the source memoizer for a plan's targets.
    fn ensure_sources(&mut self, plan: &QueryPlan) -> Result<()> {
        let wanted = plan.wanted();
        if self.cache.sources.resolve(&plan.query_key, &wanted).is_some() {
            return Ok(());
        }
        self.ensure_calexp(plan)?;
        for (key, id) in &plan.targets {
            if self.cache.sources.contains(key) {
                continue;
            }
            let mut set = self.repo.source_catalog(id)?.unwrap_or_default();
            match self.cache.calexp.get(key).map(|d| d.calib) {
                Some(calib) => {
                    for rec in &mut set {
                        calib.apply(rec);
                    }
                }
                None => warn!(key = key.as_str(), "no zero point; fluxes stay instrumental"),
            }
            debug!(key = key.as_str(), sources = set.len(), "source catalog loaded");
            self.cache.sources.insert(key.clone(), set);
        }
        self.cache.sources.mark_done(plan.query_key.clone(), wanted);
        Ok(())
    }

    fn ensure_refs(&mut self, plan: &QueryPlan) -> Result<()> {
        let wanted = plan.wanted();
        if self.cache.refs.resolve(&plan.query_key, &wanted).is_some() {
            return Ok(());
        }
        for (key, id) in &plan.targets {
            if self.cache.refs.contains(key) {
                continue;
            }
            let set = self.repo.ref_objects(id)?.unwrap_or_default();
            self.cache.refs.insert(key.clone(), set);
        }
        self.cache.refs.mark_done(plan.query_key.clone(), wanted);
        Ok(())
    }

    /// Fill the calexp memoizer. Identifiers whose exposure cannot be
    /// summarized are logged and skipped; the done-set records only what
    /// actually loaded, so they are retried on the next query.
    fn ensure_calexp(&mut self, plan: &QueryPlan) -> Result<()> {
        let wanted = plan.wanted();
        if self.cache.calexp.resolve(&plan.query_key, &wanted).is_some() {
            return Ok(());
        }
        for (key, id) in &plan.targets {
            if self.cache.calexp.contains(key) {
                continue;
            }
            let Some(header) = self.repo.calexp_header(id)? else {
                warn!(key = key.as_str(), "no calibrated exposure for identifier");
                continue;
            };
            let mosaic = self.repo.mosaic_zeropoint(id)?;
            match CalexpData::from_header(&header, mosaic) {
                Ok(data) => self.cache.calexp.insert(key.clone(), data),
                Err(e) => warn!(key = key.as_str(), error = %e, "unusable calibrated exposure"),
            }
        }
        let satisfied: BTreeSet<String> = wanted
            .into_iter()
            .filter(|k| self.cache.calexp.contains(k))
            .collect();
        self.cache.calexp.mark_done(plan.query_key.clone(), satisfied);
        Ok(())
    }

    fn collect_calexp<T>(&mut self, query: &DataId, f: impl Fn(&CalexpData) -> T) -> Result<KeyedMap<T>> {
        let plan = self.plan(query)?;
        self.ensure_calexp(&plan)?;
        let mut out = KeyedMap::new();
        for key in plan.wanted() {
            if let Some(data) = self.cache.calexp.get(&key) {
                out.insert(key, f(data));
            }
        }
        Ok(out)
    }
}

impl<R: Repository> QaData for ButlerQaData<R> {
    fn camera(&self) -> &CameraInfo {
        &self.camera
    }

    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(self.camera.name())
    }

    fn visits(&mut self, query: &DataId) -> Result<Vec<String>> {
        let ids = self.break_data_id(query, Granularity::Visit)?;
        let mut out = BTreeSet::new();
        for id in ids {
            let std_id = self.camera.native_to_standard(&id)?;
            if let Some(v) = std_id.get("visit") {
                out.insert(v.to_string());
            }
        }
        Ok(super::sort_visit_values(out))
    }

    fn break_data_id(&mut self, query: &DataId, granularity: Granularity) -> Result<Vec<DataId>> {
        if self.known.is_none() {
            self.plan(query)?;
        }
        crate::query::break_data_id(
            &self.camera,
            query,
            self.known.as_deref().unwrap_or(&[]),
            granularity,
        )
    }

    fn source_set_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<SourceSet>> {
        let plan = self.plan(query)?;
        self.ensure_sources(&plan)?;
        let mut out = KeyedMap::new();
        for key in plan.wanted() {
            if let Some(set) = self.cache.sources.get(&key) {
                out.insert(key, set.clone());
            }
        }
        Ok(out)
    }

    fn match_list_by_sensor(
        &mut self,
        query: &DataId,
        kind: RefKind,
    ) -> Result<KeyedMap<MatchSet>> {
        let plan = self.plan(query)?;
        self.ensure_sources(&plan)?;
        self.ensure_refs(&plan)?;

        let wanted = plan.wanted();
        if self.cache.matches(kind).resolve(&plan.query_key, &wanted).is_none() {
            for (key, id) in &plan.targets {
                if self.cache.matches(kind).contains(key) {
                    continue;
                }
                let raw = self.repo.match_pairs(id, kind)?.unwrap_or_default();
                let sources = self.cache.sources.get(key).cloned().unwrap_or_default();
                let refs = self.cache.refs.get(key).cloned().unwrap_or_default();
                let set = classify_raw_matches(&raw, &sources, &refs);
                self.cache.matches(kind).insert(key.clone(), set);
            }
            self.cache.matches(kind).mark_done(plan.query_key.clone(), wanted.clone());
        }

        let mut out = KeyedMap::new();
        for key in wanted {
            if let Some(set) = self.cache.matches(kind).get(&key) {
                out.insert(key, set.clone());
            }
        }
        Ok(out)
    }

    fn ref_object_set_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<RefObjectSet>> {
        let plan = self.plan(query)?;
        self.ensure_refs(&plan)?;

        // Reference objects inside the edge border are not recoverable by
        // detection; drop them when the exposure geometry is available.
        self.ensure_calexp(&plan)?;

        let mut out = KeyedMap::new();
        for key in plan.wanted() {
            let Some(set) = self.cache.refs.get(&key) else { continue };
            let filtered = super::refs_inside_detector(set, self.cache.calexp.get(&key));
            out.insert(key, filtered);
        }
        Ok(out)
    }

    fn detector_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<DetectorInfo>> {
        let plan = self.plan(query)?;
        Ok(super::detectors_for_plan(&self.camera, &plan))
    }

    fn calexp_entry_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<CalexpEntry>> {
        self.collect_calexp(query, |d| d.entry.clone())
    }

    fn wcs_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<TanWcs>> {
        self.collect_calexp(query, |d| d.wcs.clone())
    }

    fn calib_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<Calib>> {
        self.collect_calexp(query, |d| d.calib)
    }

    fn filter_by_sensor(&mut self, query: &DataId) -> Result<KeyedMap<String>> {
        self.collect_calexp(query, |d| d.entry.filter.clone())
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
        self.known = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SourceRecord;
    use std::io::Write;

    fn write_repo(dir: &std::path::Path) {
        let mut reg = fs::File::create(dir.join("registry.csv")).unwrap();
        writeln!(reg, "visit,ccd").unwrap();
        writeln!(reg, "1000,5").unwrap();
        writeln!(reg, "1000,50").unwrap();

        for (key, n_src) in [("visit1000-ccd5", 2usize), ("visit1000-ccd50", 1usize)] {
            let sub = dir.join(key);
            fs::create_dir(&sub).unwrap();
            let mut w = csv::Writer::from_path(sub.join("sources.csv")).unwrap();
            for i in 0..n_src {
                w.serialize(SourceRecord { id: i as i64 + 1, ..SourceRecord::default() })
                    .unwrap();
            }
            w.flush().unwrap();
            fs::write(
                sub.join("calexp.json"),
                r#"{"width": 2048.0, "height": 4096.0, "filter": "i",
                    "crval": [150.0, 2.0], "crpix": [1024.0, 2048.0],
                    "cd": [[5.5e-5, 0.0], [0.0, 5.5e-5]],
                    "flux_mag0": 1.0e10}"#,
            )
            .unwrap();
        }
    }

    fn open_backend(dir: &std::path::Path) -> ButlerQaData<DiskRepository> {
        let camera = CameraInfo::hsc(None);
        let repo = DiskRepository::open(dir.to_path_buf(), camera.schema().clone()).unwrap();
        ButlerQaData::new(camera, repo)
    }

    #[test]
    fn sources_retrieved_per_sensor() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let mut qa = open_backend(dir.path());

        let q = DataId::from_pairs([("visit", "1000"), ("ccd", ".*")]).unwrap();
        let sets = qa.source_set_by_sensor(&q).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets["visit1000-ccd5"].len(), 2);
        assert_eq!(sets["visit1000-ccd50"].len(), 1);
    }

    #[test]
    fn narrow_query_after_broad_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let mut qa = open_backend(dir.path());

        let broad = DataId::from_pairs([("visit", "1000"), ("ccd", ".*")]).unwrap();
        qa.source_set_by_sensor(&broad).unwrap();

        // The repository directory can now disappear; the narrow query is
        // answered entirely from cache.
        fs::remove_dir_all(dir.path().join("visit1000-ccd5")).unwrap();
        let narrow = DataId::from_pairs([("visit", "1000"), ("ccd", "5")]).unwrap();
        let sets = qa.source_set_by_sensor(&narrow).unwrap();
        assert_eq!(sets["visit1000-ccd5"].len(), 2);
    }

    #[test]
    fn clear_cache_forces_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let mut qa = open_backend(dir.path());

        let q = DataId::from_pairs([("visit", "1000"), ("ccd", "5")]).unwrap();
        qa.source_set_by_sensor(&q).unwrap();
        qa.clear_cache();
        fs::remove_dir_all(dir.path().join("visit1000-ccd5")).unwrap();

        // Reload sees the product gone and yields an empty catalog.
        let sets = qa.source_set_by_sensor(&q).unwrap();
        assert!(sets["visit1000-ccd5"].is_empty());
    }

    #[test]
    fn calexp_summary_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let mut qa = open_backend(dir.path());

        let q = DataId::from_pairs([("visit", "1000"), ("ccd", "5")]).unwrap();
        let filters = qa.filter_by_sensor(&q).unwrap();
        assert_eq!(filters["visit1000-ccd5"], "i");
        let entries = qa.calexp_entry_by_sensor(&q).unwrap();
        assert!((entries["visit1000-ccd5"].zeropoint - 25.0).abs() < 1e-9);
    }

    #[test]
    fn visits_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let mut qa = open_backend(dir.path());

        let all = DataId::from_pairs([("visit", ".*")]).unwrap();
        assert_eq!(qa.visits(&all).unwrap(), vec!["1000"]);
        assert!(qa.verify(&all).unwrap());
        let missing = DataId::from_pairs([("visit", "9999")]).unwrap();
        assert!(!qa.verify(&missing).unwrap());
    }

    #[test]
    fn match_list_classifies_against_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path());
        let sub = dir.path().join("visit1000-ccd5");

        let mut w = csv::Writer::from_path(sub.join("refs.csv")).unwrap();
        for id in [10i64, 11] {
            w.serialize(RefRow::from(&RefObject {
                id,
                ra: 150.0,
                dec: 2.0,
                ..RefObject::default()
            }))
            .unwrap();
        }
        w.flush().unwrap();

        let mut w = csv::Writer::from_path(sub.join("matches_obj.csv")).unwrap();
        w.serialize(RawMatch { ref_id: 10, src_id: 1, distance: 1e-6 }).unwrap();
        w.flush().unwrap();

        let mut qa = open_backend(dir.path());
        let q = DataId::from_pairs([("visit", "1000"), ("ccd", "5")]).unwrap();
        let sets = qa.match_list_by_sensor(&q, RefKind::Object).unwrap();
        let set = &sets["visit1000-ccd5"];
        assert_eq!(set.matched.len(), 1);
        assert_eq!(set.undetected.len(), 1);
        assert_eq!(set.undetected[0].id, 11);
        // source 2 never matched
        assert_eq!(set.orphan.len(), 1);
        assert_eq!(set.orphan[0].id, 2);
    }
}
