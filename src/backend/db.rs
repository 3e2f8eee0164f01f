//! Pipeline-database backend.
//!
//! Some sites load pipeline outputs into per-rerun SQL databases instead of
//! keeping file repositories. The schema is one row per detector in `frame`
//! (exposure metadata and WCS/zero-point keywords) with child tables
//! `frame_sourcelist`, `frame_matchlist`, and `frame_refobject` keyed by the
//! same identifier columns. Suprime-Cam reruns use the `_sup` table suffix.
//!
//! SQL generation is confined to this module: the narrow [`SqlExecutor`]
//! trait returns untyped rows, [`SqliteExecutor`] is the concrete dialect
//! (retrying once across a reconnect on failure), and tests script their own
//! executor. Wildcard identifier values become `LIKE` patterns; everything
//! a query matches is fetched in one statement and distributed into the
//! per-detector caches.

use std::collections::BTreeSet;
use std::path::PathBuf;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::KeyedMap;
use crate::calexp::{CalexpData, CalexpEntry, CalexpHeader};
use crate::calib::Calib;
use crate::camera::{CameraInfo, DetectorInfo};
use crate::classify::classify_raw_matches;
use crate::dataid::{DataId, IdValue, IdTuple};
use crate::error::{QaError, Result};
use crate::query::Granularity;
use crate::records::{
    MatchSet, RawMatch, RefKind, RefObject, RefObjectSet, SourceRecord, SourceSet,
};
use crate::wcs::TanWcs;

use super::{plan_query, QaCache, QaData, QueryPlan};

// ── Values and executors ────────────────────────────────────────────────────

/// One cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> i64 {
        match self {
            SqlValue::Int(v) => *v,
            SqlValue::Real(v) => *v as i64,
            SqlValue::Text(t) => t.parse().unwrap_or(0),
            SqlValue::Null => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            SqlValue::Int(v) => *v as f64,
            SqlValue::Real(v) => *v,
            SqlValue::Text(t) => t.parse().unwrap_or(f64::NAN),
            SqlValue::Null => f64::NAN,
        }
    }

    pub fn as_opt_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Null => None,
            other => Some(other.as_f64()),
        }
    }

    pub fn as_bool(&self) -> bool {
        self.as_i64() != 0
    }

    pub fn as_string(&self) -> String {
        match self {
            SqlValue::Text(t) => t.clone(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Real(v) => v.to_string(),
            SqlValue::Null => String::new(),
        }
    }
}

/// Minimal query surface the backend needs from a database.
pub trait SqlExecutor {
    fn execute(&mut self, sql: &str) -> Result<Vec<Vec<SqlValue>>>;
}

/// [`SqlExecutor`] over a SQLite database file. A failed statement is
/// retried once on a fresh connection before the error propagates.
pub struct SqliteExecutor {
    path: PathBuf,
    conn: Connection,
}

impl SqliteExecutor {
    pub fn open(path: PathBuf) -> Result<Self> {
        let conn = Connection::open(&path)?;
        Ok(SqliteExecutor { path, conn })
    }

    fn run(&self, sql: &str) -> rusqlite::Result<Vec<Vec<SqlValue>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ncols = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut vals = Vec::with_capacity(ncols);
            for i in 0..ncols {
                vals.push(match row.get_ref(i)? {
                    ValueRef::Null => SqlValue::Null,
                    ValueRef::Integer(v) => SqlValue::Int(v),
                    ValueRef::Real(v) => SqlValue::Real(v),
                    ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(_) => SqlValue::Null,
                });
            }
            out.push(vals);
        }
        Ok(out)
    }
}

impl SqlExecutor for SqliteExecutor {
    fn execute(&mut self, sql: &str) -> Result<Vec<Vec<SqlValue>>> {
        match self.run(sql) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!(error = %e, "statement failed, reconnecting");
                self.conn = Connection::open(&self.path)?;
                Ok(self.run(sql)?)
            }
        }
    }
}

// ── Credentials ─────────────────────────────────────────────────────────────

/// Site configuration for database access, read from
/// `~/.pipeqa/db-auth.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct DbAuth {
    /// Directory holding one `<name>.db` file per rerun database.
    pub database_dir: PathBuf,
}

impl DbAuth {
    pub fn load_default() -> Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| QaError::Config("HOME not set; cannot locate db-auth.json".to_string()))?;
        Self::load(PathBuf::from(home).join(".pipeqa").join("db-auth.json"))
    }

    pub fn load(path: PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .map_err(|source| QaError::Credentials { path, source })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Open the executor for a named rerun database.
pub fn connect(database: &str, auth: &DbAuth) -> Result<SqliteExecutor> {
    let path = auth.database_dir.join(format!("{database}.db"));
    if !path.is_file() {
        return Err(QaError::Config(format!("no database at {}", path.display())));
    }
    SqliteExecutor::open(path)
}

// ── SQL generation ──────────────────────────────────────────────────────────

/// Render one identifier constraint as SQL, `None` when unconstrained.
/// Exact values compare with `=`; patterns become `LIKE` with `%`.
pub fn sql_like_equal(column: &str, value: &IdValue) -> Option<String> {
    match value {
        IdValue::Any => None,
        IdValue::Exact(v) => Some(format!("{column} = '{}'", sql_escape(v))),
        IdValue::Pattern { prefix, suffix } => Some(format!(
            "{column} LIKE '{}%{}'",
            sql_escape(prefix),
            sql_escape(suffix)
        )),
    }
}

fn sql_escape(v: &str) -> String {
    v.replace('\'', "''")
}

/// Non-identifier columns selected from `frame`, in order.
const FRAME_COLS: &[&str] = &[
    "width", "height", "filter", "date_obs", "exptime", "airmass", "seeing", "skylevel",
    "sigma_sky", "crval1", "crval2", "crpix1", "crpix2", "cd1_1", "cd1_2", "cd2_1", "cd2_2",
    "fluxmag0", "fluxmag0_err", "magzero", "magzero_rms", "mosaic_fluxmag0",
    "mosaic_fluxmag0_err",
];

const SOURCE_COLS: &[&str] = &[
    "id", "ra", "decl", "x", "y", "psfflux", "psfflux_err", "apflux", "apflux_err", "modelflux",
    "modelflux_err", "instflux", "instflux_err", "ixx", "iyy", "ixy", "flag_interp_cen",
    "flag_sat_cen", "flag_edge", "flag_neg", "flag_badcentroid", "deblend_nchild", "extendedness",
];

const REF_COLS: &[&str] = &[
    "id", "ra", "decl", "is_star", "u_mag", "g_mag", "r_mag", "i_mag", "z_mag", "y_mag",
];

const MATCH_COLS: &[&str] = &["ref_id", "src_id", "distance"];

fn source_from_row(cols: &[SqlValue]) -> SourceRecord {
    SourceRecord {
        id: cols[0].as_i64(),
        ra: cols[1].as_f64(),
        dec: cols[2].as_f64(),
        x: cols[3].as_f64(),
        y: cols[4].as_f64(),
        psf_flux: cols[5].as_f64(),
        psf_flux_err: cols[6].as_f64(),
        ap_flux: cols[7].as_f64(),
        ap_flux_err: cols[8].as_f64(),
        model_flux: cols[9].as_f64(),
        model_flux_err: cols[10].as_f64(),
        inst_flux: cols[11].as_f64(),
        inst_flux_err: cols[12].as_f64(),
        ixx: cols[13].as_f64(),
        iyy: cols[14].as_f64(),
        ixy: cols[15].as_f64(),
        flag_interp_center: cols[16].as_bool(),
        flag_saturated_center: cols[17].as_bool(),
        flag_edge: cols[18].as_bool(),
        flag_negative: cols[19].as_bool(),
        flag_bad_centroid: cols[20].as_bool(),
        deblend_nchild: cols[21].as_i64() as u32,
        extendedness: cols[22].as_f64(),
    }
}

fn ref_from_row(cols: &[SqlValue]) -> RefObject {
    RefObject {
        id: cols[0].as_i64(),
        ra: cols[1].as_f64(),
        dec: cols[2].as_f64(),
        is_star: cols[3].as_bool(),
        mags: [
            cols[4].as_f64(),
            cols[5].as_f64(),
            cols[6].as_f64(),
            cols[7].as_f64(),
            cols[8].as_f64(),
            cols[9].as_f64(),
        ],
    }
}

fn header_from_row(cols: &[SqlValue]) -> CalexpHeader {
    CalexpHeader {
        width: cols[0].as_f64(),
        height: cols[1].as_f64(),
        filter: cols[2].as_string(),
        date_obs: cols[3].as_string(),
        exptime: cols[4].as_opt_f64(),
        airmass: cols[5].as_opt_f64(),
        fwhm_pix: cols[6].as_opt_f64(),
        sky_level: cols[7].as_opt_f64(),
        sky_sigma: cols[8].as_opt_f64(),
        crval: [cols[9].as_f64(), cols[10].as_f64()],
        crpix: [cols[11].as_f64(), cols[12].as_f64()],
        cd: [
            [cols[13].as_f64(), cols[14].as_f64()],
            [cols[15].as_f64(), cols[16].as_f64()],
        ],
        flux_mag0: cols[17].as_opt_f64(),
        flux_mag0_err: cols[18].as_opt_f64(),
        magzero: cols[19].as_opt_f64(),
        magzero_rms: cols[20].as_opt_f64(),
    }
}

fn mosaic_from_row(cols: &[SqlValue]) -> Option<(f64, f64)> {
    cols[21]
        .as_opt_f64()
        .map(|f0| (f0, cols[22].as_opt_f64().unwrap_or(0.0)))
}

// ── The backend proper ──────────────────────────────────────────────────────

/// Memoizing retrieval over a pipeline database.
pub struct DbQaData<E: SqlExecutor> {
    camera: CameraInfo,
    exec: E,
    cache: QaCache,
    known: Option<Vec<IdTuple>>,
    label: Option<String>,
}

impl<E: SqlExecutor> DbQaData<E> {
    pub fn new(camera: CameraInfo, exec: E) -> Self {
        DbQaData { camera, exec, cache: QaCache::new(), known: None, label: None }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn table(&self, base: &str) -> String {
        let suffix = if self.camera.name() == "suprimecam" { "_sup" } else { "" };
        format!("{base}{suffix}")
    }

    /// Identifier `(native field, column)` pairs in schema order.
    fn id_columns(&self) -> Vec<(&'static str, &'static str)> {
        self.camera.db_columns()
    }

    /// WHERE clause for a query, including the camera's standing exclusions.
    fn where_clause(&self, query: &DataId) -> String {
        let mut terms = Vec::new();
        for (field, col) in self.id_columns() {
            if let Some(v) = query.get(field) {
                if let Some(term) = sql_like_equal(col, v) {
                    terms.push(term);
                }
            }
        }
        if let Some(crate::camera::SensorExclusion::SerialAbove { field, max }) =
            self.camera.exclusion()
        {
            if let Some(col) = self.camera.native_db_name(field) {
                // Serial columns are TEXT; compare numerically.
                terms.push(format!("CAST({col} AS INTEGER) <= {max}"));
            }
        }
        if terms.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", terms.join(" AND "))
        }
    }

    fn select(&mut self, table: &str, payload: &[&str], query: &DataId) -> Result<Vec<Vec<SqlValue>>> {
        let id_cols: Vec<&str> = self.id_columns().iter().map(|(_, c)| *c).collect();
        let all: Vec<&str> = id_cols.iter().chain(payload).copied().collect();
        let sql = format!(
            "SELECT {} FROM {}{}",
            all.join(", "),
            table,
            self.where_clause(query)
        );
        debug!(sql = sql.as_str(), "executing");
        self.exec.execute(&sql)
    }

    /// Canonical key for a result row's identifier columns, `None` when the
    /// row falls outside the query plan (e.g. an excluded detector).
    fn row_key(&self, row: &[SqlValue], wanted: &BTreeSet<String>) -> Result<Option<String>> {
        let schema = self.camera.schema();
        let n_id = self.id_columns().len();
        let tuple = self.row_tuple(&row[..n_id]);
        let key = DataId::from_tuple(schema, &tuple)?.to_key(schema, true);
        Ok(wanted.contains(&key).then_some(key))
    }

    /// Schema-ordered tuple for a row's identifier columns, reinserting the
    /// snap position the database omits.
    fn row_tuple(&self, id_cells: &[SqlValue]) -> IdTuple {
        let schema = self.camera.schema();
        let mut cells = id_cells.iter();
        schema
            .fields()
            .iter()
            .map(|f| {
                if f.name == "snap" {
                    "0".to_string()
                } else {
                    cells.next().map(SqlValue::as_string).unwrap_or_default()
                }
            })
            .collect()
    }

    fn plan(&mut self, query: &DataId) -> Result<QueryPlan> {
        if self.known.is_none() {
            let rows = self.select(&self.table("frame"), &[], &DataId::new())?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(self.row_tuple(&row));
            }
            info!(count = ids.len(), camera = self.camera.name(), "frame listing loaded");
            self.known = Some(ids);
        }
        plan_query(&self.camera, query, self.known.as_deref().unwrap_or(&[]))
    }

    fn ensure_sources(&mut self, plan: &QueryPlan, query: &DataId) -> Result<()> {
        let wanted = plan.wanted();
        if self.cache.sources.resolve(&plan.query_key, &wanted).is_some() {
            return Ok(());
        }
        self.ensure_calexp(plan, query)?;
        let rows = self.select(&self.table("frame_sourcelist"), SOURCE_COLS, query)?;
        let n_id = self.id_columns().len();

        let mut grouped: KeyedMap<SourceSet> = KeyedMap::new();
        for row in rows {
            if let Some(key) = self.row_key(&row, &wanted)? {
                grouped.entry(key).or_default().push(source_from_row(&row[n_id..]));
            }
        }
        for key in &wanted {
            let mut set = grouped.remove(key).unwrap_or_default();
            match self.cache.calexp.get(key).map(|d| d.calib) {
                Some(calib) => {
                    for rec in &mut set {
                        calib.apply(rec);
                    }
                }
                None => warn!(key = key.as_str(), "no zero point; fluxes stay instrumental"),
            }
            self.cache.sources.insert(key.clone(), set);
        }
        self.cache.sources.mark_done(plan.query_key.clone(), wanted);
        Ok(())
    }

    fn ensure_refs(&mut self, plan: &QueryPlan, query: &DataId) -> Result<()> {
        let wanted = plan.wanted();
        if self.cache.refs.resolve(&plan.query_key, &wanted).is_some() {
            return Ok(());
        }
        let rows = self.select(&self.table("frame_refobject"), REF_COLS, query)?;
        let n_id = self.id_columns().len();

        let mut grouped: KeyedMap<RefObjectSet> = KeyedMap::new();
        for row in rows {
            if let Some(key) = self.row_key(&row, &wanted)? {
                grouped.entry(key).or_default().push(ref_from_row(&row[n_id..]));
            }
        }
        for key in &wanted {
            let set = grouped.remove(key).unwrap_or_default();
            self.cache.refs.insert(key.clone(), set);
        }
        self.cache.refs.mark_done(plan.query_key.clone(), wanted);
        Ok(())
    }

    fn ensure_calexp(&mut self, plan: &QueryPlan, query: &DataId) -> Result<()> {
        let wanted = plan.wanted();
        if self.cache.calexp.resolve(&plan.query_key, &wanted).is_some() {
            return Ok(());
        }
        let rows = self.select(&self.table("frame"), FRAME_COLS, query)?;
        let n_id = self.id_columns().len();

        for row in rows {
            let Some(key) = self.row_key(&row, &wanted)? else { continue };
            if self.cache.calexp.contains(&key) {
                continue;
            }
            let header = header_from_row(&row[n_id..]);
            let mosaic = mosaic_from_row(&row[n_id..]);
            match CalexpData::from_header(&header, mosaic) {
                Ok(data) => self.cache.calexp.insert(key, data),
                Err(e) => warn!(key = key.as_str(), error = %e, "unusable frame row"),
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
        self.ensure_calexp(&plan, query)?;
        let mut out = KeyedMap::new();
        for key in plan.wanted() {
            if let Some(data) = self.cache.calexp.get(&key) {
                out.insert(key, f(data));
            }
        }
        Ok(out)
    }
}

impl<E: SqlExecutor> QaData for DbQaData<E> {
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
        self.ensure_sources(&plan, query)?;
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
        self.ensure_sources(&plan, query)?;
        self.ensure_refs(&plan, query)?;

        let wanted = plan.wanted();
        if self.cache.matches(kind).resolve(&plan.query_key, &wanted).is_none() {
            // Only the object table exists server-side; visit-to-visit
            // matches are not loaded into these databases.
            let raw_rows = match kind {
                RefKind::Object => {
                    self.select(&self.table("frame_matchlist"), MATCH_COLS, query)?
                }
                RefKind::Source => Vec::new(),
            };
            let n_id = self.id_columns().len();

            let mut grouped: KeyedMap<Vec<RawMatch>> = KeyedMap::new();
            for row in raw_rows {
                if let Some(key) = self.row_key(&row, &wanted)? {
                    grouped.entry(key).or_default().push(RawMatch {
                        ref_id: row[n_id].as_i64(),
                        src_id: row[n_id + 1].as_i64(),
                        distance: row[n_id + 2].as_f64(),
                    });
                }
            }
            for key in &wanted {
                let raw = grouped.remove(key).unwrap_or_default();
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
        self.ensure_refs(&plan, query)?;
        self.ensure_calexp(&plan, query)?;

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

    #[test]
    fn like_equal_forms() {
        assert_eq!(
            sql_like_equal("visit", &IdValue::Exact("855".into())).unwrap(),
            "visit = '855'"
        );
        assert_eq!(
            sql_like_equal(
                "visit",
                &IdValue::Pattern { prefix: "85".into(), suffix: String::new() }
            )
            .unwrap(),
            "visit LIKE '85%'"
        );
        assert!(sql_like_equal("visit", &IdValue::Any).is_none());
    }

    #[test]
    fn where_clause_includes_exclusion() {
        let qa = DbQaData::new(CameraInfo::hsc(None), NoopExecutor);
        let q = DataId::from_pairs([("visit", "1000"), ("ccd", ".*")]).unwrap();
        assert_eq!(
            qa.where_clause(&q),
            " WHERE visit = '1000' AND CAST(ccdname AS INTEGER) <= 103"
        );
    }

    #[test]
    fn suprimecam_tables_are_suffixed() {
        let qa = DbQaData::new(CameraInfo::suprimecam(None), NoopExecutor);
        assert_eq!(qa.table("frame_sourcelist"), "frame_sourcelist_sup");
        let qa = DbQaData::new(CameraInfo::hsc(None), NoopExecutor);
        assert_eq!(qa.table("frame_sourcelist"), "frame_sourcelist");
    }

    struct NoopExecutor;
    impl SqlExecutor for NoopExecutor {
        fn execute(&mut self, _sql: &str) -> Result<Vec<Vec<SqlValue>>> {
            Ok(Vec::new())
        }
    }

    fn seed_db(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE frame (
                 visit TEXT, ccdname TEXT, width REAL, height REAL, filter TEXT,
                 date_obs TEXT, exptime REAL, airmass REAL, seeing REAL,
                 skylevel REAL, sigma_sky REAL,
                 crval1 REAL, crval2 REAL, crpix1 REAL, crpix2 REAL,
                 cd1_1 REAL, cd1_2 REAL, cd2_1 REAL, cd2_2 REAL,
                 fluxmag0 REAL, fluxmag0_err REAL, magzero REAL, magzero_rms REAL,
                 mosaic_fluxmag0 REAL, mosaic_fluxmag0_err REAL);
             CREATE TABLE frame_sourcelist (
                 visit TEXT, ccdname TEXT, id INTEGER, ra REAL, decl REAL,
                 x REAL, y REAL,
                 psfflux REAL, psfflux_err REAL, apflux REAL, apflux_err REAL,
                 modelflux REAL, modelflux_err REAL, instflux REAL, instflux_err REAL,
                 ixx REAL, iyy REAL, ixy REAL,
                 flag_interp_cen INTEGER, flag_sat_cen INTEGER, flag_edge INTEGER,
                 flag_neg INTEGER, flag_badcentroid INTEGER,
                 deblend_nchild INTEGER, extendedness REAL);
             INSERT INTO frame VALUES
                 ('1000', '5', 2048.0, 4096.0, 'r', '2013-11-02', 30.0, 1.1, 3.0,
                  180.0, 7.0, 150.0, 2.0, 1024.0, 2048.0,
                  5.5e-5, 0.0, 0.0, 5.5e-5, 1.0e10, 0.0, NULL, NULL, NULL, NULL),
                 ('1000', '104', 2048.0, 4096.0, 'r', '2013-11-02', 30.0, 1.1, 3.0,
                  180.0, 7.0, 150.0, 2.0, 1024.0, 2048.0,
                  5.5e-5, 0.0, 0.0, 5.5e-5, 1.0e10, 0.0, NULL, NULL, NULL, NULL);
             INSERT INTO frame_sourcelist VALUES
                 ('1000', '5', 1, 150.0, 2.0, 10.0, 20.0,
                  100.0, 1.0, 110.0, 1.1, 105.0, 1.0, 90.0, 1.0,
                  4.0, 4.0, 0.1, 0, 0, 0, 0, 0, 0, 0.0),
                 ('1000', '5', 2, 150.01, 2.01, 30.0, 40.0,
                  200.0, 2.0, 210.0, 2.1, 205.0, 2.0, 190.0, 2.0,
                  4.0, 4.0, 0.1, 0, 0, 0, 0, 0, 0, 1.0);",
        )
        .unwrap();
    }

    #[test]
    fn sqlite_round_trip_with_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rerun.db");
        seed_db(&path);

        let exec = SqliteExecutor::open(path).unwrap();
        let mut qa = DbQaData::new(CameraInfo::hsc(None), exec);

        let q = DataId::from_pairs([("visit", "1000"), ("ccd", ".*")]).unwrap();
        let sets = qa.source_set_by_sensor(&q).unwrap();
        // ccd 104 is a guide CCD and never appears
        assert_eq!(sets.len(), 1);
        assert_eq!(sets["visit1000-ccd5"].len(), 2);
        assert_eq!(sets["visit1000-ccd5"][1].extendedness, 1.0);
        // fluxes come back zero-point normalized (fluxmag0 = 1e10)
        let s = &sets["visit1000-ccd5"][0];
        assert!((s.psf_flux - 1.0e-8).abs() < 1e-20);
        assert!((s.psf_flux_err - 1.0e-10).abs() < 1e-22);

        let filters = qa.filter_by_sensor(&q).unwrap();
        assert_eq!(filters["visit1000-ccd5"], "r");
        assert_eq!(qa.visits(&DataId::from_pairs([("visit", ".*")]).unwrap()).unwrap(), vec!["1000"]);
    }
}
