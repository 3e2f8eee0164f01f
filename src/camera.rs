//! Per-camera descriptor: identifier translation and detector geometry.
//!
//! Each supported camera family names its identifier fields differently
//! (`visit`/`raft`/`sensor` for the LSST simulator, `visit`/`ccd` for HSC and
//! Suprime-Cam, `run`/`field`/`camcol`/`filter` for SDSS). [`CameraInfo`]
//! owns the mapping between those native names and the standard
//! `visit`/`raft`/`sensor` scheme, the database column names for each native
//! field, and the focal-plane geometry used to place detectors in
//! focal-plane pixel coordinates.
//!
//! Geometry comes from an external description file (JSON, deserialized with
//! serde). A camera constructed without geometry is usable for identifier
//! work but returns [`QaError::GeometryUnavailable`] from geometry methods.

use std::collections::HashMap;

use serde::Deserialize;

use crate::dataid::{DataId, DataIdSchema, FieldDef, IdValue};
use crate::error::{QaError, Result};

/// Separator for composite identifier fields (e.g. SDSS `visit` = `run-field`).
pub const COMPOSITE_SEP: char = '-';

// ── Focal-plane geometry ────────────────────────────────────────────────────

/// Raft (detector group) placement. Cameras without raft partitioning have
/// an empty raft list.
#[derive(Debug, Clone, Deserialize)]
pub struct RaftGeom {
    pub name: String,
    /// Raft center in focal-plane pixels.
    pub center_x: f64,
    pub center_y: f64,
}

/// One detector's placement and orientation.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorGeom {
    pub name: String,
    pub serial: u32,
    #[serde(default)]
    pub raft: Option<String>,
    /// Detector center relative to its raft center (or the focal-plane
    /// origin when raft-less), in pixels.
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation about the focal-plane normal, radians.
    #[serde(default)]
    pub yaw_rad: f64,
}

/// The structured detector/raft hierarchy produced by the external camera
/// geometry provider.
#[derive(Debug, Clone, Deserialize)]
pub struct FocalPlaneGeometry {
    #[serde(default)]
    pub rafts: Vec<RaftGeom>,
    pub detectors: Vec<DetectorGeom>,
}

impl FocalPlaneGeometry {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| QaError::Config(format!("geometry file {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn raft(&self, name: &str) -> Option<&RaftGeom> {
        self.rafts.iter().find(|r| r.name == name)
    }

    pub fn detector(&self, name: &str) -> Option<&DetectorGeom> {
        self.detectors.iter().find(|d| d.name == name)
    }

    pub fn detector_by_serial(&self, serial: u32) -> Option<&DetectorGeom> {
        self.detectors.iter().find(|d| d.serial == serial)
    }
}

// ── Identifier translation ──────────────────────────────────────────────────

/// Where a standard field maps to in the camera's native scheme.
#[derive(Debug, Clone, Copy)]
pub enum TranslationTarget {
    /// Renamed one-to-one.
    Field(&'static str),
    /// Split across several native fields, joined with [`COMPOSITE_SEP`].
    Composite(&'static [&'static str]),
}

/// How raft and sensor display names are derived from a native identifier.
#[derive(Debug, Clone, Copy)]
enum DetectorNaming {
    /// LSST style: `R:x,y` rafts and `R:x,y S:a,b` sensors.
    RaftSensor,
    /// HSC/Suprime-Cam style: the `ccd` field is a serial number resolved
    /// through the geometry's serial table.
    SerialLookup,
    /// SDSS style: camcol is the raft, filter+camcol the sensor.
    FilterCamcol,
}

/// Detectors excluded from every query regardless of the caller's
/// constraints (e.g. HSC guide CCDs).
#[derive(Debug, Clone, Copy)]
pub enum SensorExclusion {
    /// Exclude candidates whose `field` value parses to a serial greater
    /// than `max`.
    SerialAbove { field: &'static str, max: u32 },
}

impl SensorExclusion {
    /// True when a candidate field value must be dropped.
    pub fn excludes(&self, field: &str, value: &str) -> bool {
        match self {
            SensorExclusion::SerialAbove { field: f, max } => {
                field == *f && value.parse::<u32>().map(|v| v > *max).unwrap_or(false)
            }
        }
    }
}

// ── CameraInfo ──────────────────────────────────────────────────────────────

/// Everything the retrieval layer needs to know about one camera.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    name: &'static str,
    schema: DataIdSchema,
    /// standard field → native target, in standard-field order.
    translation: Vec<(&'static str, TranslationTarget)>,
    /// native field → database column.
    db_names: HashMap<&'static str, &'static str>,
    naming: DetectorNaming,
    exclusion: Option<SensorExclusion>,
    /// The native field that plays the role of "ccd" when breaking
    /// identifiers apart.
    ccd_convention: &'static str,
    geometry: Option<FocalPlaneGeometry>,
}

impl CameraInfo {
    /// LSST simulator: visit/snap/raft/sensor, identity translation.
    pub fn lsst_sim(geometry: Option<FocalPlaneGeometry>) -> Self {
        CameraInfo {
            name: "lsstSim",
            schema: DataIdSchema::new(vec![
                FieldDef { name: "visit", visit_like: true },
                FieldDef { name: "snap", visit_like: false },
                FieldDef { name: "raft", visit_like: false },
                FieldDef { name: "sensor", visit_like: false },
            ]),
            translation: vec![
                ("visit", TranslationTarget::Field("visit")),
                ("snap", TranslationTarget::Field("snap")),
                ("raft", TranslationTarget::Field("raft")),
                ("sensor", TranslationTarget::Field("sensor")),
            ],
            db_names: HashMap::from([
                ("visit", "visit"),
                ("snap", "snap"),
                ("raft", "raftName"),
                ("sensor", "ccdName"),
            ]),
            naming: DetectorNaming::RaftSensor,
            exclusion: None,
            ccd_convention: "sensor",
            geometry,
        }
    }

    /// Hyper Suprime-Cam: visit/ccd, ccd > 103 are guide CCDs.
    pub fn hsc(geometry: Option<FocalPlaneGeometry>) -> Self {
        CameraInfo {
            name: "hsc",
            schema: DataIdSchema::new(vec![
                FieldDef { name: "visit", visit_like: true },
                FieldDef { name: "ccd", visit_like: false },
            ]),
            translation: vec![
                ("visit", TranslationTarget::Field("visit")),
                ("sensor", TranslationTarget::Field("ccd")),
            ],
            db_names: HashMap::from([("visit", "visit"), ("ccd", "ccdname")]),
            naming: DetectorNaming::SerialLookup,
            exclusion: Some(SensorExclusion::SerialAbove { field: "ccd", max: 103 }),
            ccd_convention: "ccd",
            geometry,
        }
    }

    /// Suprime-Cam (classic): like HSC without the guide-CCD rule.
    pub fn suprimecam(geometry: Option<FocalPlaneGeometry>) -> Self {
        CameraInfo {
            name: "suprimecam",
            geometry,
            exclusion: None,
            ..CameraInfo::hsc(None)
        }
    }

    /// SDSS: run/filter/field/camcol; the standard visit is `run-field`.
    pub fn sdss(geometry: Option<FocalPlaneGeometry>) -> Self {
        CameraInfo {
            name: "sdss",
            schema: DataIdSchema::new(vec![
                FieldDef { name: "run", visit_like: true },
                FieldDef { name: "filter", visit_like: false },
                FieldDef { name: "field", visit_like: true },
                FieldDef { name: "camcol", visit_like: false },
            ]),
            translation: vec![
                ("visit", TranslationTarget::Composite(&["run", "field"])),
                ("raft", TranslationTarget::Field("camcol")),
                ("sensor", TranslationTarget::Field("filter")),
            ],
            db_names: HashMap::from([
                ("run", "run"),
                ("field", "field"),
                ("camcol", "camcol"),
                ("filter", "filterName"),
            ]),
            naming: DetectorNaming::FilterCamcol,
            exclusion: None,
            ccd_convention: "camcol",
            geometry,
        }
    }

    /// Factory keyed on camera name; unknown names are a fatal
    /// configuration error.
    pub fn by_name(name: &str, geometry: Option<FocalPlaneGeometry>) -> Result<Self> {
        match name {
            "lsstSim" => Ok(CameraInfo::lsst_sim(geometry)),
            "hsc" => Ok(CameraInfo::hsc(geometry)),
            "suprimecam" => Ok(CameraInfo::suprimecam(geometry)),
            "sdss" => Ok(CameraInfo::sdss(geometry)),
            other => Err(QaError::Config(format!("unknown camera '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn schema(&self) -> &DataIdSchema {
        &self.schema
    }

    pub fn exclusion(&self) -> Option<&SensorExclusion> {
        self.exclusion.as_ref()
    }

    /// Native field name that identifies a single detector for this camera.
    pub fn ccd_convention(&self) -> &'static str {
        self.ccd_convention
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn geometry(&self) -> Result<&FocalPlaneGeometry> {
        self.geometry
            .as_ref()
            .ok_or_else(|| QaError::GeometryUnavailable(self.name.to_string()))
    }

    pub fn sensor_count(&self) -> usize {
        self.geometry.as_ref().map(|g| g.detectors.len()).unwrap_or(0)
    }

    /// Database column for a standard field name.
    pub fn standard_to_db_name(&self, standard: &str) -> Result<&'static str> {
        let target = self
            .translation
            .iter()
            .find(|(s, _)| *s == standard)
            .map(|(_, t)| t)
            .ok_or_else(|| QaError::malformed(standard, "no native mapping for this camera"))?;
        let native = match target {
            TranslationTarget::Field(f) => *f,
            TranslationTarget::Composite(_) => {
                return Err(QaError::malformed(standard, "composite field has no single column"))
            }
        };
        self.db_names
            .get(native)
            .copied()
            .ok_or_else(|| QaError::malformed(native, "no database column for this camera"))
    }

    /// Database column for a native field name.
    pub fn native_db_name(&self, native: &str) -> Option<&'static str> {
        self.db_names.get(native).copied()
    }

    /// Native (field, column) pairs in schema order, skipping `snap` which no
    /// database carries.
    pub fn db_columns(&self) -> Vec<(&'static str, &'static str)> {
        self.schema
            .fields()
            .iter()
            .filter(|f| f.name != "snap")
            .filter_map(|f| self.db_names.get(f.name).map(|c| (f.name, *c)))
            .collect()
    }

    // ── standard ↔ native translation ──

    /// Rewrite a standard-form identifier into this camera's native fields.
    /// Composite values must be `-`-joined with matching arity, or a bare
    /// wildcard (which expands to one wildcard per component).
    pub fn standard_to_native(&self, id: &DataId) -> Result<DataId> {
        let mut out = id.clone();
        for (standard, target) in &self.translation {
            let Some(value) = out.get(standard).cloned() else {
                continue;
            };
            match target {
                TranslationTarget::Field(native) => {
                    if native != standard {
                        out.remove(standard);
                        out.set(native, value);
                    }
                }
                TranslationTarget::Composite(natives) => {
                    let parts = split_composite(standard, &value, natives.len())?;
                    out.remove(standard);
                    for (native, part) in natives.iter().zip(parts) {
                        out.set(native, part);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Inverse of [`CameraInfo::standard_to_native`]. For a composite target,
    /// all component fields must be present; a partial set is an arity error.
    pub fn native_to_standard(&self, id: &DataId) -> Result<DataId> {
        let mut out = id.clone();
        for (standard, target) in &self.translation {
            match target {
                TranslationTarget::Field(native) => {
                    if native != standard {
                        if let Some(value) = out.remove(native) {
                            out.set(standard, value);
                        }
                    }
                }
                TranslationTarget::Composite(natives) => {
                    let present = natives.iter().filter(|n| out.contains(n)).count();
                    if present == 0 {
                        continue;
                    }
                    if present != natives.len() {
                        return Err(QaError::malformed(
                            *standard,
                            format!("composite needs all of {}", natives.join(",")),
                        ));
                    }
                    let parts: Vec<IdValue> =
                        natives.iter().filter_map(|n| out.remove(n)).collect();
                    out.set(standard, join_composite(&parts));
                }
            }
        }
        Ok(out)
    }

    // ── Detector naming and geometry ──

    /// Resolve a concrete native identifier to `(raft_name, sensor_name)`.
    /// The raft name is empty for cameras without raft partitioning.
    pub fn raft_and_sensor_names(&self, id: &DataId) -> Result<(String, String)> {
        match self.naming {
            DetectorNaming::RaftSensor => {
                let raft = exact_field(id, "raft")?;
                let sensor = exact_field(id, "sensor")?;
                let raft_name = format!("R:{raft}");
                let ccd_name = format!("{raft_name} S:{sensor}");
                Ok((raft_name, ccd_name))
            }
            DetectorNaming::SerialLookup => {
                let ccd = exact_field(id, "ccd")?;
                let serial: u32 = ccd
                    .parse()
                    .map_err(|_| QaError::malformed("ccd", format!("not a serial number: '{ccd}'")))?;
                let geom = self.geometry()?;
                let det = geom
                    .detector_by_serial(serial)
                    .ok_or_else(|| QaError::UnknownDetector(format!("serial {serial}")))?;
                Ok((String::new(), det.name.clone()))
            }
            DetectorNaming::FilterCamcol => {
                let camcol = exact_field(id, "camcol")?;
                let filter = exact_field(id, "filter")?;
                Ok((camcol.clone(), format!("{filter}{camcol}")))
            }
        }
    }

    /// Absolute focal-plane pixel bounds `(x0, y0, x1, y1)` for a sensor.
    ///
    /// Detector centers are stored relative to the parent raft center; a yaw
    /// within 1e-3 of π/2 swaps the width and height.
    pub fn detector_bbox(&self, raft_name: &str, sensor_name: &str) -> Result<(f64, f64, f64, f64)> {
        let geom = self.geometry()?;

        let (rxc, ryc) = geom
            .raft(raft_name)
            .map(|r| (r.center_x, r.center_y))
            .unwrap_or((0.0, 0.0));

        let det = geom
            .detector(sensor_name)
            .ok_or_else(|| QaError::UnknownDetector(sensor_name.to_string()))?;

        let (mut w, mut h) = (det.width, det.height);
        if (det.yaw_rad - std::f64::consts::FRAC_PI_2).abs() < 1.0e-3 {
            std::mem::swap(&mut w, &mut h);
        }

        let x0 = rxc + det.center_x - w / 2.0;
        let y0 = ryc + det.center_y - h / 2.0;
        Ok((x0, y0, x0 + w, y0 + h))
    }

    /// Stable human-readable detector label: `name--serial`, with whitespace
    /// collapsed to underscores. Used as the join key between figures and
    /// test records.
    pub fn detector_display_name(&self, sensor_name: &str) -> Result<String> {
        let det = self
            .geometry()?
            .detector(sensor_name)
            .ok_or_else(|| QaError::UnknownDetector(sensor_name.to_string()))?;
        let cleaned: String = det
            .name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        Ok(format!("{}--{:04}", cleaned, det.serial))
    }
}

/// Resolved detector identity for one concrete identifier. Geometry-derived
/// fields are `None` when the camera has no focal-plane description.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorInfo {
    pub raft_name: String,
    pub sensor_name: String,
    pub display_name: Option<String>,
    /// Focal-plane pixel bounds `(x0, y0, x1, y1)`.
    pub bbox: Option<(f64, f64, f64, f64)>,
}

impl CameraInfo {
    /// Full detector identity for a concrete native identifier.
    pub fn detector_info(&self, id: &DataId) -> Result<DetectorInfo> {
        let (raft_name, sensor_name) = self.raft_and_sensor_names(id)?;
        let (display_name, bbox) = if self.has_geometry() {
            (
                Some(self.detector_display_name(&sensor_name)?),
                Some(self.detector_bbox(&raft_name, &sensor_name)?),
            )
        } else {
            (None, None)
        };
        Ok(DetectorInfo { raft_name, sensor_name, display_name, bbox })
    }
}

fn exact_field<'a>(id: &'a DataId, field: &'static str) -> Result<&'a String> {
    match id.get(field) {
        Some(IdValue::Exact(v)) => Ok(v),
        Some(_) => Err(QaError::malformed(field, "detector naming needs a concrete value")),
        None => Err(QaError::malformed(field, "field missing from identifier")),
    }
}

/// Split a composite standard value into per-component values.
fn split_composite(field: &str, value: &IdValue, arity: usize) -> Result<Vec<IdValue>> {
    match value {
        IdValue::Any => Ok(vec![IdValue::Any; arity]),
        IdValue::Exact(s) => {
            let parts: Vec<&str> = s.split(COMPOSITE_SEP).collect();
            if parts.len() != arity {
                return Err(QaError::malformed(
                    field,
                    format!("expected {arity} '-'-separated values, got {}", parts.len()),
                ));
            }
            parts.iter().map(|p| IdValue::parse(field, p)).collect()
        }
        IdValue::Pattern { .. } => Err(QaError::malformed(
            field,
            "composite values must be '-'-separated or a bare wildcard",
        )),
    }
}

/// Join component values back into a single composite value.
fn join_composite(parts: &[IdValue]) -> IdValue {
    let exacts: Option<Vec<&str>> = parts
        .iter()
        .map(|p| match p {
            IdValue::Exact(v) => Some(v.as_str()),
            _ => None,
        })
        .collect();
    if let Some(exacts) = exacts {
        return IdValue::Exact(exacts.join("-"));
    }
    // Leading exact components can still constrain as a prefix.
    let mut prefix = String::new();
    for p in parts {
        match p {
            IdValue::Exact(v) => {
                prefix.push_str(v);
                prefix.push(COMPOSITE_SEP);
            }
            _ => {
                if prefix.is_empty() {
                    return IdValue::Any;
                }
                return IdValue::Pattern { prefix, suffix: String::new() };
            }
        }
    }
    IdValue::Any
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_geometry() -> FocalPlaneGeometry {
        FocalPlaneGeometry::from_json(
            r#"{
                "rafts": [{"name": "R:2,2", "center_x": 8000.0, "center_y": 8000.0}],
                "detectors": [
                    {"name": "R:2,2 S:1,1", "serial": 42, "raft": "R:2,2",
                     "center_x": 0.0, "center_y": 0.0,
                     "width": 2048.0, "height": 4096.0, "yaw_rad": 0.0},
                    {"name": "1_53", "serial": 53, "center_x": 1024.0, "center_y": 2048.0,
                     "width": 2048.0, "height": 4176.0, "yaw_rad": 1.5707963}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn standard_native_round_trip_identity_camera() {
        let cam = CameraInfo::lsst_sim(None);
        let id = DataId::from_pairs([("visit", "855"), ("raft", "2,2"), ("sensor", "1,1")]).unwrap();
        let native = cam.standard_to_native(&id).unwrap();
        let back = cam.native_to_standard(&native).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn standard_native_round_trip_renamed_camera() {
        let cam = CameraInfo::hsc(None);
        let id = DataId::from_pairs([("visit", "1234"), ("sensor", "50")]).unwrap();
        let native = cam.standard_to_native(&id).unwrap();
        assert_eq!(native.get("ccd"), Some(&IdValue::Exact("50".into())));
        assert!(!native.contains("sensor"));
        let back = cam.native_to_standard(&native).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn composite_round_trip_and_arity_error() {
        let cam = CameraInfo::sdss(None);
        let id = DataId::from_pairs([("visit", "94-132"), ("raft", "3"), ("sensor", "r")]).unwrap();
        let native = cam.standard_to_native(&id).unwrap();
        assert_eq!(native.get("run"), Some(&IdValue::Exact("94".into())));
        assert_eq!(native.get("field"), Some(&IdValue::Exact("132".into())));
        let back = cam.native_to_standard(&native).unwrap();
        assert_eq!(back.get("visit"), Some(&IdValue::Exact("94-132".into())));

        let bad = DataId::from_pairs([("visit", "94-132-7")]).unwrap();
        let err = cam.standard_to_native(&bad).unwrap_err();
        assert!(matches!(err, QaError::MalformedIdentifier { ref field, .. } if field == "visit"));
    }

    #[test]
    fn composite_wildcard_expands() {
        let cam = CameraInfo::sdss(None);
        let id = DataId::from_pairs([("visit", ".*")]).unwrap();
        let native = cam.standard_to_native(&id).unwrap();
        assert_eq!(native.get("run"), Some(&IdValue::Any));
        assert_eq!(native.get("field"), Some(&IdValue::Any));
    }

    #[test]
    fn bbox_applies_raft_offset() {
        let mut cam = CameraInfo::lsst_sim(None);
        assert!(cam.detector_bbox("R:2,2", "R:2,2 S:1,1").is_err());
        cam = CameraInfo::lsst_sim(Some(small_geometry()));
        let (x0, y0, x1, y1) = cam.detector_bbox("R:2,2", "R:2,2 S:1,1").unwrap();
        assert_eq!((x0, y0), (8000.0 - 1024.0, 8000.0 - 2048.0));
        assert_eq!((x1 - x0, y1 - y0), (2048.0, 4096.0));
    }

    #[test]
    fn bbox_rotated_detector_swaps_extent() {
        let cam = CameraInfo::hsc(Some(small_geometry()));
        let (x0, y0, x1, y1) = cam.detector_bbox("", "1_53").unwrap();
        // width/height swapped by the ~pi/2 yaw
        assert_eq!(x1 - x0, 4176.0);
        assert_eq!(y1 - y0, 2048.0);
        assert_eq!(x0, 1024.0 - 4176.0 / 2.0);
        assert_eq!(y0, 2048.0 - 1024.0);
    }

    #[test]
    fn serial_lookup_naming() {
        let cam = CameraInfo::hsc(Some(small_geometry()));
        let id = DataId::from_pairs([("visit", "1000"), ("ccd", "53")]).unwrap();
        let (raft, sensor) = cam.raft_and_sensor_names(&id).unwrap();
        assert_eq!(raft, "");
        assert_eq!(sensor, "1_53");
    }

    #[test]
    fn display_name_pads_serial() {
        let cam = CameraInfo::lsst_sim(Some(small_geometry()));
        assert_eq!(
            cam.detector_display_name("R:2,2 S:1,1").unwrap(),
            "R:2,2_S:1,1--0042"
        );
    }

    #[test]
    fn unknown_camera_is_config_error() {
        assert!(matches!(
            CameraInfo::by_name("megacam", None),
            Err(QaError::Config(_))
        ));
    }

    #[test]
    fn detector_info_with_and_without_geometry() {
        let id = DataId::from_pairs([("visit", "855"), ("raft", "2,2"), ("sensor", "1,1")]).unwrap();
        let bare = CameraInfo::lsst_sim(None).detector_info(&id).unwrap();
        assert_eq!(bare.sensor_name, "R:2,2 S:1,1");
        assert!(bare.display_name.is_none() && bare.bbox.is_none());

        let full = CameraInfo::lsst_sim(Some(small_geometry())).detector_info(&id).unwrap();
        assert_eq!(full.display_name.as_deref(), Some("R:2,2_S:1,1--0042"));
        assert!(full.bbox.is_some());
    }

    #[test]
    fn ccd_convention_per_camera() {
        assert_eq!(CameraInfo::lsst_sim(None).ccd_convention(), "sensor");
        assert_eq!(CameraInfo::hsc(None).ccd_convention(), "ccd");
        assert_eq!(CameraInfo::sdss(None).ccd_convention(), "camcol");
    }

    #[test]
    fn hsc_guide_ccds_excluded() {
        let cam = CameraInfo::hsc(None);
        let excl = cam.exclusion().unwrap();
        assert!(excl.excludes("ccd", "104"));
        assert!(!excl.excludes("ccd", "103"));
        assert!(!excl.excludes("visit", "104"));
    }
}
