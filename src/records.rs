//! In-memory record types: detected sources, reference objects, and the
//! matched pairs connecting them.
//!
//! These are plain data carriers. Backends populate them from whatever
//! column layout they have; everything downstream works in this one shape.

use serde::{Deserialize, Serialize};

use crate::error::{QaError, Result};

/// Photometric band, in the survey's canonical u..y ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBand {
    U,
    G,
    R,
    I,
    Z,
    Y,
}

impl FilterBand {
    pub const COUNT: usize = 6;

    /// Resolve a filter name, including the Johnson aliases used by some
    /// reference catalogs (B→g, V→r, R→r, I→i).
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "u" => Ok(FilterBand::U),
            "g" | "B" => Ok(FilterBand::G),
            "r" | "V" | "R" => Ok(FilterBand::R),
            "i" | "I" => Ok(FilterBand::I),
            "z" => Ok(FilterBand::Z),
            "y" | "Y" => Ok(FilterBand::Y),
            other => Err(QaError::Config(format!("unknown filter '{other}'"))),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        ["u", "g", "r", "i", "z", "y"][self.index()]
    }
}

// ── Sources ─────────────────────────────────────────────────────────────────

/// One detected source. Fluxes are in raw instrumental units until a
/// [`crate::calib::Calib`] is applied; positions are sky (degrees) plus
/// detector pixels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub ra: f64,
    pub dec: f64,
    pub x: f64,
    pub y: f64,

    pub psf_flux: f64,
    pub psf_flux_err: f64,
    pub ap_flux: f64,
    pub ap_flux_err: f64,
    pub model_flux: f64,
    pub model_flux_err: f64,
    pub inst_flux: f64,
    pub inst_flux_err: f64,

    /// Adaptive second moments.
    pub ixx: f64,
    pub iyy: f64,
    pub ixy: f64,

    pub flag_interp_center: bool,
    pub flag_saturated_center: bool,
    pub flag_edge: bool,
    pub flag_negative: bool,
    pub flag_bad_centroid: bool,

    pub deblend_nchild: u32,
    /// 0.0 = point source, 1.0 = extended; NaN when unmeasured.
    pub extendedness: f64,
}

impl SourceRecord {
    /// Sources unusable for photometric tests: flagged pixels in the center,
    /// on the detector edge, or a deblend parent.
    pub fn is_flagged(&self) -> bool {
        self.flag_interp_center
            || self.flag_saturated_center
            || self.flag_edge
            || self.flag_bad_centroid
            || self.deblend_nchild > 0
    }
}

/// All sources retrieved for one detector.
pub type SourceSet = Vec<SourceRecord>;

// ── Reference objects ───────────────────────────────────────────────────────

/// One reference-catalog object with per-band magnitudes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefObject {
    pub id: i64,
    pub ra: f64,
    pub dec: f64,
    pub is_star: bool,
    /// Magnitudes indexed by [`FilterBand::index`]; NaN when unknown.
    pub mags: [f64; FilterBand::COUNT],
}

impl Default for RefObject {
    fn default() -> Self {
        RefObject {
            id: 0,
            ra: 0.0,
            dec: 0.0,
            is_star: true,
            mags: [f64::NAN; FilterBand::COUNT],
        }
    }
}

impl RefObject {
    pub fn mag(&self, band: FilterBand) -> f64 {
        self.mags[band.index()]
    }

    pub fn set_mag(&mut self, band: FilterBand, mag: f64) {
        self.mags[band.index()] = mag;
    }

    /// Store a magnitude derived from a flux; non-positive fluxes leave the
    /// band unknown.
    pub fn set_flux(&mut self, band: FilterBand, flux: f64) {
        self.mags[band.index()] = if flux > 0.0 && flux.is_finite() {
            -2.5 * flux.log10()
        } else {
            f64::NAN
        };
    }

    /// Flux corresponding to the stored magnitude, NaN when unknown.
    pub fn flux(&self, band: FilterBand) -> f64 {
        let m = self.mags[band.index()];
        if m.is_finite() {
            10f64.powf(-0.4 * m)
        } else {
            f64::NAN
        }
    }
}

pub type RefObjectSet = Vec<RefObject>;

// ── Matches ─────────────────────────────────────────────────────────────────

/// Which catalog a match query runs against on the reference side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Deep coadd / external catalog objects.
    Object,
    /// Per-visit detected sources from another exposure.
    Source,
}

impl RefKind {
    pub fn label(self) -> &'static str {
        match self {
            RefKind::Object => "obj",
            RefKind::Source => "src",
        }
    }
}

/// One raw reference/source association as persisted by the pipeline,
/// before the records themselves are joined in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawMatch {
    pub ref_id: i64,
    pub src_id: i64,
    /// Match distance, radians.
    pub distance: f64,
}

/// One reference-to-source association with its match distance (radians).
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub ref_obj: RefObject,
    pub source: SourceRecord,
    pub distance: f64,
}

/// A detector's matches sorted into the four classification bins.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    /// Reference matched by exactly one source.
    pub matched: Vec<MatchedPair>,
    /// Reference matched by more than one source.
    pub blended: Vec<MatchedPair>,
    /// Detected but never matched to a reference.
    pub orphan: Vec<SourceRecord>,
    /// In the reference catalog but never detected.
    pub undetected: Vec<RefObject>,
}

impl MatchSet {
    pub fn total_pairs(&self) -> usize {
        self.matched.len() + self.blended.len()
    }
}
