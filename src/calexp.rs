//! Calibrated-exposure metadata: the per-detector header quantities the
//! test suites key their summaries on.
//!
//! Backends parse whatever header representation they have into a
//! [`CalexpHeader`]; [`CalexpData::from_header`] then derives the WCS, picks
//! the zero point, and produces the flat [`CalexpEntry`] summary handed to
//! callers.

use serde::Deserialize;

use crate::calib::Calib;
use crate::error::{QaError, Result};
use crate::wcs::TanWcs;

/// Raw header quantities for one calibrated exposure.
#[derive(Debug, Clone, Deserialize)]
pub struct CalexpHeader {
    pub width: f64,
    pub height: f64,
    pub filter: String,
    #[serde(default)]
    pub date_obs: String,
    #[serde(default)]
    pub exptime: Option<f64>,
    #[serde(default)]
    pub airmass: Option<f64>,
    /// PSF FWHM in pixels.
    #[serde(default)]
    pub fwhm_pix: Option<f64>,
    #[serde(default)]
    pub sky_level: Option<f64>,
    #[serde(default)]
    pub sky_sigma: Option<f64>,

    /// WCS keywords, degrees.
    pub crval: [f64; 2],
    pub crpix: [f64; 2],
    pub cd: [[f64; 2]; 2],

    #[serde(default)]
    pub flux_mag0: Option<f64>,
    #[serde(default)]
    pub flux_mag0_err: Option<f64>,
    /// MAGZERO header keyword, when the pipeline wrote one.
    #[serde(default)]
    pub magzero: Option<f64>,
    #[serde(default)]
    pub magzero_rms: Option<f64>,
}

/// Flat per-detector summary row.
#[derive(Debug, Clone)]
pub struct CalexpEntry {
    pub filter: String,
    pub date_obs: String,
    pub exptime: f64,
    pub airmass: f64,
    /// Sky position of the detector center, degrees.
    pub ra_center: f64,
    pub dec_center: f64,
    pub width: f64,
    pub height: f64,
    pub sky_level: f64,
    pub sky_sigma: f64,
    /// Seeing in arcseconds.
    pub fwhm: f64,
    pub zeropoint: f64,
}

/// Everything derived from one detector's calibrated exposure.
#[derive(Debug, Clone)]
pub struct CalexpData {
    pub wcs: TanWcs,
    pub calib: Calib,
    pub entry: CalexpEntry,
}

impl CalexpData {
    /// Derive the WCS, zero point, and summary from a parsed header, plus an
    /// optional externally-fit zero point which takes precedence over the
    /// header's own.
    pub fn from_header(header: &CalexpHeader, mosaic_zp: Option<(f64, f64)>) -> Result<Self> {
        let wcs = TanWcs::new(
            (header.crval[0], header.crval[1]),
            (header.crpix[0], header.crpix[1]),
            header.cd,
        )?;

        let calexp_zp = header
            .flux_mag0
            .map(|f0| (f0, header.flux_mag0_err.unwrap_or(0.0)));
        let header_zp = header
            .magzero
            .map(|zp| (zp, header.magzero_rms.unwrap_or(0.0), header.exptime.unwrap_or(1.0)));
        let calib = Calib::choose(mosaic_zp, header_zp, calexp_zp)
            .ok_or_else(|| QaError::DataAbsent("no usable zero point in calexp".to_string()))?;

        let (ra_center, dec_center) = wcs.pixel_to_sky(header.width / 2.0, header.height / 2.0);
        let fwhm = header
            .fwhm_pix
            .map(|f| f * wcs.pixel_scale_arcsec())
            .unwrap_or(f64::NAN);

        let entry = CalexpEntry {
            filter: header.filter.clone(),
            date_obs: header.date_obs.clone(),
            exptime: header.exptime.unwrap_or(f64::NAN),
            airmass: header.airmass.unwrap_or(f64::NAN),
            ra_center,
            dec_center,
            width: header.width,
            height: header.height,
            sky_level: header.sky_level.unwrap_or(f64::NAN),
            sky_sigma: header.sky_sigma.unwrap_or(f64::NAN),
            fwhm,
            zeropoint: calib.zeropoint(),
        };

        Ok(CalexpData { wcs, calib, entry })
    }
}
