//! Photometric calibration: zero-point bookkeeping and instrumental-flux to
//! magnitude conversion.
//!
//! A detector's zero point can come from several places of decreasing
//! trustworthiness; [`ZeropointSource`] records which one won so the choice
//! is auditable downstream.

use tracing::debug;

use crate::records::SourceRecord;

/// Where the adopted zero point came from, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ZeropointSource {
    /// Global multi-exposure fit (the mosaic solution).
    MosaicFit,
    /// MAGZERO keyword from the exposure header.
    HeaderMagzero,
    /// fluxMag0 stored with the calibrated exposure.
    CalexpFluxMag0,
}

/// Photometric calibration for one detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calib {
    /// Instrumental flux of a zero-magnitude object.
    pub flux_mag0: f64,
    pub flux_mag0_err: f64,
    pub source: ZeropointSource,
}

impl Calib {
    pub fn new(flux_mag0: f64, flux_mag0_err: f64, source: ZeropointSource) -> Self {
        Calib { flux_mag0, flux_mag0_err, source }
    }

    /// Pick the best available zero point. Candidates are tried in source
    /// order; a missing or non-positive candidate falls through to the next.
    /// The header candidate is `(MAGZERO, MAGZERO_RMS, EXPTIME)`.
    pub fn choose(
        mosaic: Option<(f64, f64)>,
        header_magzero: Option<(f64, f64, f64)>,
        calexp: Option<(f64, f64)>,
    ) -> Option<Calib> {
        if let Some((f0, df0)) = mosaic {
            if f0 > 0.0 {
                return Some(Calib::new(f0, df0, ZeropointSource::MosaicFit));
            }
        }
        if let Some((zp, rms, exptime)) = header_magzero {
            if zp.is_finite() && exptime > 0.0 {
                // MAGZERO is per second of exposure.
                let f0 = 10f64.powf(0.4 * zp) * exptime;
                let df0 = f0 * std::f64::consts::LN_10 * 0.4 * rms;
                debug!(magzero = zp, exptime, flux_mag0 = f0, "zero point from header");
                return Some(Calib::new(f0, df0, ZeropointSource::HeaderMagzero));
            }
        }
        if let Some((f0, df0)) = calexp {
            if f0 > 0.0 {
                return Some(Calib::new(f0, df0, ZeropointSource::CalexpFluxMag0));
            }
        }
        None
    }

    /// Normalize a source's instrumental fluxes by the zero point, replacing
    /// each flux error with the propagated calibrated error. Errors are
    /// computed from the raw fluxes before any are rescaled.
    pub fn apply(&self, rec: &mut SourceRecord) {
        rec.psf_flux_err = self.calibrated_flux_err(rec.psf_flux, rec.psf_flux_err);
        rec.ap_flux_err = self.calibrated_flux_err(rec.ap_flux, rec.ap_flux_err);
        rec.model_flux_err = self.calibrated_flux_err(rec.model_flux, rec.model_flux_err);
        rec.inst_flux_err = self.calibrated_flux_err(rec.inst_flux, rec.inst_flux_err);
        rec.psf_flux /= self.flux_mag0;
        rec.ap_flux /= self.flux_mag0;
        rec.model_flux /= self.flux_mag0;
        rec.inst_flux /= self.flux_mag0;
    }

    /// Zero point in magnitudes.
    pub fn zeropoint(&self) -> f64 {
        2.5 * self.flux_mag0.log10()
    }

    /// Calibrated magnitude for an instrumental flux, NaN when the flux is
    /// unusable.
    pub fn mag(&self, flux: f64) -> f64 {
        if !flux.is_finite() || flux <= 0.0 || self.flux_mag0 <= 0.0 {
            return f64::NAN;
        }
        -2.5 * (flux / self.flux_mag0).log10()
    }

    /// First-order magnitude error from the flux and zero-point errors.
    /// NaN whenever [`Calib::mag`] would be NaN.
    pub fn mag_err(&self, flux: f64, flux_err: f64) -> f64 {
        let df = self.calibrated_flux_err(flux, flux_err);
        if df.is_nan() {
            return f64::NAN;
        }
        let f = flux / self.flux_mag0;
        2.5 / std::f64::consts::LN_10 * df / f
    }

    /// Error on the calibrated (zero-point-relative) flux, propagating both
    /// the measurement and zero-point uncertainties.
    pub fn calibrated_flux_err(&self, flux: f64, flux_err: f64) -> f64 {
        if !flux.is_finite() || flux <= 0.0 || self.flux_mag0 <= 0.0 {
            return f64::NAN;
        }
        (flux_err / flux + self.flux_mag0_err / self.flux_mag0) * flux / self.flux_mag0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_mosaic_wins() {
        let c = Calib::choose(Some((1.0e10, 1.0e7)), Some((27.0, 0.0, 1.0)), Some((2.0e10, 0.0)))
            .unwrap();
        assert_eq!(c.source, ZeropointSource::MosaicFit);
        assert_eq!(c.flux_mag0, 1.0e10);
    }

    #[test]
    fn precedence_header_beats_calexp() {
        let c = Calib::choose(None, Some((25.0, 0.0, 1.0)), Some((2.0e10, 0.0))).unwrap();
        assert_eq!(c.source, ZeropointSource::HeaderMagzero);
        assert!((c.zeropoint() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn precedence_falls_through_bad_candidates() {
        let c = Calib::choose(Some((0.0, 0.0)), Some((f64::NAN, 0.0, 1.0)), Some((2.0e10, 1.0e6)))
            .unwrap();
        assert_eq!(c.source, ZeropointSource::CalexpFluxMag0);
        assert!(Calib::choose(None, None, None).is_none());
    }

    #[test]
    fn header_zero_point_scales_with_exptime() {
        let c = Calib::choose(None, Some((25.0, 0.05, 30.0)), None).unwrap();
        let f0 = 10f64.powf(0.4 * 25.0) * 30.0;
        let df0 = f0 * std::f64::consts::LN_10 * 0.4 * 0.05;
        assert!((c.flux_mag0 - f0).abs() / f0 < 1e-12);
        assert!((c.flux_mag0_err - df0).abs() / df0 < 1e-12);
        assert_eq!(c.source, ZeropointSource::HeaderMagzero);
    }

    #[test]
    fn apply_normalizes_fluxes_and_errors() {
        let c = Calib::new(10.0, 0.1, ZeropointSource::CalexpFluxMag0);
        let mut s = SourceRecord { psf_flux: 100.0, psf_flux_err: 5.0, ..SourceRecord::default() };
        c.apply(&mut s);
        // (5/100 + 0.1/10) * 100/10
        assert!((s.psf_flux - 10.0).abs() < 1e-12);
        assert!((s.psf_flux_err - 0.6).abs() < 1e-12);
        assert!(s.ap_flux_err.is_nan(), "zero raw flux propagates as NaN");
    }

    #[test]
    fn mag_of_flux_mag0_is_zero() {
        let c = Calib::new(1.0e10, 0.0, ZeropointSource::CalexpFluxMag0);
        assert!(c.mag(1.0e10).abs() < 1e-12);
        assert!((c.mag(1.0e10 * 10f64.powf(-0.4 * 20.0)) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn unusable_flux_is_nan() {
        let c = Calib::new(1.0e10, 0.0, ZeropointSource::CalexpFluxMag0);
        assert!(c.mag(0.0).is_nan());
        assert!(c.mag(-5.0).is_nan());
        assert!(c.mag(f64::INFINITY).is_nan());
        assert!(c.calibrated_flux_err(0.0, 1.0).is_nan());
    }

    #[test]
    fn flux_err_combines_both_terms() {
        let c = Calib::new(100.0, 1.0, ZeropointSource::CalexpFluxMag0);
        // (df/f + df0/f0) * f/f0 = (0.1 + 0.01) * 0.1
        let err = c.calibrated_flux_err(10.0, 1.0);
        assert!((err - 0.011).abs() < 1e-12);
    }
}
