//! TAN (gnomonic) world coordinate system for a single detector.
//!
//! Only the pieces the harness needs: mapping reference-object sky
//! positions into detector pixels, and deciding whether a position lands
//! inside the detector's usable area. Reference objects projected within
//! [`EDGE_BORDER_PIX`] of the detector boundary are treated as off-detector,
//! since sources there are routinely lost to edge flags.

use nalgebra::{Matrix2, Vector2, Vector3};

use crate::error::{QaError, Result};

/// Border, in pixels, inside which a reference object counts as off-detector.
pub const EDGE_BORDER_PIX: f64 = 18.0;

/// TAN projection defined by the usual FITS keywords.
#[derive(Debug, Clone)]
pub struct TanWcs {
    /// Reference sky position, radians.
    crval: (f64, f64),
    /// Reference pixel.
    crpix: (f64, f64),
    /// Pixel offsets to tangent-plane offsets, radians per pixel.
    cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
    /// Unit vector of crval and the east/north tangent basis there.
    ref_xyz: Vector3<f64>,
    east: Vector3<f64>,
    north: Vector3<f64>,
}

fn radec_to_xyz(ra: f64, dec: f64) -> Vector3<f64> {
    Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
}

impl TanWcs {
    /// Build from header values: crval in degrees, crpix in pixels, cd in
    /// degrees per pixel. A singular CD matrix is rejected.
    pub fn new(crval_deg: (f64, f64), crpix: (f64, f64), cd_deg: [[f64; 2]; 2]) -> Result<Self> {
        let cd = Matrix2::new(
            cd_deg[0][0].to_radians(),
            cd_deg[0][1].to_radians(),
            cd_deg[1][0].to_radians(),
            cd_deg[1][1].to_radians(),
        );
        let cd_inv = cd
            .try_inverse()
            .ok_or_else(|| QaError::Config("singular CD matrix in WCS header".to_string()))?;

        let crval = (crval_deg.0.to_radians(), crval_deg.1.to_radians());
        let ref_xyz = radec_to_xyz(crval.0, crval.1);
        let mut east = Vector3::z().cross(&ref_xyz);
        if east.norm() < 1.0e-12 {
            // crval at a pole; any tangent direction serves as east.
            east = Vector3::x();
        } else {
            east.normalize_mut();
        }
        let north = ref_xyz.cross(&east);

        Ok(TanWcs { crval, crpix, cd, cd_inv, ref_xyz, east, north })
    }

    /// Sky position (degrees) of a pixel.
    pub fn pixel_to_sky(&self, px: f64, py: f64) -> (f64, f64) {
        let offs = self.cd * Vector2::new(px - self.crpix.0, py - self.crpix.1);
        let xyz = (self.ref_xyz + offs.x * self.east + offs.y * self.north).normalize();
        let ra = xyz.y.atan2(xyz.x).rem_euclid(std::f64::consts::TAU);
        let dec = xyz.z.asin();
        (ra.to_degrees(), dec.to_degrees())
    }

    /// Pixel position of a sky coordinate (degrees), or `None` when the
    /// position is behind the tangent plane.
    pub fn sky_to_pixel(&self, ra_deg: f64, dec_deg: f64) -> Option<(f64, f64)> {
        let p = radec_to_xyz(ra_deg.to_radians(), dec_deg.to_radians());
        let d = p.dot(&self.ref_xyz);
        if d <= 0.0 {
            return None;
        }
        let xi = p.dot(&self.east) / d;
        let eta = p.dot(&self.north) / d;
        let pix = self.cd_inv * Vector2::new(xi, eta);
        Some((pix.x + self.crpix.0, pix.y + self.crpix.1))
    }

    /// Mean pixel scale, arcseconds per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        self.cd.determinant().abs().sqrt().to_degrees() * 3600.0
    }

    /// True when a sky position projects outside the usable detector area:
    /// off the tangent plane entirely, or within [`EDGE_BORDER_PIX`] of the
    /// `width` x `height` boundary.
    pub fn at_edge(&self, ra_deg: f64, dec_deg: f64, width: f64, height: f64) -> bool {
        match self.sky_to_pixel(ra_deg, dec_deg) {
            None => true,
            Some((px, py)) => {
                px < EDGE_BORDER_PIX
                    || py < EDGE_BORDER_PIX
                    || px > width - EDGE_BORDER_PIX
                    || py > height - EDGE_BORDER_PIX
            }
        }
    }
}
