//! Shared data types for scene evaluation.

use serde::{Deserialize, Serialize};

use crate::limits::{MAX_BANDS, MAX_SOURCES, NPARAMS};
use crate::psf::PsfMixture;
use crate::{Error, Result};

/// Index of each on-sky parameter inside a source's 7-slot gradient vector.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Band flux.
    Flux = 0,
    /// Right ascension.
    Ra = 1,
    /// Declination.
    Dec = 2,
    /// Axis-ratio shape parameter.
    Q = 3,
    /// Position angle.
    Pa = 4,
    /// Sersic index.
    Sersic = 5,
    /// Half-light radius.
    Rh = 6,
}

/// On-sky parameters of one source.
///
/// The six positional/shape parameters are shared across bands; `fluxes`
/// carries one entry per band in the joint fit. The per-band free parameter
/// vector, in gradient order, is
/// `[flux, ra, dec, q, pa, nsersic, rh]` ([`NPARAMS`] entries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceParams {
    /// Right ascension, degrees.
    pub ra: f64,
    /// Declination, degrees.
    pub dec: f64,
    /// Axis-ratio shape parameter, sqrt of minor over major axis.
    pub q: f64,
    /// Position angle, radians.
    pub pa: f64,
    /// Sersic index of the profile.
    pub nsersic: f64,
    /// Half-light radius, arcsec.
    pub rh: f64,
    /// Per-band fluxes, `fluxes[band]`, physical units.
    pub fluxes: Vec<f64>,
}

impl SourceParams {
    /// Flux in `band`, or a `Config` error if the source carries no entry
    /// for that band.
    pub fn flux(&self, band: usize) -> Result<f64> {
        self.fluxes.get(band).copied().ok_or_else(|| {
            Error::Config(format!(
                "source has {} band fluxes, band index {band} requested",
                self.fluxes.len()
            ))
        })
    }

    fn check_finite(&self) -> bool {
        self.ra.is_finite()
            && self.dec.is_finite()
            && self.q.is_finite()
            && self.pa.is_finite()
            && self.nsersic.is_finite()
            && self.rh.is_finite()
            && self.fluxes.iter().all(|f| f.is_finite())
    }
}

/// Astrometric and photometric description of one band's pixel frame.
///
/// `sky_to_pix` is the local affine approximation
/// `pix = crpix + dpix_dsky · (sky − crval)`. `scale` maps sky-plane
/// covariances into pixel coordinates, and `counts` converts physical flux
/// into image counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandGeometry {
    /// Reference sky position `(ra, dec)`, degrees.
    pub crval: [f64; 2],
    /// Pixel coordinates of the reference position.
    pub crpix: [f64; 2],
    /// Jacobian of pixel coordinates with respect to sky coordinates.
    pub dpix_dsky: [[f64; 2]; 2],
    /// 2×2 sky→pixel scale matrix applied to source covariances.
    pub scale: [[f64; 2]; 2],
    /// Physical flux to image counts conversion factor.
    pub counts: f64,
}

impl BandGeometry {
    /// Project a sky position onto the pixel frame.
    pub fn sky_to_pix(&self, ra: f64, dec: f64) -> [f64; 2] {
        let dra = ra - self.crval[0];
        let ddec = dec - self.crval[1];
        let cw = &self.dpix_dsky;
        [
            self.crpix[0] + cw[0][0] * dra + cw[0][1] * ddec,
            self.crpix[1] + cw[1][0] * dra + cw[1][1] * ddec,
        ]
    }
}

/// A rectangular patch of pixel centers.
///
/// Pixel `(i, j)` sits at `(x0 + i, y0 + j)` with `i < nx`, `j < ny`;
/// flat indexing is row-major (`p = j * nx + i`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PixelGrid {
    /// x coordinate of the first pixel center.
    pub x0: f32,
    /// y coordinate of the first pixel center.
    pub y0: f32,
    /// Pixels per row.
    pub nx: usize,
    /// Number of rows.
    pub ny: usize,
}

impl PixelGrid {
    /// A grid with at least one pixel.
    pub fn new(x0: f32, y0: f32, nx: usize, ny: usize) -> Result<Self> {
        if nx == 0 || ny == 0 {
            return Err(Error::Config(format!("empty pixel grid ({nx} x {ny})")));
        }
        Ok(Self { x0, y0, nx, ny })
    }

    /// Total pixel count.
    pub fn npix(&self) -> usize {
        self.nx * self.ny
    }
}

/// One active source: its parameters plus its PSF mixture for the band being
/// evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSource {
    /// On-sky parameters.
    pub params: SourceParams,
    /// The source's PSF mixture in the current band (possibly expanded with
    /// the source's radial profile components).
    pub psf: PsfMixture,
}

/// The active sources of one patch evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    /// Active sources, at most [`MAX_SOURCES`].
    pub sources: Vec<SceneSource>,
}

impl Scene {
    /// Check the scene against the hard ceilings for an evaluation in `band`.
    ///
    /// This is the fail-fast precondition gate: every violation is surfaced
    /// here, before any per-block structure is sized from the scene.
    pub fn validate(&self, band: usize) -> Result<()> {
        if band >= MAX_BANDS {
            return Err(Error::Capacity(format!(
                "band index {band} exceeds MAX_BANDS ({MAX_BANDS})"
            )));
        }
        if self.sources.len() > MAX_SOURCES {
            return Err(Error::Capacity(format!(
                "{} active sources exceed MAX_SOURCES ({MAX_SOURCES})",
                self.sources.len()
            )));
        }
        for (i, src) in self.sources.iter().enumerate() {
            if !src.params.check_finite() {
                return Err(Error::Config(format!("source {i} has non-finite parameters")));
            }
            if src.params.q <= 0.0 {
                return Err(Error::Config(format!(
                    "source {i} axis ratio must be positive, got {}",
                    src.params.q
                )));
            }
            if src.params.rh < 0.0 {
                return Err(Error::Config(format!(
                    "source {i} half-light radius must be non-negative, got {}",
                    src.params.rh
                )));
            }
            // Forces the per-band flux lookup to fail here rather than later.
            src.params.flux(band)?;
        }
        Ok(())
    }

    /// Total image-Gaussian records this scene expands to.
    pub fn n_gaussians(&self) -> usize {
        self.sources.iter().map(|s| s.psf.len()).sum()
    }
}

/// Model image and flux gradients for one patch evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Model counts per pixel, row-major over the grid.
    pub model: Vec<f32>,
    /// Total model counts over the patch.
    pub flux: f32,
    /// `d(total)/dθ`, length `NPARAMS * MAX_SOURCES`, zero-filled for
    /// inactive sources.
    pub gradient: Vec<f32>,
}

/// χ² and its gradients for one proposal evaluated against observed data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalResponse {
    /// Model counts per pixel, row-major over the grid.
    pub model: Vec<f32>,
    /// `Σ ((data − model) · ierr)²` over the patch.
    pub chi2: f32,
    /// `dχ²/dθ`, length `NPARAMS * MAX_SOURCES`, zero-filled for inactive
    /// sources.
    pub gradient: Vec<f32>,
}

impl ModelResponse {
    /// The 7-slot gradient vector of source `i`.
    pub fn source_gradient(&self, i: usize) -> &[f32] {
        &self.gradient[i * NPARAMS..(i + 1) * NPARAMS]
    }
}

impl ProposalResponse {
    /// The 7-slot gradient vector of source `i`.
    pub fn source_gradient(&self, i: usize) -> &[f32] {
        &self.gradient[i * NPARAMS..(i + 1) * NPARAMS]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psf::PsfMixture;

    fn point_source(flux: f64) -> SceneSource {
        SceneSource {
            params: SourceParams {
                ra: 0.0,
                dec: 0.0,
                q: 1.0,
                pa: 0.0,
                nsersic: 1.0,
                rh: 0.0,
                fluxes: vec![flux],
            },
            psf: PsfMixture::single(2.0).unwrap(),
        }
    }

    #[test]
    fn test_sky_to_pix_affine() {
        let geom = BandGeometry {
            crval: [10.0, 20.0],
            crpix: [50.0, 60.0],
            dpix_dsky: [[2.0, 0.0], [0.0, 3.0]],
            scale: [[1.0, 0.0], [0.0, 1.0]],
            counts: 1.0,
        };
        let p = geom.sky_to_pix(11.0, 22.0);
        assert_eq!(p, [52.0, 66.0]);
    }

    #[test]
    fn test_grid_rejects_empty() {
        assert!(PixelGrid::new(0.0, 0.0, 0, 4).is_err());
        assert!(PixelGrid::new(0.0, 0.0, 4, 0).is_err());
        assert_eq!(PixelGrid::new(0.0, 0.0, 4, 3).unwrap().npix(), 12);
    }

    #[test]
    fn test_scene_ceilings() {
        let scene = Scene { sources: (0..MAX_SOURCES + 1).map(|_| point_source(1.0)).collect() };
        assert!(matches!(scene.validate(0), Err(Error::Capacity(_))));

        let scene = Scene { sources: vec![point_source(1.0)] };
        assert!(scene.validate(0).is_ok());
        assert!(matches!(scene.validate(MAX_BANDS), Err(Error::Capacity(_))));
        // One flux entry, so band 1 is a configuration error.
        assert!(matches!(scene.validate(1), Err(Error::Config(_))));
    }

    #[test]
    fn test_scene_rejects_bad_shape() {
        let mut s = point_source(1.0);
        s.params.q = 0.0;
        let scene = Scene { sources: vec![s] };
        assert!(matches!(scene.validate(0), Err(Error::Config(_))));
    }
}
