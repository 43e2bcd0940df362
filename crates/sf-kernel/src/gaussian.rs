//! Image-plane Gaussian records and their construction.
//!
//! The builder runs once per (source, PSF component) pair per proposal: it
//! projects the source's sky parameters through the band geometry, convolves
//! the source profile component with the PSF component, and precomputes
//! everything the per-pixel evaluator needs: the exponential-form
//! coefficients of the convolved Gaussian and the propagation factors that
//! map per-pixel chain-rule terms back onto the 7 source parameters. Matrix
//! work happens in f64 and is narrowed once, at record construction.

use nalgebra::Matrix2;

use sf_core::limits::{
    ACCUM_SLOTS, BLOCK_BUDGET_FLOATS, IMAGE_GAUSSIAN_FLOATS, MAX_EXP_ARG, MAX_RADII,
};
use sf_core::types::{BandGeometry, Scene, SourceParams};
use sf_core::{Error, PsfMixture, Result};

/// One image-plane Gaussian: a (source, PSF component) pair projected onto
/// the pixel frame for the current proposal.
///
/// Exactly [`IMAGE_GAUSSIAN_FLOATS`] (21) `f32` fields: six
/// geometry/amplitude fields, then fifteen derivative-propagation factors.
/// Records are write-once: built before a block starts, read-only while the
/// block's pixels are evaluated.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImageGaussian {
    /// Peak amplitude, image counts.
    pub amp: f32,
    /// Center x, pixels.
    pub xcen: f32,
    /// Center y, pixels.
    pub ycen: f32,
    /// Inverse-covariance xx coefficient.
    pub fxx: f32,
    /// Inverse-covariance yy coefficient.
    pub fyy: f32,
    /// Inverse-covariance xy coefficient.
    pub fxy: f32,
    /// `d(amp)/d(flux)`.
    pub da_dflux: f32,
    /// `d(amp)/d(q)`.
    pub da_dq: f32,
    /// `d(amp)/d(pa)`.
    pub da_dpa: f32,
    /// `d(amp)/d(nsersic)`.
    pub da_dsersic: f32,
    /// `d(amp)/d(rh)`.
    pub da_drh: f32,
    /// `d(xcen)/d(ra)`.
    pub dx_dalpha: f32,
    /// `d(ycen)/d(ra)`.
    pub dy_dalpha: f32,
    /// `d(xcen)/d(dec)`.
    pub dx_ddelta: f32,
    /// `d(ycen)/d(dec)`.
    pub dy_ddelta: f32,
    /// `d(fxx)/d(q)`.
    pub dfxx_dq: f32,
    /// `d(fyy)/d(q)`.
    pub dfyy_dq: f32,
    /// `d(fxy)/d(q)`.
    pub dfxy_dq: f32,
    /// `d(fxx)/d(pa)`.
    pub dfxx_dpa: f32,
    /// `d(fyy)/d(pa)`.
    pub dfyy_dpa: f32,
    /// `d(fxy)/d(pa)`.
    pub dfxy_dpa: f32,
}

// The block budget accounting assumes the packed layout.
const _: () = assert!(
    std::mem::size_of::<ImageGaussian>() == IMAGE_GAUSSIAN_FLOATS * std::mem::size_of::<f32>()
);

fn rotation_matrix(pa: f64) -> Matrix2<f64> {
    let (s, c) = pa.sin_cos();
    Matrix2::new(c, -s, s, c)
}

fn rotation_matrix_deriv(pa: f64) -> Matrix2<f64> {
    let (s, c) = pa.sin_cos();
    Matrix2::new(-s, -c, c, -s)
}

fn scale_matrix(q: f64) -> Matrix2<f64> {
    Matrix2::new(1.0 / q, 0.0, 0.0, q)
}

fn scale_matrix_deriv(q: f64) -> Matrix2<f64> {
    Matrix2::new(-1.0 / (q * q), 0.0, 0.0, 1.0)
}

/// Builds the image-Gaussian records of one source for one band.
pub struct GaussianBuilder<'a> {
    geom: &'a BandGeometry,
    band: usize,
}

impl<'a> GaussianBuilder<'a> {
    /// A builder for `band` on the given frame geometry.
    pub fn new(geom: &'a BandGeometry, band: usize) -> Self {
        Self { geom, band }
    }

    /// Append one record per PSF component to `out`.
    ///
    /// Deterministic, no side effects beyond the appended records. Fails with
    /// [`Error::Degenerate`] if any convolved covariance is not positive
    /// definite, before anything is appended for that source.
    pub fn build_source(
        &self,
        src: &SourceParams,
        psf: &PsfMixture,
        out: &mut Vec<ImageGaussian>,
    ) -> Result<()> {
        let flux = src.flux(self.band)?;
        let counts = self.geom.counts;

        let d = mat2(&self.geom.scale);
        let cw = &self.geom.dpix_dsky;
        let rot = rotation_matrix(src.pa);
        let sc = scale_matrix(src.q);
        let t = d * rot * sc;
        let dt_dq = d * rot * scale_matrix_deriv(src.q);
        let dt_dpa = d * rotation_matrix_deriv(src.pa) * sc;
        let tt = t * t.transpose();
        let [xc, yc] = self.geom.sky_to_pix(src.ra, src.dec);

        let start = out.len();
        for (i, comp) in psf.components().iter().enumerate() {
            let r2 = comp.radius * comp.radius;
            let sigma = r2 * tt + Matrix2::new(comp.cxx, comp.cxy, comp.cxy, comp.cyy);
            let det = sigma.determinant();
            if det <= 0.0 || !det.is_finite() || sigma.m11 <= 0.0 {
                out.truncate(start);
                return Err(Error::Degenerate(format!(
                    "convolved covariance of PSF component {i} has determinant {det}"
                )));
            }
            let f = Matrix2::new(sigma.m22, -sigma.m12, -sigma.m21, sigma.m11) / det;
            let detf = 1.0 / det;
            let root = detf.sqrt();

            let norm = counts * root / (2.0 * std::f64::consts::PI);
            let amp = flux * comp.amp * norm;

            // d(Sigma)/dtheta for the two shape parameters; the profile radius
            // grid is fixed, so Sigma does not depend on nsersic or rh.
            let dsig_dq = r2 * (dt_dq * t.transpose() + t * dt_dq.transpose());
            let dsig_dpa = r2 * (dt_dpa * t.transpose() + t * dt_dpa.transpose());
            let df_dq = -(f * dsig_dq * f);
            let df_dpa = -(f * dsig_dpa * f);
            let da_dq = 0.5 * amp * (sigma * df_dq).trace();
            let da_dpa = 0.5 * amp * (sigma * df_dpa).trace();

            out.push(ImageGaussian {
                amp: amp as f32,
                xcen: (xc + comp.x) as f32,
                ycen: (yc + comp.y) as f32,
                fxx: f.m11 as f32,
                fyy: f.m22 as f32,
                fxy: f.m12 as f32,
                da_dflux: (comp.amp * norm) as f32,
                da_dq: da_dq as f32,
                da_dpa: da_dpa as f32,
                da_dsersic: (flux * comp.damp_dsersic * norm) as f32,
                da_drh: (flux * comp.damp_drh * norm) as f32,
                dx_dalpha: cw[0][0] as f32,
                dy_dalpha: cw[1][0] as f32,
                dx_ddelta: cw[0][1] as f32,
                dy_ddelta: cw[1][1] as f32,
                dfxx_dq: df_dq.m11 as f32,
                dfyy_dq: df_dq.m22 as f32,
                dfxy_dq: df_dq.m12 as f32,
                dfxx_dpa: df_dpa.m11 as f32,
                dfyy_dpa: df_dpa.m22 as f32,
                dfxy_dpa: df_dpa.m12 as f32,
            });
        }
        Ok(())
    }
}

fn mat2(m: &[[f64; 2]; 2]) -> Matrix2<f64> {
    Matrix2::new(m[0][0], m[0][1], m[1][0], m[1][1])
}

/// Quantized truncation radii for one block's records.
///
/// Each record's required radius satisfies `r² ≥ MAX_EXP_ARG · λmax(Σ)`:
/// beyond it the exponential argument is guaranteed past the cutoff, so
/// pruning against the assigned table radius reproduces the cutoff decision
/// exactly and never changes results.
#[derive(Debug, Clone)]
pub struct RadiusTable {
    radii_sq: Vec<f32>,
}

impl RadiusTable {
    /// Build a table of at most [`MAX_RADII`] levels for `records`, returning
    /// the table and each record's assigned level.
    pub fn build(records: &[ImageGaussian]) -> (Self, Vec<u8>) {
        let req: Vec<f32> = records.iter().map(required_radius_sq).collect();
        let finite: Vec<f32> = req.iter().copied().filter(|r| r.is_finite()).collect();
        let has_inf = finite.len() != req.len();
        if finite.is_empty() {
            let table = Self { radii_sq: vec![f32::INFINITY] };
            return (table, vec![0; req.len()]);
        }

        let lo = finite.iter().fold(f32::INFINITY, |a, &b| a.min(b));
        let hi = finite.iter().fold(0.0f32, |a, &b| a.max(b));
        let n_levels = if has_inf { MAX_RADII - 1 } else { MAX_RADII };
        let mut radii_sq = if hi <= lo * 1.0001 {
            vec![hi]
        } else {
            // Geometric spacing in r², rounded up at assignment, with the top
            // level pinned so every finite requirement has a home.
            let ratio = (hi as f64 / lo as f64).powf(1.0 / (n_levels - 1) as f64);
            let mut levels: Vec<f32> =
                (0..n_levels).map(|k| (lo as f64 * ratio.powi(k as i32)) as f32).collect();
            levels[n_levels - 1] = hi;
            levels
        };
        if has_inf {
            radii_sq.push(f32::INFINITY);
        }

        let bins = req
            .iter()
            .map(|&r| {
                radii_sq.iter().position(|&l| l >= r).unwrap_or(radii_sq.len() - 1) as u8
            })
            .collect();
        (Self { radii_sq }, bins)
    }

    /// Squared truncation radius of `level`.
    #[inline(always)]
    pub fn radius_sq(&self, level: u8) -> f32 {
        self.radii_sq[level as usize]
    }

    /// Number of levels in the table.
    pub fn len(&self) -> usize {
        self.radii_sq.len()
    }

    /// Whether the table has no levels (never true for a built table).
    pub fn is_empty(&self) -> bool {
        self.radii_sq.is_empty()
    }
}

/// Smallest squared distance guaranteed past the exponential cutoff:
/// `MAX_EXP_ARG · λmax(Σ)`, with `λmax(Σ) = 1 / λmin(F)`.
fn required_radius_sq(g: &ImageGaussian) -> f32 {
    let mean = 0.5 * (g.fxx + g.fyy);
    let diff = 0.5 * (g.fxx - g.fyy);
    let lam_min = mean - (diff * diff + g.fxy * g.fxy).sqrt();
    if lam_min > 0.0 { MAX_EXP_ARG / lam_min } else { f32::INFINITY }
}

/// All image Gaussians of one processing block, grouped by source.
///
/// Write-once shared state: built before the block's pixel loop, read-only
/// while evaluators run, so no locking is needed during evaluation.
#[derive(Debug, Clone)]
pub struct GaussianBlock {
    records: Vec<ImageGaussian>,
    /// Half-open record span per active source.
    spans: Vec<(u32, u32)>,
    radius_bins: Vec<u8>,
    radii: RadiusTable,
}

impl GaussianBlock {
    /// Validate the scene against the ceilings and the block budget, then
    /// build every source's records and the truncation-radius table.
    ///
    /// The budget check runs before any record is built: an oversized scene
    /// must never reach the allocation that would overflow shared memory on
    /// the reference GPU.
    pub fn build(
        scene: &Scene,
        geom: &BandGeometry,
        band: usize,
        n_banks: usize,
    ) -> Result<Self> {
        scene.validate(band)?;
        let n_gauss = scene.n_gaussians();
        let footprint = n_gauss * IMAGE_GAUSSIAN_FLOATS + n_banks * ACCUM_SLOTS;
        if footprint > BLOCK_BUDGET_FLOATS {
            return Err(Error::Capacity(format!(
                "block footprint {footprint} floats ({n_gauss} gaussians, {n_banks} banks) \
                 exceeds budget {BLOCK_BUDGET_FLOATS}"
            )));
        }
        log::debug!(
            "block: {} sources, {n_gauss} gaussians, footprint {footprint}/{BLOCK_BUDGET_FLOATS} floats",
            scene.sources.len()
        );

        let builder = GaussianBuilder::new(geom, band);
        let mut records = Vec::with_capacity(n_gauss);
        let mut spans = Vec::with_capacity(scene.sources.len());
        for src in &scene.sources {
            let start = records.len() as u32;
            builder.build_source(&src.params, &src.psf, &mut records)?;
            spans.push((start, records.len() as u32));
        }
        let (radii, radius_bins) = RadiusTable::build(&records);
        Ok(Self { records, spans, radius_bins, radii })
    }

    /// Number of active sources.
    pub fn n_sources(&self) -> usize {
        self.spans.len()
    }

    /// All records, source-major.
    pub fn records(&self) -> &[ImageGaussian] {
        &self.records
    }

    /// Radius-table level per record, parallel to [`Self::records`].
    pub fn radius_bins(&self) -> &[u8] {
        &self.radius_bins
    }

    /// Half-open record spans per source.
    pub fn spans(&self) -> &[(u32, u32)] {
        &self.spans
    }

    /// The block's truncation-radius table.
    pub fn radii(&self) -> &RadiusTable {
        &self.radii
    }
}
