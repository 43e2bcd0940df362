//! Patch evaluation drivers.
//!
//! A driver owns one band's geometry and configuration, validates every
//! ceiling before anything is sized from the inputs, builds the block's
//! image-Gaussian records, runs the pixel loop (serial block loop or Rayon
//! rows), and reduces the accumulator shards once at the end. Everything
//! detectable fails before the pixel loop starts; nothing is recovered
//! mid-block.

use rayon::prelude::*;

use sf_core::limits::NUM_ACCUMS;
use sf_core::types::{BandGeometry, ModelResponse, PixelGrid, ProposalResponse, Scene};
use sf_core::{Error, Result, SceneKernel};

use crate::accum::{AccumulatorBank, BlockAccumulator};
use crate::gaussian::GaussianBlock;
use crate::pixel::pixel_model_and_gradient;
use crate::simd::row_model_simd;

/// CPU evaluator for one band's pixel patches.
///
/// Implements [`SceneKernel`] for both the serial block loop (deterministic,
/// bit-reproducible) and the Rayon row-parallel loop (same results up to
/// accumulation-order rounding).
pub struct PatchEvaluator {
    geom: BandGeometry,
    band: usize,
    n_banks: usize,
    prune: bool,
    parallel: bool,
}

impl PatchEvaluator {
    /// An evaluator for `band` on the given frame geometry, with the default
    /// bank count, pruning on, and serial execution.
    pub fn new(geom: BandGeometry, band: usize) -> Self {
        Self { geom, band, n_banks: NUM_ACCUMS, prune: true, parallel: false }
    }

    /// Use `n_banks` accumulator shards per block.
    ///
    /// More shards trade block-budget memory for less write contention; the
    /// count is validated against the budget per scene, at evaluation time.
    pub fn with_banks(mut self, n_banks: usize) -> Result<Self> {
        if n_banks == 0 {
            return Err(Error::Config("at least one accumulator bank is required".into()));
        }
        self.n_banks = n_banks;
        Ok(self)
    }

    /// Enable or disable truncation-radius pruning (on by default).
    pub fn with_pruning(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Evaluate rows in parallel on the Rayon pool instead of the serial
    /// block loop.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn check_grid(grid: &PixelGrid) -> Result<()> {
        if grid.nx == 0 || grid.ny == 0 {
            return Err(Error::Config(format!("empty pixel grid ({} x {})", grid.nx, grid.ny)));
        }
        Ok(())
    }

    fn model_serial(&self, block: &GaussianBlock, grid: &PixelGrid) -> (Vec<f32>, AccumulatorBank) {
        let mut accum = BlockAccumulator::new(self.n_banks);
        let mut model = vec![0.0f32; grid.npix()];
        for j in 0..grid.ny {
            let yp = grid.y0 + j as f32;
            for i in 0..grid.nx {
                let p = j * grid.nx + i;
                let bank = accum.bank_mut(p);
                let m =
                    pixel_model_and_gradient(block, grid.x0 + i as f32, yp, 1.0, self.prune, bank);
                bank.add_total(m);
                model[p] = m;
            }
        }
        (model, accum.reduce())
    }

    fn model_parallel(
        &self,
        block: &GaussianBlock,
        grid: &PixelGrid,
    ) -> (Vec<f32>, AccumulatorBank) {
        let mut model = vec![0.0f32; grid.npix()];
        let reduced = model
            .par_chunks_mut(grid.nx)
            .enumerate()
            .map(|(j, row)| {
                let mut bank = AccumulatorBank::new();
                let yp = grid.y0 + j as f32;
                for (i, slot) in row.iter_mut().enumerate() {
                    let m = pixel_model_and_gradient(
                        block,
                        grid.x0 + i as f32,
                        yp,
                        1.0,
                        self.prune,
                        &mut bank,
                    );
                    bank.add_total(m);
                    *slot = m;
                }
                bank
            })
            .reduce(AccumulatorBank::new, |mut a, b| {
                a.merge(&b);
                a
            });
        (model, reduced)
    }

    fn proposal_serial(
        &self,
        block: &GaussianBlock,
        grid: &PixelGrid,
        data: &[f32],
        ierr: &[f32],
    ) -> (Vec<f32>, AccumulatorBank) {
        // Pass 1: the model image, row-kernel fast path.
        let mut model = vec![0.0f32; grid.npix()];
        for (j, row) in model.chunks_mut(grid.nx).enumerate() {
            row_model_simd(block, grid.x0, grid.y0 + j as f32, self.prune, row);
        }

        // Pass 2: chi² and residual-weighted gradients.
        let mut accum = BlockAccumulator::new(self.n_banks);
        for j in 0..grid.ny {
            let yp = grid.y0 + j as f32;
            for i in 0..grid.nx {
                let p = j * grid.nx + i;
                let resid = (data[p] - model[p]) * ierr[p];
                let bank = accum.bank_mut(p);
                bank.add_total(resid * resid);
                let w = -2.0 * resid * ierr[p];
                if w != 0.0 {
                    pixel_model_and_gradient(
                        block,
                        grid.x0 + i as f32,
                        yp,
                        w,
                        self.prune,
                        bank,
                    );
                }
            }
        }
        (model, accum.reduce())
    }

    fn proposal_parallel(
        &self,
        block: &GaussianBlock,
        grid: &PixelGrid,
        data: &[f32],
        ierr: &[f32],
    ) -> (Vec<f32>, AccumulatorBank) {
        let nx = grid.nx;
        let mut model = vec![0.0f32; grid.npix()];
        let reduced = model
            .par_chunks_mut(nx)
            .enumerate()
            .map(|(j, row)| {
                let yp = grid.y0 + j as f32;
                row_model_simd(block, grid.x0, yp, self.prune, row);
                let mut bank = AccumulatorBank::new();
                let off = j * nx;
                for i in 0..nx {
                    let resid = (data[off + i] - row[i]) * ierr[off + i];
                    bank.add_total(resid * resid);
                    let w = -2.0 * resid * ierr[off + i];
                    if w != 0.0 {
                        pixel_model_and_gradient(
                            block,
                            grid.x0 + i as f32,
                            yp,
                            w,
                            self.prune,
                            &mut bank,
                        );
                    }
                }
                bank
            })
            .reduce(AccumulatorBank::new, |mut a, b| {
                a.merge(&b);
                a
            });
        (model, reduced)
    }
}

impl SceneKernel for PatchEvaluator {
    fn evaluate_model(&self, scene: &Scene, grid: &PixelGrid) -> Result<ModelResponse> {
        Self::check_grid(grid)?;
        let block = GaussianBlock::build(scene, &self.geom, self.band, self.n_banks)?;
        let (model, reduced) = if self.parallel {
            self.model_parallel(&block, grid)
        } else {
            self.model_serial(&block, grid)
        };
        Ok(ModelResponse {
            model,
            flux: reduced.total(),
            gradient: reduced.gradient().to_vec(),
        })
    }

    fn evaluate_proposal(
        &self,
        scene: &Scene,
        grid: &PixelGrid,
        data: &[f32],
        ierr: &[f32],
    ) -> Result<ProposalResponse> {
        Self::check_grid(grid)?;
        let npix = grid.npix();
        if data.len() != npix || ierr.len() != npix {
            return Err(Error::Config(format!(
                "data/ierr lengths ({}, {}) do not match the grid ({npix} pixels)",
                data.len(),
                ierr.len()
            )));
        }
        let block = GaussianBlock::build(scene, &self.geom, self.band, self.n_banks)?;
        let (model, reduced) = if self.parallel {
            self.proposal_parallel(&block, grid, data, ierr)
        } else {
            self.proposal_serial(&block, grid, data, ierr)
        };
        Ok(ProposalResponse {
            model,
            chi2: reduced.total(),
            gradient: reduced.gradient().to_vec(),
        })
    }

    fn name(&self) -> &str {
        if self.parallel { "cpu-parallel" } else { "cpu-serial" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use sf_core::limits::{MAX_SOURCES, NPARAMS};
    use sf_core::types::{SceneSource, SourceParams};
    use sf_core::{PsfGaussian, PsfMixture};

    fn geometry() -> BandGeometry {
        BandGeometry {
            crval: [0.0, 0.0],
            crpix: [8.0, 8.0],
            dpix_dsky: [[1.0, 0.0], [0.0, 1.0]],
            scale: [[1.0, 0.0], [0.0, 1.0]],
            counts: 50.0,
        }
    }

    fn source(ra: f64, dec: f64, flux: f64) -> SceneSource {
        SceneSource {
            params: SourceParams {
                ra,
                dec,
                q: 0.85,
                pa: 0.2,
                nsersic: 1.2,
                rh: 0.3,
                fluxes: vec![flux],
            },
            psf: PsfMixture::new(vec![
                PsfGaussian { radius: 0.3, ..PsfGaussian::circular(0.8, 1.2) },
                PsfGaussian { x: 0.1, y: 0.2, ..PsfGaussian::circular(0.2, 2.6) },
            ])
            .unwrap(),
        }
    }

    fn scene() -> Scene {
        Scene { sources: vec![source(-2.0, 1.0, 3.0), source(3.0, -2.5, 5.0)] }
    }

    fn grid() -> PixelGrid {
        PixelGrid::new(0.0, 0.0, 16, 16).unwrap()
    }

    #[test]
    fn test_rejects_too_many_sources() {
        let scene = Scene {
            sources: (0..MAX_SOURCES + 1).map(|k| source(k as f64 * 0.1, 0.0, 1.0)).collect(),
        };
        let kernel = PatchEvaluator::new(geometry(), 0);
        let err = kernel.evaluate_model(&scene, &grid()).unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
    }

    #[test]
    fn test_rejects_mismatched_data() {
        let kernel = PatchEvaluator::new(geometry(), 0);
        let g = grid();
        let err = kernel
            .evaluate_proposal(&scene(), &g, &vec![0.0; g.npix() - 1], &vec![1.0; g.npix()])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_scene_is_zero() {
        let kernel = PatchEvaluator::new(geometry(), 0);
        let out = kernel.evaluate_model(&Scene::default(), &grid()).unwrap();
        assert!(out.model.iter().all(|&m| m == 0.0));
        assert_eq!(out.flux, 0.0);
        assert!(out.gradient.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_idempotent_evaluation() {
        let kernel = PatchEvaluator::new(geometry(), 0);
        let a = kernel.evaluate_model(&scene(), &grid()).unwrap();
        let b = kernel.evaluate_model(&scene(), &grid()).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.flux, b.flux);
        assert_eq!(a.gradient, b.gradient);
    }

    #[test]
    fn test_flux_is_sum_of_model() {
        let kernel = PatchEvaluator::new(geometry(), 0);
        let out = kernel.evaluate_model(&scene(), &grid()).unwrap();
        let sum: f32 = out.model.iter().sum();
        assert_relative_eq!(out.flux, sum, max_relative = 1e-5);
        assert!(out.flux > 0.0);
    }

    #[test]
    fn test_inactive_sources_have_zero_gradient() {
        let kernel = PatchEvaluator::new(geometry(), 0);
        let out = kernel.evaluate_model(&scene(), &grid()).unwrap();
        assert_eq!(out.gradient.len(), NPARAMS * MAX_SOURCES);
        for i in 2..MAX_SOURCES {
            assert!(out.source_gradient(i).iter().all(|&g| g == 0.0));
        }
        assert!(out.source_gradient(0).iter().any(|&g| g != 0.0));
    }

    #[test]
    fn test_bank_count_does_not_change_results() {
        let base = PatchEvaluator::new(geometry(), 0).evaluate_model(&scene(), &grid()).unwrap();
        for n_banks in [2, 4, 7] {
            let kernel = PatchEvaluator::new(geometry(), 0).with_banks(n_banks).unwrap();
            let out = kernel.evaluate_model(&scene(), &grid()).unwrap();
            assert_eq!(out.model, base.model);
            assert_relative_eq!(out.flux, base.flux, max_relative = 1e-5);
            for (a, b) in out.gradient.iter().zip(&base.gradient) {
                assert_relative_eq!(*a, *b, max_relative = 1e-4, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_parallel_matches_serial() {
        let serial = PatchEvaluator::new(geometry(), 0);
        let parallel = PatchEvaluator::new(geometry(), 0).with_parallel(true);
        assert_eq!(serial.name(), "cpu-serial");
        assert_eq!(parallel.name(), "cpu-parallel");

        let a = serial.evaluate_model(&scene(), &grid()).unwrap();
        let b = parallel.evaluate_model(&scene(), &grid()).unwrap();
        assert_eq!(a.model, b.model);
        assert_relative_eq!(a.flux, b.flux, max_relative = 1e-5);
        for (x, y) in a.gradient.iter().zip(&b.gradient) {
            assert_relative_eq!(*x, *y, max_relative = 1e-4, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pruning_does_not_change_results() {
        let pruned = PatchEvaluator::new(geometry(), 0);
        let full = PatchEvaluator::new(geometry(), 0).with_pruning(false);
        let a = pruned.evaluate_model(&scene(), &grid()).unwrap();
        let b = full.evaluate_model(&scene(), &grid()).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.gradient, b.gradient);
    }

    #[test]
    fn test_perfect_data_has_zero_chi2() {
        let kernel = PatchEvaluator::new(geometry(), 0);
        let g = grid();
        let model = kernel.evaluate_model(&scene(), &g).unwrap().model;
        let ierr = vec![1.0f32; g.npix()];
        let out = kernel.evaluate_proposal(&scene(), &g, &model, &ierr).unwrap();
        assert_eq!(out.chi2, 0.0);
        assert!(out.gradient.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_underestimated_flux_pulls_gradient_down() {
        // Data drawn from a brighter copy of the scene: raising the model
        // flux must lower chi², so dchi²/dflux is negative.
        let kernel = PatchEvaluator::new(geometry(), 0);
        let g = grid();
        let mut bright = scene();
        for src in &mut bright.sources {
            for f in &mut src.params.fluxes {
                *f *= 1.5;
            }
        }
        let data = kernel.evaluate_model(&bright, &g).unwrap().model;
        let ierr = vec![1.0f32; g.npix()];
        let out = kernel.evaluate_proposal(&scene(), &g, &data, &ierr).unwrap();
        assert!(out.chi2 > 0.0);
        assert!(out.source_gradient(0)[0] < 0.0);
        assert!(out.source_gradient(1)[0] < 0.0);
    }

    #[test]
    fn test_masked_pixels_do_not_contribute() {
        let kernel = PatchEvaluator::new(geometry(), 0);
        let g = grid();
        let data = vec![10.0f32; g.npix()];
        let ierr = vec![0.0f32; g.npix()];
        let out = kernel.evaluate_proposal(&scene(), &g, &data, &ierr).unwrap();
        assert_eq!(out.chi2, 0.0);
        assert!(out.gradient.iter().all(|&v| v == 0.0));
    }

    proptest! {
        // Property test: evaluation is idempotent and bank-count invariant
        // for arbitrary small scenes.
        #[test]
        fn prop_bank_count_invariant(
            n_sources in 1usize..5,
            offsets in proptest::collection::vec((-4.0f64..4.0, -4.0f64..4.0, 0.5f64..8.0), 5),
            n_banks in 2usize..6,
        ) {
            let sources = (0..n_sources)
                .map(|k| {
                    let (ra, dec, flux) = offsets[k];
                    source(ra, dec, flux)
                })
                .collect();
            let scene = Scene { sources };
            let g = grid();

            let a = PatchEvaluator::new(geometry(), 0).evaluate_model(&scene, &g).unwrap();
            let b = PatchEvaluator::new(geometry(), 0)
                .with_banks(n_banks)
                .unwrap()
                .evaluate_model(&scene, &g)
                .unwrap();

            prop_assert_eq!(a.model, b.model);
            for (x, y) in a.gradient.iter().zip(&b.gradient) {
                prop_assert!((x - y).abs() <= 1e-4 * x.abs().max(1.0));
            }
        }
    }
}
