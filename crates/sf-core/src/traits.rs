//! Trait seam between the evaluation kernel and its callers.
//!
//! The outer optimizer/sampler depends on [`SceneKernel`], not on a concrete
//! evaluator, so serial CPU, data-parallel CPU, and future device-resident
//! implementations stay interchangeable.

use crate::types::{ModelResponse, PixelGrid, ProposalResponse, Scene};
use crate::Result;

/// One band's scene evaluation kernel.
///
/// Implementations must reject ceiling violations before evaluating and must
/// apply the exponential cutoff identically, so that results are reproducible
/// across kernels up to accumulation-order rounding.
pub trait SceneKernel: Send + Sync {
    /// Evaluate the model image and the gradient of total model flux with
    /// respect to every active source's parameters.
    fn evaluate_model(&self, scene: &Scene, grid: &PixelGrid) -> Result<ModelResponse>;

    /// Evaluate χ² and its gradient against observed pixel `data` with
    /// per-pixel inverse errors `ierr` (both row-major over `grid`).
    fn evaluate_proposal(
        &self,
        scene: &Scene,
        grid: &PixelGrid,
        data: &[f32],
        ierr: &[f32],
    ) -> Result<ProposalResponse>;

    /// Kernel name (e.g. "cpu-serial").
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{MAX_SOURCES, NPARAMS};

    struct ZeroKernel;

    impl SceneKernel for ZeroKernel {
        fn evaluate_model(&self, _scene: &Scene, grid: &PixelGrid) -> Result<ModelResponse> {
            Ok(ModelResponse {
                model: vec![0.0; grid.npix()],
                flux: 0.0,
                gradient: vec![0.0; NPARAMS * MAX_SOURCES],
            })
        }

        fn evaluate_proposal(
            &self,
            _scene: &Scene,
            grid: &PixelGrid,
            _data: &[f32],
            _ierr: &[f32],
        ) -> Result<ProposalResponse> {
            Ok(ProposalResponse {
                model: vec![0.0; grid.npix()],
                chi2: 0.0,
                gradient: vec![0.0; NPARAMS * MAX_SOURCES],
            })
        }

        fn name(&self) -> &str {
            "zero"
        }
    }

    #[test]
    fn test_zero_kernel() {
        let kernel = ZeroKernel;
        let grid = PixelGrid::new(0.0, 0.0, 2, 2).unwrap();
        let out = kernel.evaluate_model(&Scene::default(), &grid).unwrap();
        assert_eq!(out.model.len(), 4);
        assert_eq!(out.source_gradient(0), &[0.0; NPARAMS]);
        assert_eq!(kernel.name(), "zero");
    }
}
