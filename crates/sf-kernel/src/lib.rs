//! # sf-kernel
//!
//! The computational core of starfit: for one band's pixel patch, turn the
//! active sources' on-sky parameters and PSF mixtures into a per-pixel model
//! image plus analytic per-source gradients, under the hard per-block memory
//! ceilings defined in `sf-core::limits`.
//!
//! ## Pipeline
//!
//! 1. [`gaussian`]: build one packed image-Gaussian record per
//!    (source, PSF component) pair for the current proposal, including the
//!    derivative-propagation factors (run once per proposal).
//! 2. [`pixel`] / [`simd`]: evaluate every in-range record at each pixel,
//!    applying the exponential-argument cutoff, and chain-rule the per-pixel
//!    terms onto the 7 source parameters (run once per pixel).
//! 3. [`accum`]: sharded partial-sum banks absorbing the per-pixel updates,
//!    reduced once at the end of the block.
//! 4. [`patch`]: the drivers tying it together, with validation, the serial
//!    block loop, and the Rayon data-parallel loop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accum;
pub mod gaussian;
pub mod patch;
pub mod pixel;
pub mod simd;

pub use accum::{AccumulatorBank, BlockAccumulator};
pub use gaussian::{GaussianBlock, GaussianBuilder, ImageGaussian, RadiusTable};
pub use patch::PatchEvaluator;
