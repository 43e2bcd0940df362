//! # sf-core
//!
//! Core definitions for starfit: hard resource ceilings, the error taxonomy,
//! and the shared data model for crowded-field scene evaluation.
//!
//! ## Architecture
//!
//! The evaluation kernel (sf-kernel) and any outer optimizer/sampler both
//! depend on this crate, never on each other's internals:
//! - [`limits`]: compile-time ceilings every fixed-capacity structure is
//!   sized from
//! - [`types`] / [`psf`]: source parameters, band geometry, PSF mixtures,
//!   and the kernel's response types
//! - [`traits`]: the [`SceneKernel`] seam the optimizer drives

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod limits;
pub mod psf;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use psf::{PsfGaussian, PsfMixture};
pub use traits::SceneKernel;
pub use types::{
    BandGeometry, ModelResponse, Param, PixelGrid, ProposalResponse, Scene, SceneSource,
    SourceParams,
};
