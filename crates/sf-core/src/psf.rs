//! Gaussian-mixture point-spread functions.
//!
//! A band's PSF is approximated by a small fixed-length mixture of 2-D
//! Gaussians produced by the calibration subsystem and supplied here
//! read-only. For an extended source the mixture is already expanded with
//! the source's radial profile components: each entry then carries the fixed
//! source-plane radius of its paired profile component together with the
//! amplitude derivatives with respect to the Sersic index and half-light
//! radius. A point source uses `radius = 0` and zero amplitude derivatives.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::limits::MAX_PSF_PER_SOURCE;
use crate::{Error, Result};

/// One Gaussian component of a PSF mixture, in pixel units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PsfGaussian {
    /// Mixture weight.
    pub amp: f64,
    /// Component center x offset from the source center, pixels.
    pub x: f64,
    /// Component center y offset from the source center, pixels.
    pub y: f64,
    /// Covariance xx entry, pixels².
    pub cxx: f64,
    /// Covariance yy entry, pixels².
    pub cyy: f64,
    /// Covariance xy entry, pixels².
    pub cxy: f64,
    /// Source-plane radius of the paired profile component, arcsec.
    #[serde(default)]
    pub radius: f64,
    /// `d(amp)/d(nsersic)` of the paired profile amplitude.
    #[serde(default)]
    pub damp_dsersic: f64,
    /// `d(amp)/d(rh)` of the paired profile amplitude.
    #[serde(default)]
    pub damp_drh: f64,
}

impl PsfGaussian {
    /// A circular component centered on the source.
    pub fn circular(amp: f64, sigma: f64) -> Self {
        Self {
            amp,
            x: 0.0,
            y: 0.0,
            cxx: sigma * sigma,
            cyy: sigma * sigma,
            cxy: 0.0,
            radius: 0.0,
            damp_dsersic: 0.0,
            damp_drh: 0.0,
        }
    }

    fn check(&self, i: usize) -> Result<()> {
        let finite = self.amp.is_finite()
            && self.x.is_finite()
            && self.y.is_finite()
            && self.cxx.is_finite()
            && self.cyy.is_finite()
            && self.cxy.is_finite()
            && self.radius.is_finite()
            && self.damp_dsersic.is_finite()
            && self.damp_drh.is_finite();
        if !finite {
            return Err(Error::Config(format!("PSF component {i} has non-finite entries")));
        }
        if self.cxx <= 0.0 || self.cyy <= 0.0 {
            return Err(Error::Degenerate(format!(
                "PSF component {i} has non-positive variances ({}, {})",
                self.cxx, self.cyy
            )));
        }
        if self.radius < 0.0 {
            return Err(Error::Config(format!(
                "PSF component {i} has negative profile radius {}",
                self.radius
            )));
        }
        Ok(())
    }
}

/// A fixed-length set of Gaussian components approximating one band's PSF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MixtureRepr")]
pub struct PsfMixture {
    components: Vec<PsfGaussian>,
}

/// Raw serde form, validated on conversion so a deserialized mixture obeys
/// the same invariants as a constructed one.
#[derive(Deserialize)]
struct MixtureRepr {
    components: Vec<PsfGaussian>,
}

impl TryFrom<MixtureRepr> for PsfMixture {
    type Error = Error;

    fn try_from(raw: MixtureRepr) -> Result<Self> {
        PsfMixture::new(raw.components)
    }
}

impl PsfMixture {
    /// A validated mixture: non-empty, finite, positive variances, and within
    /// the single-source record capacity.
    pub fn new(components: Vec<PsfGaussian>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::Config("PSF mixture has no components".into()));
        }
        if components.len() > MAX_PSF_PER_SOURCE {
            return Err(Error::Capacity(format!(
                "PSF mixture has {} components, per-source capacity is {MAX_PSF_PER_SOURCE}",
                components.len()
            )));
        }
        for (i, c) in components.iter().enumerate() {
            c.check(i)?;
        }
        Ok(Self { components })
    }

    /// A single circular Gaussian of the given FWHM in pixels.
    pub fn single(fwhm: f64) -> Result<Self> {
        Self::new(vec![PsfGaussian::circular(1.0, fwhm / 2.355)])
    }

    /// Parse a mixture from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let mix: PsfMixture = serde_json::from_str(text)?;
        Ok(mix)
    }

    /// Load a mixture from a JSON calibration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Mixture components.
    pub fn components(&self) -> &[PsfGaussian] {
        &self.components
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the mixture is empty (never true for a validated mixture).
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
