//! # Aggregation Links
//!
//! A link is the pair of transforms that moves values into a domain where a plain
//! weighted sum is a sensible way to combine them, and back out again. Every layer
//! boundary of the model uses the same link:
//!
//! - `pre_transform` is applied to the regressors of a layer before solving.
//! - `post_aggregate` is applied to the weighted sum a layer produces.
//! - `target_transform` is applied to the regression target, so that
//!   `post_aggregate` of the fitted sum lands back on target scale.
//!
//! The logarithmic link is exactly self-inverse. The saturating links pair a
//! bounded `tanh`/`arctan` pre-transform with an exponential aggregation, which
//! is only an approximate inverse. That asymmetry is part of the model.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_2_PI;

/// Offset keeping logarithms away from zero for values at the bottom of `[0, 1]`.
pub const DEFAULT_OFFSET: f64 = 1e-10;

/// Strategy injected into the model engine and the predictor.
pub trait AggregationLink: Send + Sync {
    fn pre_transform(&self, x: f64) -> f64;

    fn post_aggregate(&self, sum: f64) -> f64;

    fn target_transform(&self, y: f64) -> f64;

    fn name(&self) -> &'static str;
}

/// `ln(x + 1 + ε)` in, `exp(s) - 1 - ε` out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Logarithmic {
    offset: f64,
}

impl Logarithmic {
    pub fn new(offset: f64) -> Self {
        Self { offset }
    }
}

impl Default for Logarithmic {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSET)
    }
}

impl AggregationLink for Logarithmic {
    fn pre_transform(&self, x: f64) -> f64 {
        (x + 1.0 + self.offset).ln()
    }

    fn post_aggregate(&self, sum: f64) -> f64 {
        sum.exp() - 1.0 - self.offset
    }

    fn target_transform(&self, y: f64) -> f64 {
        (y + 1.0 + self.offset).ln()
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Which bounded function the saturating link squashes regressors with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Saturation {
    #[serde(rename = "tanh")]
    Tanh,
    /// `(2/π)·arctan(x)`, rescaled onto `(-1, 1)`.
    #[serde(rename = "arctan")]
    Arctan,
}

/// Bounded pre-transform with `exp(s) - 1` aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Saturating {
    saturation: Saturation,
    offset: f64,
}

impl Saturating {
    pub fn new(saturation: Saturation, offset: f64) -> Self {
        Self { saturation, offset }
    }

    pub fn tanh() -> Self {
        Self::new(Saturation::Tanh, DEFAULT_OFFSET)
    }

    pub fn arctan() -> Self {
        Self::new(Saturation::Arctan, DEFAULT_OFFSET)
    }
}

impl AggregationLink for Saturating {
    fn pre_transform(&self, x: f64) -> f64 {
        match self.saturation {
            Saturation::Tanh => x.tanh(),
            Saturation::Arctan => FRAC_2_PI * x.atan(),
        }
    }

    fn post_aggregate(&self, sum: f64) -> f64 {
        sum.exp() - 1.0
    }

    // Targets stay on the logarithmic scale so the exponential aggregation can
    // reach them; the offset only guards the logarithm.
    fn target_transform(&self, y: f64) -> f64 {
        (y + 1.0 + self.offset).ln()
    }

    fn name(&self) -> &'static str {
        match self.saturation {
            Saturation::Tanh => "tanh",
            Saturation::Arctan => "arctan",
        }
    }
}

/// Serializable selector for the link strategy of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFunction {
    #[serde(rename = "log")]
    Logarithmic,
    #[serde(rename = "saturating")]
    Saturating(Saturation),
}

impl LinkFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "log" | "logarithmic" => Some(LinkFunction::Logarithmic),
            "tanh" => Some(LinkFunction::Saturating(Saturation::Tanh)),
            "arctan" | "arctg" => Some(LinkFunction::Saturating(Saturation::Arctan)),
            _ => None,
        }
    }

    /// Matches [`AggregationLink::name`] of the strategy this selects.
    pub fn name(self) -> &'static str {
        match self {
            LinkFunction::Logarithmic => "log",
            LinkFunction::Saturating(Saturation::Tanh) => "tanh",
            LinkFunction::Saturating(Saturation::Arctan) => "arctan",
        }
    }

    /// Whether `link` is the strategy this selector names.
    pub fn selects<L: AggregationLink + ?Sized>(self, link: &L) -> bool {
        self.name() == link.name()
    }

    pub fn strategy(self, offset: f64) -> Box<dyn AggregationLink> {
        match self {
            LinkFunction::Logarithmic => Box::new(Logarithmic::new(offset)),
            LinkFunction::Saturating(saturation) => Box::new(Saturating::new(saturation, offset)),
        }
    }
}
