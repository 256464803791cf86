//! Provenance-tagged values produced by the priority resolution chains.

use serde::{Deserialize, Serialize};

/// A resolved figure together with where it came from.
///
/// `Measured` values were read from a time series, a manual override or a
/// stored table. `Estimated` values were derived from rates and constants.
/// `Default` marks the documented fallback when nothing else was available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provenance", content = "value", rename_all = "snake_case")]
pub enum Resolved<T> {
    Measured(T),
    Estimated(T),
    Default(T),
}

impl<T: Copy> Resolved<T> {
    pub fn value(&self) -> T {
        match *self {
            Resolved::Measured(v) | Resolved::Estimated(v) | Resolved::Default(v) => v,
        }
    }
}

impl<T> Resolved<T> {
    pub fn is_default(&self) -> bool {
        matches!(self, Resolved::Default(_))
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, Resolved::Measured(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        match self {
            Resolved::Measured(v) => Resolved::Measured(f(v)),
            Resolved::Estimated(v) => Resolved::Estimated(f(v)),
            Resolved::Default(v) => Resolved::Default(f(v)),
        }
    }

    pub fn provenance(&self) -> &'static str {
        match self {
            Resolved::Measured(_) => "measured",
            Resolved::Estimated(_) => "estimated",
            Resolved::Default(_) => "default",
        }
    }
}

impl Resolved<f64> {
    pub fn zero() -> Self {
        Resolved::Default(0.0)
    }

    /// First present candidate as `Measured`, otherwise `fallback`.
    pub fn measured_or(candidates: &[Option<f64>], fallback: Resolved<f64>) -> Self {
        candidates
            .iter()
            .flatten()
            .next()
            .map(|&v| Resolved::Measured(v))
            .unwrap_or(fallback)
    }
}
