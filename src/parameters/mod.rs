use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Which spectral backend realizes the polynomial multiplications.
///
/// Both backends compute the same transform; they only differ in cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Planned mixed-radix FFT from `rustfft`, O(len log len) per lane.
    #[default]
    RustFft,
    /// Direct summation, O(len²) per lane. Reference only.
    Naive,
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RustFft => "RustFft",
            Self::Naive => "Naive",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RustFft" => Ok(Self::RustFft),
            "Naive" => Ok(Self::Naive),
            _ => Err(format!("Invalid spectral backend: {s}")),
        }
    }
}

/// Runtime configuration of a [`KrylovEngine`](crate::krylov::KrylovEngine).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KrylovConfig {
    /// Spectral backend used for every level of the recursion.
    pub backend: BackendKind,
    /// Scan all numeric inputs for NaN/infinity before running.
    ///
    /// Off by default: the scan is a full extra pass over the inputs.
    pub check_finite: bool,
}

impl KrylovConfig {
    #[must_use]
    pub const fn new(backend: BackendKind, check_finite: bool) -> Self {
        Self {
            backend,
            check_finite,
        }
    }

    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.check_finite = true;
        self
    }
}

impl Display for KrylovConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Spectral backend: {}", self.backend)?;
        write!(f, "Finite check: {}", self.check_finite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::RustFft.to_string(), "RustFft");
        assert_eq!(BackendKind::Naive.to_string(), "Naive");
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("RustFft".parse::<BackendKind>(), Ok(BackendKind::RustFft));
        assert_eq!("Naive".parse::<BackendKind>(), Ok(BackendKind::Naive));
        assert_eq!(
            "cuFFT".parse::<BackendKind>(),
            Err("Invalid spectral backend: cuFFT".to_string())
        );
    }

    #[test]
    fn test_backend_kind_display_roundtrip() {
        for kind in [BackendKind::RustFft, BackendKind::Naive] {
            assert_eq!(kind.to_string().parse::<BackendKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_default_config() {
        let config = KrylovConfig::default();
        assert_eq!(config.backend, BackendKind::RustFft);
        assert!(!config.check_finite);
        assert!(config.strict().check_finite);
    }

    #[test]
    fn test_config_display() {
        let config = KrylovConfig::new(BackendKind::Naive, true);
        assert_eq!(
            config.to_string(),
            "Spectral backend: Naive\nFinite check: true"
        );
    }
}
