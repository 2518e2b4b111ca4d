// ABOUTME: Defines the Epoch logical timestamp plus the range and destroy-target shapes built on it.
// ABOUTME: Also parses the "B-E" text form used by clients to express an inclusive epoch range.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A logical timestamp identifying a point-in-time view of a container.
/// Epochs are totally ordered and opaque beyond that ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl From<u64> for Epoch {
    fn from(value: u64) -> Self {
        Epoch(value)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors produced while building or parsing a destroy target.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("exactly one of an epoch or an epoch range must be given, got both")]
    Both,

    #[error("exactly one of an epoch or an epoch range must be given, got neither")]
    Neither,

    #[error("invalid epoch range {0:?}: expected <begin>-<end>")]
    Malformed(String),

    #[error("epoch range is missing its {0} bound")]
    MissingBound(&'static str),
}

/// An inclusive interval of epochs `[lo, hi]`. Endpoints do not have to be held epochs.
/// No ordering check happens here; `lo > hi` is rejected by the registry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRange {
    pub lo: Epoch,
    pub hi: Epoch,
}

impl EpochRange {
    pub fn new(lo: Epoch, hi: Epoch) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, epoch: Epoch) -> bool {
        self.lo <= epoch && epoch <= self.hi
    }
}

impl fmt::Display for EpochRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

impl FromStr for EpochRange {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TargetError::Malformed(s.to_string());
        let (lo, hi) = s.trim().split_once('-').ok_or_else(malformed)?;
        let lo = lo.trim().parse::<u64>().map_err(|_| malformed())?;
        let hi = hi.trim().parse::<u64>().map_err(|_| malformed())?;
        Ok(EpochRange::new(Epoch(lo), Epoch(hi)))
    }
}

/// What a destroy call removes: one held epoch, or every held epoch inside a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DestroyTarget {
    Epoch { epoch: Epoch },
    Range { lo: Epoch, hi: Epoch },
}

impl DestroyTarget {
    /// Build a target from the two optional client inputs. Exactly one must be present.
    pub fn from_parts(
        epoch: Option<Epoch>,
        range: Option<EpochRange>,
    ) -> Result<Self, TargetError> {
        match (epoch, range) {
            (Some(epoch), None) => Ok(DestroyTarget::Epoch { epoch }),
            (None, Some(r)) => Ok(DestroyTarget::Range { lo: r.lo, hi: r.hi }),
            (Some(_), Some(_)) => Err(TargetError::Both),
            (None, None) => Err(TargetError::Neither),
        }
    }
}
