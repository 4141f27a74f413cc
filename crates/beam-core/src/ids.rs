use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Candidate identifier of the form `i<iteration>c<ordinal>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CandidateId {
    /// Iteration this candidate belongs to.
    pub iteration: u32,
    /// Ordinal within that iteration.
    pub ordinal: u32,
}

impl CandidateId {
    /// Construct a candidate id for the given iteration and ordinal.
    pub fn new(iteration: u32, ordinal: u32) -> Self {
        Self { iteration, ordinal }
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}c{}", self.iteration, self.ordinal)
    }
}

/// Error returned when a candidate id string does not match `i<n>c<n>`.
#[derive(Debug, thiserror::Error)]
#[error("invalid candidate id: `{0}`")]
pub struct ParseCandidateIdError(String);

impl FromStr for CandidateId {
    type Err = ParseCandidateIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('i')
            .ok_or_else(|| ParseCandidateIdError(s.to_string()))?;
        let (iter_str, ord_str) = rest
            .split_once('c')
            .ok_or_else(|| ParseCandidateIdError(s.to_string()))?;
        let iteration: u32 = iter_str
            .parse()
            .map_err(|_| ParseCandidateIdError(s.to_string()))?;
        let ordinal: u32 = ord_str
            .parse()
            .map_err(|_| ParseCandidateIdError(s.to_string()))?;
        Ok(CandidateId { iteration, ordinal })
    }
}

impl From<CandidateId> for String {
    fn from(id: CandidateId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for CandidateId {
    type Error = ParseCandidateIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_candidate_ids() {
        let id = CandidateId::new(3, 12);
        assert_eq!(id.to_string(), "i3c12");
        assert_eq!("i3c12".parse::<CandidateId>().unwrap(), id);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("c1i2".parse::<CandidateId>().is_err());
        assert!("i1".parse::<CandidateId>().is_err());
        assert!("".parse::<CandidateId>().is_err());
    }

    #[test]
    fn job_id_round_trips_through_display_and_parse() {
        let id = JobId::new();
        let printed = id.to_string();
        let parsed: JobId = printed.parse().unwrap();
        assert_eq!(id, parsed);
    }
}
