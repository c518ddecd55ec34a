// src/gpu_ids.rs

//! Device-id selection: the literal `all` or a comma-separated id list.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GpuIds {
    #[default]
    All,
    /// Non-empty list of device ordinals, in the order given.
    List(Vec<u32>),
}

impl GpuIds {
    pub fn is_all(&self) -> bool {
        matches!(self, GpuIds::All)
    }

    /// Number of listed ids; `None` for `all`.
    pub fn count(&self) -> Option<usize> {
        match self {
            GpuIds::All => None,
            GpuIds::List(ids) => Some(ids.len()),
        }
    }
}

impl fmt::Display for GpuIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuIds::All => f.write_str("all"),
            GpuIds::List(ids) => {
                let joined = ids
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                f.write_str(&joined)
            }
        }
    }
}

impl FromStr for GpuIds {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(GpuIds::All);
        }
        if trimmed.is_empty() {
            return Err("gpu_ids must be `all` or a comma-separated list of ids (got empty value)".into());
        }

        let ids = trimmed
            .split(',')
            .map(|part| {
                part.trim().parse::<u32>().map_err(|_| {
                    format!("invalid gpu id '{}' in gpu_ids '{trimmed}' (expected a non-negative integer)", part.trim())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(GpuIds::List(ids))
    }
}

impl<'de> Deserialize<'de> for GpuIds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Persisted files store `"0,1"`/`"all"`, a bare integer or a list.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Index(u32),
            List(Vec<u32>),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Index(id) => Ok(GpuIds::List(vec![id])),
            Repr::List(ids) if ids.is_empty() => {
                Err(serde::de::Error::custom("gpu_ids list must not be empty"))
            }
            Repr::List(ids) => Ok(GpuIds::List(ids)),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_and_lists() {
        assert_eq!("all".parse::<GpuIds>().unwrap(), GpuIds::All);
        assert_eq!(" ALL ".parse::<GpuIds>().unwrap(), GpuIds::All);
        assert_eq!("0, 2,3".parse::<GpuIds>().unwrap(), GpuIds::List(vec![0, 2, 3]));
        assert_eq!(GpuIds::List(vec![0, 2, 3]).to_string(), "0,2,3");
    }

    #[test]
    fn rejects_empty_and_non_numeric_ids() {
        assert!("".parse::<GpuIds>().is_err());
        assert!("0,,1".parse::<GpuIds>().is_err());
        let err = "0,gpu1".parse::<GpuIds>().unwrap_err();
        assert!(err.contains("gpu1"));
    }

    #[test]
    fn count_is_none_for_all() {
        assert_eq!(GpuIds::All.count(), None);
        assert_eq!(GpuIds::List(vec![4]).count(), Some(1));
    }

    #[test]
    fn deserializes_bare_integer_as_single_id() {
        let ids: GpuIds = serde_json::from_str("3").unwrap();
        assert_eq!(ids, GpuIds::List(vec![3]));
        let ids: GpuIds = serde_json::from_str("\"all\"").unwrap();
        assert!(ids.is_all());
    }

    #[test]
    fn deserializes_lists() {
        let ids: GpuIds = serde_json::from_str("[0, 1]").unwrap();
        assert_eq!(ids, GpuIds::List(vec![0, 1]));
        assert!(serde_json::from_str::<GpuIds>("[]").is_err());
        assert!(serde_json::from_str::<GpuIds>("[0, -1]").is_err());
    }
}
