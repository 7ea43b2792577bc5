//! Server version tags
//!
//! A tag is `MAJOR.MINOR` or `MAJOR.MINOR.PATCH`, each component a
//! non-negative integer. The panel receives the tag verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reasons a version tag is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionTagError {
    #[error("version tag is empty")]
    Empty,

    #[error("version tag '{0}' must have two or three components")]
    ComponentCount(String),

    #[error("version tag '{tag}' has non-numeric component '{component}'")]
    NotNumeric { tag: String, component: String },
}

/// Validated `MAJOR.MINOR[.PATCH]` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionTag {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl VersionTag {
    pub fn parse(s: &str) -> Result<Self, VersionTagError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionTagError::Empty);
        }

        let parts: Vec<&str> = s.split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(VersionTagError::ComponentCount(s.to_string()));
        }

        let mut nums = Vec::with_capacity(parts.len());
        for part in &parts {
            // u32::from_str accepts a leading '+', which is not a valid tag
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionTagError::NotNumeric {
                    tag: s.to_string(),
                    component: part.to_string(),
                });
            }
            let n = part.parse::<u32>().map_err(|_| VersionTagError::NotNumeric {
                tag: s.to_string(),
                component: part.to_string(),
            })?;
            nums.push(n);
        }

        Ok(Self {
            major: nums[0],
            minor: nums[1],
            patch: nums.get(2).copied(),
        })
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for VersionTag {
    type Err = VersionTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionTag {
    type Error = VersionTagError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VersionTag> for String {
    fn from(tag: VersionTag) -> Self {
        tag.to_string()
    }
}
