//! Lease request validation
//!
//! Inbound adapters build a [`LeaseRequest`] from whatever they parsed;
//! the service only ever persists a validated [`LeaseAttrs`].

use crate::error::ValidationError;
use crate::state::PrincipalId;
use chrono::NaiveDate;
use leasehold_common::VersionTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unvalidated lease request as received from a user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub name: String,
    pub duration_days: i64,
    pub event_date: NaiveDate,
    #[serde(default)]
    pub version_tag: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub collaborators: Vec<String>,
}

/// Validated lease attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseAttrs {
    pub name: String,
    pub desired_duration_days: i64,
    pub event_date: NaiveDate,
    pub version_tag: Option<VersionTag>,
    pub description: String,
    /// Distinct, sorted
    pub collaborators: Vec<PrincipalId>,
}

/// Check a duration against `1..=max_days`
pub fn validate_duration(days: i64, max_days: i64) -> Result<i64, ValidationError> {
    if (1..=max_days).contains(&days) {
        Ok(days)
    } else {
        Err(ValidationError::InvalidDuration {
            got: days,
            max: max_days,
        })
    }
}

impl LeaseRequest {
    pub fn validate(&self, max_days: i64) -> Result<LeaseAttrs, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let desired_duration_days = validate_duration(self.duration_days, max_days)?;

        if self.collaborators.is_empty() {
            return Err(ValidationError::NoCollaborators);
        }
        let mut collaborators = BTreeSet::new();
        for id in &self.collaborators {
            let id = id.trim();
            if id.is_empty() {
                return Err(ValidationError::EmptyCollaboratorId);
            }
            collaborators.insert(PrincipalId::new(id));
        }

        // Blank means "no preference"
        let version_tag = match self.version_tag.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(tag) => Some(VersionTag::parse(tag)?),
        };

        Ok(LeaseAttrs {
            name: name.to_string(),
            desired_duration_days,
            event_date: self.event_date,
            version_tag,
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            collaborators: collaborators.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LeaseRequest {
        LeaseRequest {
            name: "  Spring Build  ".to_string(),
            duration_days: 14,
            event_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            version_tag: Some("1.20.4".to_string()),
            description: None,
            collaborators: vec!["u-2".to_string(), "u-1".to_string(), "u-2".to_string()],
        }
    }

    #[test]
    fn test_valid_request() {
        let attrs = request().validate(365).unwrap();
        assert_eq!(attrs.name, "Spring Build");
        assert_eq!(attrs.desired_duration_days, 14);
        assert_eq!(attrs.version_tag.unwrap().to_string(), "1.20.4");
        assert_eq!(
            attrs.collaborators,
            vec![PrincipalId::new("u-1"), PrincipalId::new("u-2")]
        );
        assert_eq!(attrs.description, "");
    }

    #[test]
    fn test_rejects_empty_name() {
        let mut req = request();
        req.name = "   ".to_string();
        assert_eq!(req.validate(365), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_rejects_bad_duration() {
        for days in [0, -3, 366] {
            let mut req = request();
            req.duration_days = days;
            assert!(matches!(
                req.validate(365),
                Err(ValidationError::InvalidDuration { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_missing_collaborators() {
        let mut req = request();
        req.collaborators.clear();
        assert_eq!(req.validate(365), Err(ValidationError::NoCollaborators));

        req.collaborators = vec![" ".to_string()];
        assert_eq!(req.validate(365), Err(ValidationError::EmptyCollaboratorId));
    }

    #[test]
    fn test_version_tag_rules() {
        let mut req = request();
        req.version_tag = Some("latest".to_string());
        assert!(matches!(
            req.validate(365),
            Err(ValidationError::InvalidVersionTag(_))
        ));

        req.version_tag = Some(" ".to_string());
        assert_eq!(req.validate(365).unwrap().version_tag, None);
    }
}
