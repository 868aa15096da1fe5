//! Session timeout policy models
//!
//! Shared between the policy endpoint and the client-side session manager.
//! The effective inactivity budget is layered: a company-enforced value
//! overrides the user preference, which overrides the system default.

use serde::{Deserialize, Serialize};

/// System-default inactivity timeout, used when no policy layer applies
pub const DEFAULT_TIMEOUT_MINUTES: i64 = 30;

/// Which policy layer produced the effective timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutSource {
    User,
    Company,
    CompanyDefault,
    System,
}

/// Wire shape of `GET /api/v1/auth/session-policy`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPolicy {
    /// The resolved inactivity budget in minutes
    pub timeout_minutes: i64,
    /// True when the company enforces its timeout over user preference
    pub is_company_enforced: bool,
    pub company_timeout: Option<i64>,
    pub user_timeout: Option<i64>,
    pub source: TimeoutSource,
}

impl SessionPolicy {
    /// Resolve the layered timeout values into one effective policy.
    pub fn resolve(
        company_timeout: Option<i64>,
        company_enforced: bool,
        user_timeout: Option<i64>,
    ) -> Self {
        let (timeout_minutes, source) = match (company_timeout, company_enforced, user_timeout) {
            (Some(company), true, _) => (company, TimeoutSource::Company),
            (_, _, Some(user)) => (user, TimeoutSource::User),
            (Some(company), false, None) => (company, TimeoutSource::CompanyDefault),
            (None, _, None) => (DEFAULT_TIMEOUT_MINUTES, TimeoutSource::System),
        };

        Self {
            timeout_minutes,
            is_company_enforced: company_enforced && company_timeout.is_some(),
            company_timeout,
            user_timeout,
            source,
        }
    }

    /// Fallback policy when nothing is known (offline-first client default)
    pub fn system_default() -> Self {
        Self {
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            is_company_enforced: false,
            company_timeout: None,
            user_timeout: None,
            source: TimeoutSource::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_enforced_overrides_user_preference() {
        let policy = SessionPolicy::resolve(Some(15), true, Some(60));
        assert_eq!(policy.timeout_minutes, 15);
        assert_eq!(policy.source, TimeoutSource::Company);
        assert!(policy.is_company_enforced);
    }

    #[test]
    fn test_user_preference_wins_when_not_enforced() {
        let policy = SessionPolicy::resolve(Some(15), false, Some(60));
        assert_eq!(policy.timeout_minutes, 60);
        assert_eq!(policy.source, TimeoutSource::User);
    }

    #[test]
    fn test_company_default_applies_without_user_preference() {
        let policy = SessionPolicy::resolve(Some(45), false, None);
        assert_eq!(policy.timeout_minutes, 45);
        assert_eq!(policy.source, TimeoutSource::CompanyDefault);
    }

    #[test]
    fn test_system_default() {
        let policy = SessionPolicy::resolve(None, false, None);
        assert_eq!(policy.timeout_minutes, DEFAULT_TIMEOUT_MINUTES);
        assert_eq!(policy.source, TimeoutSource::System);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let json = serde_json::to_value(SessionPolicy::resolve(Some(15), true, Some(60))).unwrap();
        assert_eq!(json["timeoutMinutes"], 15);
        assert_eq!(json["isCompanyEnforced"], true);
        assert_eq!(json["companyTimeout"], 15);
        assert_eq!(json["userTimeout"], 60);
        assert_eq!(json["source"], "company");
    }
}
