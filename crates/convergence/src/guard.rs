//! Immutability checks for keys that already exist
//!
//! Once a key is created, its recorded fields can only be restated, never
//! changed. Empty definition fields mean "no opinion"; region is compared
//! unconditionally.

use crate::types::{ResourceDefinition, ResourceState};
use kmskit::{Error, Result};

/// A guarded field whose declared value differs from the recorded one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field name as written in definitions
    pub field: &'static str,
    /// Explanation shown to the user
    pub message: String,
}

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        Error::Drift {
            field: v.field.to_string(),
            message: v.message,
        }
    }
}

fn keep_blank(what: &str) -> String {
    format!("the {what} of an existing key cannot be changed, leave it blank to keep the current value")
}

/// Every illegal change in `definition`, in field order.
///
/// Returns nothing for a state that has no key yet.
pub fn drift_report(definition: &ResourceDefinition, state: &ResourceState) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !state.exists() {
        return violations;
    }

    if definition.region != state.region {
        violations.push(Violation {
            field: "region",
            message: format!(
                "changing the region of a key is not supported ('{}' -> '{}')",
                state.region, definition.region
            ),
        });
    }

    if !definition.policy.is_empty() && definition.policy != state.policy {
        violations.push(Violation {
            field: "policy",
            message: keep_blank("policy"),
        });
    }

    if !definition.alias.is_empty() && definition.alias != state.alias {
        violations.push(Violation {
            field: "alias",
            message: keep_blank("alias"),
        });
    }

    if !definition.grants.is_empty() && definition.grants != state.grants {
        violations.push(Violation {
            field: "grants",
            message: keep_blank("grants"),
        });
    }

    if !definition.description.is_empty() && definition.description != state.description {
        violations.push(Violation {
            field: "description",
            message: keep_blank("description"),
        });
    }

    if !definition.key_usage.is_empty() && definition.key_usage != state.key_usage {
        violations.push(Violation {
            field: "key_usage",
            message: keep_blank("usage"),
        });
    }

    if let Some(enabled) = definition.enabled
        && enabled != state.enabled
    {
        let message = if state.enabled {
            "cannot disable an existing enabled key, leave 'enabled' blank to keep it enabled"
        } else {
            "cannot enable an existing disabled key, leave 'enabled' blank to keep it disabled"
        };
        violations.push(Violation {
            field: "enabled",
            message: message.to_string(),
        });
    }

    violations
}

/// Fail on the first illegal change in `definition`.
pub fn check_no_illegal_drift(definition: &ResourceDefinition, state: &ResourceState) -> Result<()> {
    match drift_report(definition, state).into_iter().next() {
        Some(violation) => Err(violation.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;
    use kmskit::GrantSpec;

    fn recorded() -> ResourceState {
        ResourceState {
            phase: Phase::Up,
            key_id: Some("k-1".to_string()),
            region: "us-east-1".to_string(),
            access_key_id: "AKIA".to_string(),
            policy: "DEFAULT".to_string(),
            alias: "alias/app".to_string(),
            key_usage: "ENCRYPT/DECRYPT".to_string(),
            enabled: true,
            description: "app data".to_string(),
            grants: vec![GrantSpec::new("role/app").with_operation("Decrypt")],
            ..ResourceState::missing("app")
        }
    }

    fn blank() -> ResourceDefinition {
        ResourceDefinition::new("app", "us-east-1")
    }

    fn field_of(defn: &ResourceDefinition) -> String {
        match check_no_illegal_drift(defn, &recorded()) {
            Err(Error::Drift { field, .. }) => field,
            other => panic!("expected drift, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_fields_are_no_opinion() {
        assert!(check_no_illegal_drift(&blank(), &recorded()).is_ok());
    }

    #[test]
    fn test_restating_recorded_values_is_fine() {
        let state = recorded();
        let defn = ResourceDefinition {
            policy: state.policy.clone(),
            alias: state.alias.clone(),
            key_usage: state.key_usage.clone(),
            description: state.description.clone(),
            grants: state.grants.clone(),
            enabled: Some(true),
            ..blank()
        };
        assert!(check_no_illegal_drift(&defn, &state).is_ok());
    }

    #[test]
    fn test_each_guarded_field_is_named() {
        let cases = [
            (ResourceDefinition { region: "us-west-2".into(), ..blank() }, "region"),
            (ResourceDefinition { policy: "{}".into(), ..blank() }, "policy"),
            (ResourceDefinition { alias: "alias/other".into(), ..blank() }, "alias"),
            (
                ResourceDefinition {
                    grants: vec![GrantSpec::new("role/other").with_operation("Encrypt")],
                    ..blank()
                },
                "grants",
            ),
            (ResourceDefinition { description: "other".into(), ..blank() }, "description"),
            (ResourceDefinition { key_usage: "SIGN/VERIFY".into(), ..blank() }, "key_usage"),
            (ResourceDefinition { enabled: Some(false), ..blank() }, "enabled"),
        ];

        for (defn, field) in cases {
            assert_eq!(field_of(&defn), field);
        }
    }

    #[test]
    fn test_empty_region_is_still_drift() {
        let defn = ResourceDefinition { region: String::new(), ..blank() };
        assert_eq!(field_of(&defn), "region");
    }

    #[test]
    fn test_enabled_rejected_both_ways() {
        let disable = ResourceDefinition { enabled: Some(false), ..blank() };
        let report = drift_report(&disable, &recorded());
        assert!(report[0].message.contains("disable"));

        let mut disabled = recorded();
        disabled.enabled = false;
        let enable = ResourceDefinition { enabled: Some(true), ..blank() };
        let report = drift_report(&enable, &disabled);
        assert!(report[0].message.contains("enable an existing disabled"));
    }

    #[test]
    fn test_first_violation_follows_field_order() {
        let defn = ResourceDefinition {
            region: "eu-west-1".into(),
            description: "other".into(),
            ..blank()
        };

        assert_eq!(field_of(&defn), "region");
        let report = drift_report(&defn, &recorded());
        let fields: Vec<_> = report.iter().map(|v| v.field).collect();
        assert_eq!(fields, vec!["region", "description"]);
    }

    #[test]
    fn test_missing_state_has_no_drift() {
        let defn = ResourceDefinition { region: "eu-west-1".into(), ..blank() };
        assert!(drift_report(&defn, &ResourceState::missing("app")).is_empty());
    }

    #[test]
    fn test_drift_is_a_user_error() {
        let defn = ResourceDefinition { policy: "{}".into(), ..blank() };
        let err = check_no_illegal_drift(&defn, &recorded()).unwrap_err();
        assert!(err.is_user_error());
    }
}
