//! Final-severity decision shared by the rule engine and the advisory-hint
//! integration point.

use crate::types::{BindingStrength, Severity, ValidationClass, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityResolution {
    pub effective: Severity,
    /// Present only when `effective` differs from the configured severity.
    pub downgrade_reason: Option<String>,
}

/// Decides the effective severity of one finding.
///
/// `Contract` and `Structural` findings keep their configured severity.
/// An `Advisory` finding configured as `error` becomes a `warning` when it
/// comes from an advisory source or a heuristic rule.
pub fn resolve(
    configured: Severity,
    class: ValidationClass,
    is_heuristic: bool,
    is_advisory_source: bool,
) -> SeverityResolution {
    let unchanged = SeverityResolution {
        effective: configured,
        downgrade_reason: None,
    };

    match class {
        ValidationClass::Contract | ValidationClass::Structural => unchanged,
        ValidationClass::Advisory if configured != Severity::Error => unchanged,
        ValidationClass::Advisory => {
            let reason = match (is_advisory_source, is_heuristic) {
                (true, true) => {
                    "advisory-class finding from an advisory source based on a heuristic"
                }
                (true, false) => "advisory-class finding from an advisory source",
                (false, true) => "advisory-class finding based on a heuristic",
                (false, false) => return unchanged,
            };
            SeverityResolution {
                effective: Severity::Warning,
                downgrade_reason: Some(format!("downgraded from error: {reason}")),
            }
        }
    }
}

/// Applies [`resolve`] to a finding in place, recording the audit trail when
/// the severity changed.
pub fn apply(error: &mut ValidationError, is_heuristic: bool, is_advisory_source: bool) {
    let resolution = resolve(
        error.severity,
        error.validation_class,
        is_heuristic,
        is_advisory_source,
    );
    if let Some(reason) = resolution.downgrade_reason {
        error.configured_severity = Some(error.severity);
        error.severity = resolution.effective;
        error.downgrade_reason = Some(reason);
    }
}

/// Severity of a closed-enumeration violation, by binding strength.
pub fn severity_for_binding(strength: BindingStrength) -> Severity {
    match strength {
        BindingStrength::Required => Severity::Error,
        BindingStrength::Extensible => Severity::Warning,
        BindingStrength::Preferred | BindingStrength::Example => Severity::Info,
    }
}
