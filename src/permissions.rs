use serde::{Deserialize, Serialize};

use crate::{
    treatments::classification,
    types::{Channel, ConsentFlag, PermissionMatrix, Treatment, TreatmentType},
};

/// Why a treatment was or was not permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionBasis {
    Ignore,
    Unclassified,
    Granted,
    Refused,
    MissingConsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub permitted: bool,
    pub channel: Option<Channel>,
    pub treatment_type: Option<TreatmentType>,
    pub basis: PermissionBasis,
}

/// Checks a treatment against a customer's consent matrix.
///
/// `ignore` is always permitted. A treatment whose channel or type cannot be resolved is allowed.
/// A fully classified treatment needs an explicit `Y` for its channel and type; a missing matrix,
/// channel or flag denies.
pub fn check(treatment: &Treatment, matrix: &PermissionMatrix) -> PermissionCheck {
    if treatment.is_ignore() {
        return PermissionCheck {
            permitted: true,
            channel: None,
            treatment_type: None,
            basis: PermissionBasis::Ignore,
        };
    }

    let (channel, treatment_type) = classification(treatment);
    let (Some(resolved_channel), Some(resolved_type)) = (channel, treatment_type) else {
        return PermissionCheck {
            permitted: true,
            channel,
            treatment_type,
            basis: PermissionBasis::Unclassified,
        };
    };

    let basis = match matrix.consent(resolved_channel, resolved_type) {
        Some(ConsentFlag::Yes) => PermissionBasis::Granted,
        Some(ConsentFlag::No | ConsentFlag::Unrecognized) => PermissionBasis::Refused,
        None => PermissionBasis::MissingConsent,
    };

    PermissionCheck {
        permitted: basis == PermissionBasis::Granted,
        channel,
        treatment_type,
        basis,
    }
}

pub fn is_permitted(treatment: &Treatment, matrix: &PermissionMatrix) -> bool {
    check(treatment, matrix).permitted
}
