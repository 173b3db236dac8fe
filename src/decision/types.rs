use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    decision::error::{DecisionError, DecisionErrorKind},
    ledger::AllocationReceipt,
    types::{CustomerId, Treatment, TreatmentId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Success,
    Error,
}

/// Recommended decisions carry the chosen id; directed ones embed the full definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectedTreatment {
    Id(TreatmentId),
    Definition(Box<Treatment>),
}

impl SelectedTreatment {
    pub fn id(&self) -> &str {
        match self {
            SelectedTreatment::Id(id) => id,
            SelectedTreatment::Definition(treatment) => &treatment.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub remaining: u32,
    pub max_per_day: u32,
}

impl AllocationSummary {
    pub fn from_receipt(receipt: &AllocationReceipt) -> Option<Self> {
        Some(Self {
            remaining: receipt.remaining?,
            max_per_day: receipt.max_per_day?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub customer_id: CustomerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_treatment: Option<SelectedTreatment>,
    #[serde(default)]
    pub explanation: String,
    pub status: DecisionStatus,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<DecisionErrorKind>,
}

impl DecisionResult {
    pub fn success(
        customer_id: impl Into<String>,
        selected_treatment: SelectedTreatment,
        explanation: impl Into<String>,
        allocation: Option<AllocationSummary>,
        timestamp: String,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            selected_treatment: Some(selected_treatment),
            explanation: explanation.into(),
            status: DecisionStatus::Success,
            timestamp,
            allocation,
            message: None,
            error_kind: None,
        }
    }

    pub fn failure(customer_id: impl Into<String>, error: &DecisionError, timestamp: String) -> Self {
        Self {
            customer_id: customer_id.into(),
            selected_treatment: None,
            explanation: String::new(),
            status: DecisionStatus::Error,
            timestamp,
            allocation: None,
            message: Some(error.message.clone()),
            error_kind: Some(error.kind),
        }
    }

    pub fn with_selected(mut self, selected_treatment: SelectedTreatment) -> Self {
        self.selected_treatment = Some(selected_treatment);
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == DecisionStatus::Success
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_treatment.as_ref().map(SelectedTreatment::id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionMode {
    /// Let the oracle choose, optionally restricted to an allow-list.
    Recommend {
        allowed: Option<BTreeSet<TreatmentId>>,
    },
    /// Apply one named treatment with no fallback.
    Directed { treatment_id: TreatmentId },
}

impl Default for DecisionMode {
    fn default() -> Self {
        DecisionMode::Recommend { allowed: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_alternative_searches: u32,
    pub oracle_timeout: Duration,
    pub provider_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_alternative_searches: 1,
            oracle_timeout: Duration::from_secs(30),
            provider_timeout: Duration::from_secs(10),
        }
    }
}
