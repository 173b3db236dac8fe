use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    decision::error::DecisionError,
    ledger::LedgerEntry,
    types::{CustomerId, CustomerProfile, EventRecord, PermissionMatrix, Treatment, TreatmentId},
};

/// Everything the oracle may base a choice on. `treatments` holds the candidates it may pick;
/// `constraints` is the ledger snapshot restricted to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub customer_id: CustomerId,
    pub journey: Vec<EventRecord>,
    pub treatments: BTreeMap<TreatmentId, Treatment>,
    pub constraints: BTreeMap<TreatmentId, LedgerEntry>,
    pub permissions: PermissionMatrix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeRequest {
    #[serde(flatten)]
    pub context: RecommendationRequest,
    pub excluded_treatment: TreatmentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub selected_treatment: TreatmentId,
    #[serde(default)]
    pub explanation: String,
}

impl Recommendation {
    pub fn new(selected_treatment: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            selected_treatment: selected_treatment.into(),
            explanation: explanation.into(),
        }
    }
}

#[async_trait]
pub trait ProfilePort: Send + Sync {
    async fn fetch_profile(&self, customer_id: &str) -> Result<CustomerProfile, DecisionError>;
}

/// `Ok(None)` means the customer has no recorded consent.
#[async_trait]
pub trait PermissionPort: Send + Sync {
    async fn fetch_permissions(
        &self,
        customer_id: &str,
    ) -> Result<Option<PermissionMatrix>, DecisionError>;
}

#[async_trait]
pub trait OraclePort: Send + Sync {
    async fn recommend(&self, req: RecommendationRequest)
    -> Result<Recommendation, DecisionError>;

    /// Must not return `req.excluded_treatment`.
    async fn find_alternative(
        &self,
        req: AlternativeRequest,
    ) -> Result<Recommendation, DecisionError>;
}
