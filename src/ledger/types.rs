use serde::{Deserialize, Serialize};

use crate::types::{CustomerId, TreatmentId};

/// Daily capacity for one treatment. Serializes to the reportable form
/// `{max_per_day, remaining_availability, cost_per_contact_pounds, priority}`; the id is the map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(default, skip_serializing)]
    pub treatment_id: TreatmentId,
    pub max_per_day: u32,
    pub remaining_availability: u32,
    #[serde(rename = "cost_per_contact_pounds", default)]
    pub cost_per_contact: f64,
    #[serde(default)]
    pub priority: i32,
}

impl LedgerEntry {
    /// Fresh entry with the full day's quota available.
    pub fn new(treatment_id: impl Into<String>, max_per_day: u32) -> Self {
        Self {
            treatment_id: treatment_id.into(),
            max_per_day,
            remaining_availability: max_per_day,
            cost_per_contact: 0.0,
            priority: 0,
        }
    }

    pub fn with_remaining(mut self, remaining_availability: u32) -> Self {
        self.remaining_availability = remaining_availability;
        self
    }

    pub fn with_cost(mut self, cost_per_contact: f64) -> Self {
        self.cost_per_contact = cost_per_contact;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_available(&self) -> bool {
        self.remaining_availability > 0
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.max_per_day == 0 {
            return 0.0;
        }
        (1.0 - f64::from(self.remaining_availability) / f64::from(self.max_per_day)) * 100.0
    }
}

/// Result of `check_availability`. Capacity fields are `None` for the `ignore` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub treatment_id: TreatmentId,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReceipt {
    pub treatment_id: TreatmentId,
    pub customer_id: CustomerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_day: Option<u32>,
}

impl AllocationReceipt {
    pub fn consumed_capacity(&self) -> bool {
        self.remaining.is_some()
    }
}

/// Audit log line, appended once per committed allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub treatment_id: TreatmentId,
    pub customer_id: CustomerId,
    pub priority: i32,
    pub timestamp: String,
}
