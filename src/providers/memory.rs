use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;

use crate::{
    decision::{
        error::{DecisionError, data_unavailable},
        ports::{PermissionPort, ProfilePort},
    },
    types::{CustomerId, CustomerProfile, PermissionMatrix},
};

/// Profiles held in memory. Unknown customers get an empty profile unless marked unavailable.
#[derive(Debug, Default)]
pub struct InMemoryProfileProvider {
    profiles: RwLock<BTreeMap<CustomerId, CustomerProfile>>,
    unavailable: RwLock<BTreeMap<CustomerId, String>>,
}

impl InMemoryProfileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: CustomerProfile) {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile.customer_id.clone(), profile);
    }

    pub fn with_profile(self, profile: CustomerProfile) -> Self {
        self.insert(profile);
        self
    }

    /// Makes every fetch for `customer_id` fail with `reason`.
    pub fn with_unavailable(self, customer_id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.unavailable
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(customer_id.into(), reason.into());
        self
    }
}

#[async_trait]
impl ProfilePort for InMemoryProfileProvider {
    async fn fetch_profile(&self, customer_id: &str) -> Result<CustomerProfile, DecisionError> {
        if let Some(reason) = self
            .unavailable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(customer_id)
        {
            return Err(data_unavailable(reason.clone()));
        }
        Ok(self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(customer_id)
            .cloned()
            .unwrap_or_else(|| CustomerProfile::new(customer_id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPermissionProvider {
    matrices: RwLock<BTreeMap<CustomerId, PermissionMatrix>>,
}

impl InMemoryPermissionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, matrix: PermissionMatrix) {
        self.matrices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(matrix.customer_id.clone(), matrix);
    }

    pub fn with_matrix(self, matrix: PermissionMatrix) -> Self {
        self.insert(matrix);
        self
    }
}

#[async_trait]
impl PermissionPort for InMemoryPermissionProvider {
    async fn fetch_permissions(
        &self,
        customer_id: &str,
    ) -> Result<Option<PermissionMatrix>, DecisionError> {
        Ok(self
            .matrices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(customer_id)
            .cloned())
    }
}
