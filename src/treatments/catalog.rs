use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    clock::{Clock, SystemClock, rfc3339},
    ledger::AllocationLedger,
    treatments::{
        classify::classify_in_place,
        error::{CatalogError, duplicate, invalid_input, not_custom, not_found},
        parser::{ParsedTreatment, parse_treatment_text},
    },
    types::{Treatment, TreatmentId, display_name_from_id, is_ignore},
};

/// Every known treatment, configured and custom, keyed by id.
///
/// Channel and type are classified once on insertion. Custom treatments live only in memory and
/// are the only ones that can be updated or removed; their capacity is kept in step with the
/// ledger passed to each mutation.
#[derive(Debug)]
pub struct TreatmentCatalog {
    treatments: RwLock<BTreeMap<TreatmentId, Treatment>>,
    clock: Arc<dyn Clock>,
}

impl TreatmentCatalog {
    pub fn new(
        treatments: impl IntoIterator<Item = Treatment>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CatalogError> {
        let mut by_id = BTreeMap::new();
        for mut treatment in treatments {
            if treatment.id.trim().is_empty() {
                return Err(invalid_input("treatment id cannot be empty"));
            }
            if by_id.contains_key(&treatment.id) {
                return Err(duplicate(format!(
                    "treatment '{}' is defined more than once",
                    treatment.id
                )));
            }
            if treatment.display_name.is_empty() {
                treatment.display_name = display_name_from_id(&treatment.id);
            }
            classify_in_place(&mut treatment);
            by_id.insert(treatment.id.clone(), treatment);
        }

        Ok(Self {
            treatments: RwLock::new(by_id),
            clock,
        })
    }

    pub fn with_system_clock(
        treatments: impl IntoIterator<Item = Treatment>,
    ) -> Result<Self, CatalogError> {
        Self::new(treatments, Arc::new(SystemClock::default()))
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<TreatmentId, Treatment>> {
        self.treatments.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<TreatmentId, Treatment>> {
        self.treatments.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, treatment_id: &str) -> Option<Treatment> {
        self.read().get(treatment_id).cloned()
    }

    pub fn contains(&self, treatment_id: &str) -> bool {
        self.read().contains_key(treatment_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn all(&self) -> Vec<Treatment> {
        self.read().values().cloned().collect()
    }

    pub fn enabled(&self) -> Vec<Treatment> {
        self.read()
            .values()
            .filter(|treatment| treatment.enabled)
            .cloned()
            .collect()
    }

    pub fn is_enabled(&self, treatment_id: &str) -> bool {
        self.read()
            .get(treatment_id)
            .is_some_and(|treatment| treatment.enabled)
    }

    pub fn custom(&self) -> Vec<Treatment> {
        self.read()
            .values()
            .filter(|treatment| treatment.is_custom)
            .cloned()
            .collect()
    }

    /// Parses `text` into a new custom treatment and registers its capacity on `ledger`.
    pub fn add_custom(
        &self,
        ledger: &AllocationLedger,
        text: &str,
        treatment_id: Option<&str>,
    ) -> Result<ParsedTreatment, CatalogError> {
        if text.trim().is_empty() {
            return Err(invalid_input("custom treatment description cannot be empty"));
        }
        let mut parsed = parse_treatment_text(text, treatment_id);
        if is_ignore(&parsed.treatment.id) {
            return Err(invalid_input("'ignore' is reserved and cannot be a custom treatment"));
        }

        let mut treatments = self.write();
        if treatments.contains_key(&parsed.treatment.id) {
            return Err(duplicate(format!(
                "treatment '{}' already exists",
                parsed.treatment.id
            )));
        }

        classify_in_place(&mut parsed.treatment);
        parsed.treatment.created_at = Some(rfc3339(self.clock.now()));
        ledger
            .register(parsed.constraint.clone())
            .map_err(|err| invalid_input(err.message))?;
        treatments.insert(parsed.treatment.id.clone(), parsed.treatment.clone());

        tracing::info!(
            target: "treatments",
            treatment_id = %parsed.treatment.id,
            max_per_day = parsed.constraint.max_per_day,
            priority = parsed.constraint.priority,
            "custom_treatment_added"
        );
        Ok(parsed)
    }

    /// Re-parses a custom treatment from new text. `created_at` survives; capacity is replaced.
    pub fn update_custom(
        &self,
        ledger: &AllocationLedger,
        treatment_id: &str,
        text: &str,
    ) -> Result<ParsedTreatment, CatalogError> {
        let mut treatments = self.write();
        let existing = treatments
            .get(treatment_id)
            .ok_or_else(|| not_found(format!("treatment '{}' not found", treatment_id)))?;
        if !existing.is_custom {
            return Err(not_custom(format!(
                "treatment '{}' is configured and cannot be updated",
                treatment_id
            )));
        }

        let mut parsed = parse_treatment_text(text, Some(treatment_id));
        classify_in_place(&mut parsed.treatment);
        parsed.treatment.created_at = existing.created_at.clone();
        parsed.treatment.updated_at = Some(rfc3339(self.clock.now()));
        ledger
            .register(parsed.constraint.clone())
            .map_err(|err| invalid_input(err.message))?;
        treatments.insert(treatment_id.to_string(), parsed.treatment.clone());

        tracing::info!(
            target: "treatments",
            treatment_id = %treatment_id,
            max_per_day = parsed.constraint.max_per_day,
            "custom_treatment_updated"
        );
        Ok(parsed)
    }

    pub fn remove_custom(
        &self,
        ledger: &AllocationLedger,
        treatment_id: &str,
    ) -> Result<Treatment, CatalogError> {
        let mut treatments = self.write();
        let treatment = treatments
            .get(treatment_id)
            .ok_or_else(|| not_found(format!("treatment '{}' not found", treatment_id)))?;
        if !treatment.is_custom {
            return Err(not_custom(format!(
                "treatment '{}' is configured and cannot be removed",
                treatment_id
            )));
        }

        let removed = treatments
            .remove(treatment_id)
            .ok_or_else(|| not_found(format!("treatment '{}' not found", treatment_id)))?;
        ledger.remove(treatment_id);
        tracing::info!(target: "treatments", treatment_id = %treatment_id, "custom_treatment_removed");
        Ok(removed)
    }
}
