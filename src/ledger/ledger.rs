use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use time::Date;

use crate::{
    clock::{Clock, SystemClock, rfc3339},
    ledger::{
        error::{LedgerError, exhausted, invalid_input, not_found},
        types::{AllocationReceipt, AllocationRecord, Availability, LedgerEntry},
    },
    types::{TreatmentId, is_ignore},
};

#[derive(Debug)]
struct LedgerState {
    entries: BTreeMap<TreatmentId, LedgerEntry>,
    history: Vec<AllocationRecord>,
    last_reset: Date,
}

impl LedgerState {
    fn restore_quotas(&mut self) {
        for entry in self.entries.values_mut() {
            entry.remaining_availability = entry.max_per_day;
        }
    }

    fn roll_over(&mut self, today: Date) -> bool {
        if today <= self.last_reset {
            return false;
        }
        let previous = self.last_reset;
        self.restore_quotas();
        self.last_reset = today;
        tracing::info!(
            target: "ledger",
            previous_reset = %previous,
            today = %today,
            entries = self.entries.len(),
            "daily_quota_reset"
        );
        true
    }
}

/// Per-treatment daily quotas shared by every concurrent decision.
///
/// All state sits behind one mutex. Each public operation takes the lock once, applies the lazy
/// day rollover, and finishes its read or check-then-decrement before releasing it, so no caller
/// can observe a half-applied allocation.
#[derive(Debug)]
pub struct AllocationLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
}

impl AllocationLedger {
    pub fn new(
        entries: impl IntoIterator<Item = LedgerEntry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let mut by_id = BTreeMap::new();
        for entry in entries {
            validate_entry(&entry)?;
            if by_id.contains_key(&entry.treatment_id) {
                return Err(invalid_input(format!(
                    "duplicate ledger entry for treatment '{}'",
                    entry.treatment_id
                )));
            }
            by_id.insert(entry.treatment_id.clone(), entry);
        }

        let last_reset = clock.today();
        Ok(Self {
            state: Mutex::new(LedgerState {
                entries: by_id,
                history: Vec::new(),
                last_reset,
            }),
            clock,
        })
    }

    pub fn with_system_clock(
        entries: impl IntoIterator<Item = LedgerEntry>,
    ) -> Result<Self, LedgerError> {
        Self::new(entries, Arc::new(SystemClock::default()))
    }

    // Poisoning only means another thread panicked while holding the guard; every mutation
    // below completes in a single statement, so the state is still consistent.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_current(&self) -> MutexGuard<'_, LedgerState> {
        let mut state = self.lock();
        state.roll_over(self.clock.today());
        state
    }

    pub fn check_availability(&self, treatment_id: &str) -> Result<Availability, LedgerError> {
        if is_ignore(treatment_id) {
            return Ok(Availability {
                treatment_id: treatment_id.to_string(),
                available: true,
                remaining: None,
                max_per_day: None,
                usage_percentage: None,
            });
        }

        let state = self.lock_current();
        let entry = state.entries.get(treatment_id).ok_or_else(|| {
            not_found(format!(
                "treatment '{}' has no ledger entry",
                treatment_id
            ))
        })?;

        Ok(Availability {
            treatment_id: treatment_id.to_string(),
            available: entry.is_available(),
            remaining: Some(entry.remaining_availability),
            max_per_day: Some(entry.max_per_day),
            usage_percentage: Some(entry.usage_percentage()),
        })
    }

    pub fn allocate(
        &self,
        treatment_id: &str,
        customer_id: &str,
        priority: i32,
    ) -> Result<AllocationReceipt, LedgerError> {
        if customer_id.trim().is_empty() {
            return Err(invalid_input("customer_id cannot be empty"));
        }
        if is_ignore(treatment_id) {
            return Ok(AllocationReceipt {
                treatment_id: treatment_id.to_string(),
                customer_id: customer_id.to_string(),
                remaining: None,
                max_per_day: None,
            });
        }

        let timestamp = rfc3339(self.clock.now());
        let mut state = self.lock_current();
        let entry = state.entries.get_mut(treatment_id).ok_or_else(|| {
            not_found(format!(
                "treatment '{}' has no ledger entry",
                treatment_id
            ))
        })?;

        let Some(remaining) = entry.remaining_availability.checked_sub(1) else {
            tracing::warn!(
                target: "ledger",
                treatment_id = %treatment_id,
                customer_id = %customer_id,
                max_per_day = entry.max_per_day,
                "allocation_exhausted"
            );
            return Err(exhausted(format!(
                "no availability left for '{}' today",
                treatment_id
            )));
        };
        entry.remaining_availability = remaining;
        let max_per_day = entry.max_per_day;

        state.history.push(AllocationRecord {
            treatment_id: treatment_id.to_string(),
            customer_id: customer_id.to_string(),
            priority,
            timestamp,
        });

        tracing::info!(
            target: "ledger",
            treatment_id = %treatment_id,
            customer_id = %customer_id,
            remaining = remaining,
            max_per_day = max_per_day,
            "allocation_committed"
        );

        Ok(AllocationReceipt {
            treatment_id: treatment_id.to_string(),
            customer_id: customer_id.to_string(),
            remaining: Some(remaining),
            max_per_day: Some(max_per_day),
        })
    }

    /// Restores every quota to `max_per_day`. Idempotent.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.restore_quotas();
        state.last_reset = state.last_reset.max(self.clock.today());
        tracing::info!(target: "ledger", entries = state.entries.len(), "quotas_reset");
    }

    pub fn snapshot(&self) -> BTreeMap<TreatmentId, LedgerEntry> {
        self.lock_current().entries.clone()
    }

    pub fn entry(&self, treatment_id: &str) -> Option<LedgerEntry> {
        self.lock_current().entries.get(treatment_id).cloned()
    }

    pub fn contains(&self, treatment_id: &str) -> bool {
        self.lock().entries.contains_key(treatment_id)
    }

    pub fn history(&self) -> Vec<AllocationRecord> {
        self.lock().history.clone()
    }

    pub fn last_reset(&self) -> Date {
        self.lock().last_reset
    }

    /// Inserts or replaces an entry, returning the one it replaced.
    pub fn register(&self, entry: LedgerEntry) -> Result<Option<LedgerEntry>, LedgerError> {
        validate_entry(&entry)?;
        let mut state = self.lock_current();
        tracing::info!(
            target: "ledger",
            treatment_id = %entry.treatment_id,
            max_per_day = entry.max_per_day,
            remaining = entry.remaining_availability,
            "entry_registered"
        );
        Ok(state.entries.insert(entry.treatment_id.clone(), entry))
    }

    pub fn remove(&self, treatment_id: &str) -> Option<LedgerEntry> {
        let removed = self.lock().entries.remove(treatment_id);
        if removed.is_some() {
            tracing::info!(target: "ledger", treatment_id = %treatment_id, "entry_removed");
        }
        removed
    }

    /// Checks `remaining_availability <= max_per_day` for every entry.
    pub fn verify_invariants(&self) -> Result<(), LedgerError> {
        let state = self.lock();
        for entry in state.entries.values() {
            if entry.remaining_availability > entry.max_per_day {
                return Err(invalid_input(format!(
                    "treatment '{}' has remaining {} above max_per_day {}",
                    entry.treatment_id, entry.remaining_availability, entry.max_per_day
                )));
            }
        }
        Ok(())
    }
}

fn validate_entry(entry: &LedgerEntry) -> Result<(), LedgerError> {
    if entry.treatment_id.trim().is_empty() {
        return Err(invalid_input("ledger entry treatment_id cannot be empty"));
    }
    if is_ignore(&entry.treatment_id) {
        return Err(invalid_input(
            "the ignore treatment never consumes capacity and cannot have a ledger entry",
        ));
    }
    if entry.remaining_availability > entry.max_per_day {
        return Err(invalid_input(format!(
            "treatment '{}' remaining_availability {} exceeds max_per_day {}",
            entry.treatment_id, entry.remaining_availability, entry.max_per_day
        )));
    }
    if !entry.cost_per_contact.is_finite() || entry.cost_per_contact < 0.0 {
        return Err(invalid_input(format!(
            "treatment '{}' cost_per_contact must be a non-negative number",
            entry.treatment_id
        )));
    }
    Ok(())
}
