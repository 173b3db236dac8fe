use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tokio::time::timeout;

use crate::{
    clock::{Clock, SystemClock, rfc3339},
    decision::{
        error::{
            DecisionError, capacity_exhausted, data_unavailable, invalid_input,
            no_available_treatments, oracle_failure, permission_denied, treatment_not_found,
        },
        ports::{
            AlternativeRequest, OraclePort, PermissionPort, ProfilePort, Recommendation,
            RecommendationRequest,
        },
        types::{AllocationSummary, DecisionMode, DecisionResult, PipelineLimits, SelectedTreatment},
    },
    journey::build_journey,
    ledger::{AllocationLedger, LedgerErrorKind},
    permissions,
    treatments::TreatmentCatalog,
    types::{
        EventRecord, IGNORE_TREATMENT_ID, PermissionMatrix, Treatment, TreatmentId, is_ignore,
    },
};

/// What a successful pipeline commits to.
#[derive(Debug)]
struct Outcome {
    selected: SelectedTreatment,
    explanation: String,
    allocation: Option<AllocationSummary>,
}

/// Per-customer context gathered before any treatment is considered.
#[derive(Debug)]
struct CustomerContext {
    journey: Vec<EventRecord>,
    permissions: PermissionMatrix,
}

/// Drives one customer from profile fetch to a committed decision.
///
/// Holds no per-customer state; one instance serves every concurrent decision. The ledger is the
/// only shared mutable collaborator.
pub struct Orchestrator {
    catalog: Arc<TreatmentCatalog>,
    ledger: Arc<AllocationLedger>,
    profiles: Arc<dyn ProfilePort>,
    permissions: Arc<dyn PermissionPort>,
    oracle: Arc<dyn OraclePort>,
    clock: Arc<dyn Clock>,
    limits: PipelineLimits,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<TreatmentCatalog>,
        ledger: Arc<AllocationLedger>,
        profiles: Arc<dyn ProfilePort>,
        permissions: Arc<dyn PermissionPort>,
        oracle: Arc<dyn OraclePort>,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            catalog,
            ledger,
            profiles,
            permissions,
            oracle,
            clock: Arc::new(SystemClock::default()),
            limits: PipelineLimits {
                max_alternative_searches: limits.max_alternative_searches.max(1),
                ..limits
            },
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    pub fn ledger(&self) -> &Arc<AllocationLedger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &Arc<TreatmentCatalog> {
        &self.catalog
    }

    pub async fn run(&self, customer_id: &str, mode: &DecisionMode) -> DecisionResult {
        match mode {
            DecisionMode::Recommend { allowed } => self.decide(customer_id, allowed.as_ref()).await,
            DecisionMode::Directed { treatment_id } => {
                self.decide_with_treatment(customer_id, treatment_id).await
            }
        }
    }

    /// Recommends, validates and allocates a treatment, with bounded fallback.
    pub async fn decide(
        &self,
        customer_id: &str,
        allowed: Option<&BTreeSet<TreatmentId>>,
    ) -> DecisionResult {
        tracing::debug!(target: "decision", customer_id = %customer_id, "decision_started");
        match self.recommend_flow(customer_id, allowed).await {
            Ok(outcome) => self.finish(customer_id, outcome),
            Err(err) => self.fail(customer_id, err),
        }
    }

    /// Applies `treatment_id` directly. Permission or capacity problems are errors, not fallbacks.
    pub async fn decide_with_treatment(
        &self,
        customer_id: &str,
        treatment_id: &str,
    ) -> DecisionResult {
        tracing::debug!(
            target: "decision",
            customer_id = %customer_id,
            treatment_id = %treatment_id,
            "directed_decision_started"
        );
        match self.directed_flow(customer_id, treatment_id).await {
            Ok(outcome) => self.finish(customer_id, outcome),
            Err((err, treatment)) => {
                let mut result = self.fail(customer_id, err);
                if let Some(treatment) = treatment {
                    let explanation = result.message.clone().unwrap_or_default();
                    result = result
                        .with_selected(SelectedTreatment::Definition(treatment))
                        .with_explanation(explanation);
                }
                result
            }
        }
    }

    fn finish(&self, customer_id: &str, outcome: Outcome) -> DecisionResult {
        tracing::info!(
            target: "decision",
            customer_id = %customer_id,
            selected_treatment = %outcome.selected.id(),
            remaining = ?outcome.allocation.map(|summary| summary.remaining),
            "decision_committed"
        );
        DecisionResult::success(
            customer_id,
            outcome.selected,
            outcome.explanation,
            outcome.allocation,
            rfc3339(self.clock.now()),
        )
    }

    fn fail(&self, customer_id: &str, err: DecisionError) -> DecisionResult {
        tracing::warn!(
            target: "decision",
            customer_id = %customer_id,
            kind = ?err.kind,
            error = %err,
            "decision_failed"
        );
        DecisionResult::failure(customer_id, &err, rfc3339(self.clock.now()))
    }

    async fn recommend_flow(
        &self,
        customer_id: &str,
        allowed: Option<&BTreeSet<TreatmentId>>,
    ) -> Result<Outcome, DecisionError> {
        let context = self.gather_context(customer_id).await?;

        let mut excluded = BTreeSet::new();
        let eligible = self.eligible_treatments(allowed, &excluded);
        if eligible.is_empty() {
            if self.catalog.is_enabled(IGNORE_TREATMENT_ID) {
                return Ok(ignore_outcome(
                    "No eligible treatment has capacity today; no action taken",
                ));
            }
            return Err(no_available_treatments("no available treatments"));
        }

        let request = self.recommendation_request(customer_id, &context, eligible);
        let mut candidate = self.call_recommend(request).await?;
        let mut searches = 0;

        loop {
            let reason = match self.commit(customer_id, &candidate.selected_treatment, &context) {
                Ok(allocation) => {
                    return Ok(Outcome {
                        selected: SelectedTreatment::Id(candidate.selected_treatment),
                        explanation: candidate.explanation,
                        allocation,
                    });
                }
                Err(reason) if reason.kind.is_recoverable() => reason,
                Err(err) => return Err(err),
            };

            tracing::info!(
                target: "decision",
                customer_id = %customer_id,
                treatment_id = %candidate.selected_treatment,
                kind = ?reason.kind,
                searches = searches,
                "candidate_rejected"
            );

            if searches >= self.limits.max_alternative_searches {
                return self.fall_back(reason);
            }
            searches += 1;
            excluded.insert(candidate.selected_treatment.clone());

            let eligible = self.eligible_treatments(allowed, &excluded);
            if eligible.is_empty() {
                return self.fall_back(reason);
            }
            let request = AlternativeRequest {
                context: self.recommendation_request(customer_id, &context, eligible),
                excluded_treatment: candidate.selected_treatment.clone(),
            };
            candidate = self.call_find_alternative(request, &excluded).await?;
        }
    }

    async fn directed_flow(
        &self,
        customer_id: &str,
        treatment_id: &str,
    ) -> Result<Outcome, (DecisionError, Option<Box<Treatment>>)> {
        let context = self
            .gather_context(customer_id)
            .await
            .map_err(|err| (err, None))?;

        let treatment = self.catalog.get(treatment_id).ok_or_else(|| {
            (
                treatment_not_found(format!("treatment '{}' not found", treatment_id)),
                None,
            )
        })?;

        match self.commit(customer_id, treatment_id, &context) {
            Ok(allocation) => Ok(Outcome {
                explanation: format!(
                    "Treatment {} ({}) applied by direct selection",
                    treatment.id, treatment.display_name
                ),
                selected: SelectedTreatment::Definition(Box::new(treatment)),
                allocation,
            }),
            Err(err) => Err((err, Some(Box::new(treatment)))),
        }
    }

    async fn gather_context(&self, customer_id: &str) -> Result<CustomerContext, DecisionError> {
        if customer_id.trim().is_empty() {
            return Err(invalid_input("customer_id cannot be empty"));
        }

        let profile = match timeout(
            self.limits.provider_timeout,
            self.profiles.fetch_profile(customer_id),
        )
        .await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(err)) => {
                return Err(data_unavailable(format!("profile unavailable: {}", err)));
            }
            Err(_) => {
                return Err(data_unavailable(
                    "profile unavailable: profile provider timed out",
                ));
            }
        };
        let journey = build_journey(&profile);

        let permissions = match timeout(
            self.limits.provider_timeout,
            self.permissions.fetch_permissions(customer_id),
        )
        .await
        {
            Ok(Ok(Some(matrix))) => matrix,
            Ok(Ok(None)) => PermissionMatrix::empty(customer_id),
            Ok(Err(err)) => {
                tracing::warn!(
                    target: "decision",
                    customer_id = %customer_id,
                    error = %err,
                    "permissions_unavailable"
                );
                PermissionMatrix::empty(customer_id)
            }
            Err(_) => {
                tracing::warn!(
                    target: "decision",
                    customer_id = %customer_id,
                    "permissions_timed_out"
                );
                PermissionMatrix::empty(customer_id)
            }
        };

        tracing::debug!(
            target: "decision",
            customer_id = %customer_id,
            journey_len = journey.len(),
            permission_channels = permissions.channels.len(),
            "context_gathered"
        );
        Ok(CustomerContext {
            journey,
            permissions,
        })
    }

    /// Enabled, allowed, not excluded, and reporting availability right now. `ignore` is never
    /// part of this set.
    fn eligible_treatments(
        &self,
        allowed: Option<&BTreeSet<TreatmentId>>,
        excluded: &BTreeSet<TreatmentId>,
    ) -> Vec<Treatment> {
        self.catalog
            .enabled()
            .into_iter()
            .filter(|treatment| !treatment.is_ignore())
            .filter(|treatment| allowed.is_none_or(|allowed| allowed.contains(&treatment.id)))
            .filter(|treatment| !excluded.contains(&treatment.id))
            .filter(|treatment| match self.ledger.check_availability(&treatment.id) {
                Ok(availability) => availability.available,
                Err(err) => {
                    tracing::debug!(
                        target: "decision",
                        treatment_id = %treatment.id,
                        error = %err,
                        "treatment_without_capacity_entry"
                    );
                    false
                }
            })
            .collect()
    }

    fn recommendation_request(
        &self,
        customer_id: &str,
        context: &CustomerContext,
        eligible: Vec<Treatment>,
    ) -> RecommendationRequest {
        let mut snapshot = self.ledger.snapshot();
        let constraints = eligible
            .iter()
            .filter_map(|treatment| {
                snapshot
                    .remove(&treatment.id)
                    .map(|entry| (treatment.id.clone(), entry))
            })
            .collect();

        let mut treatments: BTreeMap<TreatmentId, Treatment> = eligible
            .into_iter()
            .map(|treatment| (treatment.id.clone(), treatment))
            .collect();
        if let Some(ignore) = self
            .catalog
            .get(IGNORE_TREATMENT_ID)
            .filter(|treatment| treatment.enabled)
        {
            treatments.insert(ignore.id.clone(), ignore);
        }

        RecommendationRequest {
            customer_id: customer_id.to_string(),
            journey: context.journey.clone(),
            treatments,
            constraints,
            permissions: context.permissions.clone(),
        }
    }

    async fn call_recommend(
        &self,
        request: RecommendationRequest,
    ) -> Result<Recommendation, DecisionError> {
        let candidates: BTreeSet<TreatmentId> = request.treatments.keys().cloned().collect();
        let recommendation = match timeout(
            self.limits.oracle_timeout,
            self.oracle.recommend(request),
        )
        .await
        {
            Ok(Ok(recommendation)) => recommendation,
            Ok(Err(err)) => return Err(oracle_failure(format!("oracle failure: {}", err))),
            Err(_) => return Err(oracle_failure("oracle failure: recommendation timed out")),
        };
        validate_choice(&recommendation, &candidates, &BTreeSet::new())?;
        Ok(recommendation)
    }

    async fn call_find_alternative(
        &self,
        request: AlternativeRequest,
        excluded: &BTreeSet<TreatmentId>,
    ) -> Result<Recommendation, DecisionError> {
        let candidates: BTreeSet<TreatmentId> =
            request.context.treatments.keys().cloned().collect();
        let recommendation = match timeout(
            self.limits.oracle_timeout,
            self.oracle.find_alternative(request),
        )
        .await
        {
            Ok(Ok(recommendation)) => recommendation,
            Ok(Err(err)) => return Err(oracle_failure(format!("oracle failure: {}", err))),
            Err(_) => {
                return Err(oracle_failure(
                    "oracle failure: alternative search timed out",
                ));
            }
        };
        validate_choice(&recommendation, &candidates, excluded)?;
        Ok(recommendation)
    }

    /// Permission check, then allocation. Exactly one ledger mutation on success for real
    /// treatments, none for `ignore` or on rejection. Recoverable errors send the caller into the
    /// alternative search.
    fn commit(
        &self,
        customer_id: &str,
        treatment_id: &str,
        context: &CustomerContext,
    ) -> Result<Option<AllocationSummary>, DecisionError> {
        if is_ignore(treatment_id) {
            return Ok(None);
        }

        let treatment = self.catalog.get(treatment_id).ok_or_else(|| {
            treatment_not_found(format!("treatment '{}' not found", treatment_id))
        })?;
        let check = permissions::check(&treatment, &context.permissions);
        if !check.permitted {
            return Err(permission_denied(format!(
                "customer has not consented to {} {} contact for '{}'",
                check.channel.map_or("unknown", |channel| channel.as_str()),
                check
                    .treatment_type
                    .map_or("unknown", |treatment_type| treatment_type.as_str()),
                treatment_id
            )));
        }

        let priority = self
            .ledger
            .entry(treatment_id)
            .map_or(0, |entry| entry.priority);
        match self.ledger.allocate(treatment_id, customer_id, priority) {
            Ok(receipt) => Ok(AllocationSummary::from_receipt(&receipt)),
            Err(err) => match err.kind {
                LedgerErrorKind::Exhausted | LedgerErrorKind::NotFound => {
                    Err(capacity_exhausted(format!("capacity exhausted: {}", err)))
                }
                LedgerErrorKind::InvalidInput => Err(invalid_input(err.message)),
            },
        }
    }

    fn fall_back(&self, reason: DecisionError) -> Result<Outcome, DecisionError> {
        if self.catalog.is_enabled(IGNORE_TREATMENT_ID) {
            Ok(ignore_outcome(format!(
                "No permitted treatment with capacity after alternative search ({}); no action taken",
                reason
            )))
        } else {
            Err(reason)
        }
    }
}

fn ignore_outcome(explanation: impl Into<String>) -> Outcome {
    Outcome {
        selected: SelectedTreatment::Id(IGNORE_TREATMENT_ID.to_string()),
        explanation: explanation.into(),
        allocation: None,
    }
}

/// The choice must be one of the offered candidates and not excluded. `ignore` is offered only
/// while it is enabled.
fn validate_choice(
    recommendation: &Recommendation,
    candidates: &BTreeSet<TreatmentId>,
    excluded: &BTreeSet<TreatmentId>,
) -> Result<(), DecisionError> {
    let selected = recommendation.selected_treatment.as_str();
    if is_ignore(selected) {
        if candidates.contains(selected) {
            return Ok(());
        }
        return Err(oracle_failure(
            "oracle failure: 'ignore' is disabled and was not offered",
        ));
    }
    if selected.trim().is_empty() {
        return Err(oracle_failure("oracle failure: no treatment selected"));
    }
    if excluded.contains(selected) {
        return Err(oracle_failure(format!(
            "oracle failure: '{}' was excluded from the alternative search",
            selected
        )));
    }
    if !candidates.contains(selected) {
        return Err(oracle_failure(format!(
            "oracle failure: '{}' is not an eligible treatment",
            selected
        )));
    }
    Ok(())
}
