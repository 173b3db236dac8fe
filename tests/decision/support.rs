use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use time::macros::datetime;

use cvm_decision::{
    clock::ManualClock,
    decision::{
        AlternativeRequest, DecisionError, OraclePort, Orchestrator, PipelineLimits, ProfilePort,
        Recommendation, RecommendationRequest,
    },
    ledger::{AllocationLedger, LedgerEntry},
    providers::{InMemoryPermissionProvider, InMemoryProfileProvider},
    treatments::TreatmentCatalog,
    types::{
        Channel, ConsentFlag, CustomerProfile, EventRecord, PermissionMatrix, Treatment,
        TreatmentType,
    },
};

type Answer = Result<Recommendation, DecisionError>;
type Hook = Box<dyn Fn() + Send + Sync>;

/// Oracle double that replays queued answers and records every request. An empty queue answers
/// `ignore`.
#[derive(Default)]
pub struct ScriptedOracle {
    recommendations: Mutex<VecDeque<Answer>>,
    alternatives: Mutex<VecDeque<Answer>>,
    pub recommend_requests: Mutex<Vec<RecommendationRequest>>,
    pub alternative_requests: Mutex<Vec<AlternativeRequest>>,
    on_recommend: Option<Hook>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recommends(self, treatment_id: &str) -> Self {
        self.recommendations
            .lock()
            .expect("oracle lock")
            .push_back(Ok(Recommendation::new(treatment_id, format!("{treatment_id} fits"))));
        self
    }

    pub fn recommend_fails(self, err: DecisionError) -> Self {
        self.recommendations
            .lock()
            .expect("oracle lock")
            .push_back(Err(err));
        self
    }

    pub fn then_alternative(self, treatment_id: &str) -> Self {
        self.alternatives
            .lock()
            .expect("oracle lock")
            .push_back(Ok(Recommendation::new(
                treatment_id,
                format!("{treatment_id} as alternative"),
            )));
        self
    }

    /// Runs before each recommendation is returned, e.g. to drain capacity mid-decision.
    pub fn on_recommend(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_recommend = Some(Box::new(hook));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn recommend_calls(&self) -> usize {
        self.recommend_requests.lock().expect("oracle lock").len()
    }

    pub fn alternative_calls(&self) -> usize {
        self.alternative_requests.lock().expect("oracle lock").len()
    }

    pub fn total_calls(&self) -> usize {
        self.recommend_calls() + self.alternative_calls()
    }

    fn next(queue: &Mutex<VecDeque<Answer>>) -> Answer {
        queue
            .lock()
            .expect("oracle lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Recommendation::new("ignore", "nothing scripted")))
    }
}

#[async_trait]
impl OraclePort for ScriptedOracle {
    async fn recommend(&self, req: RecommendationRequest) -> Result<Recommendation, DecisionError> {
        self.recommend_requests.lock().expect("oracle lock").push(req);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(hook) = &self.on_recommend {
            hook();
        }
        Self::next(&self.recommendations)
    }

    async fn find_alternative(
        &self,
        req: AlternativeRequest,
    ) -> Result<Recommendation, DecisionError> {
        self.alternative_requests.lock().expect("oracle lock").push(req);
        Self::next(&self.alternatives)
    }
}

/// Profile provider with per-customer delays and panics that tracks peak concurrency.
#[derive(Default)]
pub struct TestProfiles {
    inner: InMemoryProfileProvider,
    delays: BTreeMap<String, Duration>,
    panics: BTreeSet<String>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl TestProfiles {
    pub fn new(inner: InMemoryProfileProvider) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn delay(mut self, customer_id: &str, delay: Duration) -> Self {
        self.delays.insert(customer_id.to_string(), delay);
        self
    }

    pub fn panic_for(mut self, customer_id: &str) -> Self {
        self.panics.insert(customer_id.to_string());
        self
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfilePort for TestProfiles {
    async fn fetch_profile(&self, customer_id: &str) -> Result<CustomerProfile, DecisionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(customer_id) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panics.contains(customer_id) {
            panic!("profile store crashed for {customer_id}");
        }
        self.inner.fetch_profile(customer_id).await
    }
}

pub fn treatments() -> Vec<Treatment> {
    vec![
        Treatment::new("call_back", "Retention call from customer care")
            .with_channel(Channel::Call)
            .with_type(TreatmentType::Service),
        Treatment::new("retention_sms", "Retention discount by text")
            .with_channel(Channel::Sms)
            .with_type(TreatmentType::Marketing),
        Treatment::new("service_sms", "Network quality update by text")
            .with_channel(Channel::Sms)
            .with_type(TreatmentType::Service),
        Treatment::new("loyalty_app", "Loyalty reward in the app")
            .with_channel(Channel::App)
            .with_type(TreatmentType::Marketing),
        Treatment::new("retention_email", "Retention offer by email")
            .with_channel(Channel::Email)
            .with_type(TreatmentType::Marketing),
        Treatment::new("ignore", "Take no action"),
    ]
}

pub fn ledger_entries() -> Vec<LedgerEntry> {
    vec![
        LedgerEntry::new("call_back", 2).with_priority(1),
        LedgerEntry::new("retention_sms", 10).with_priority(3),
        LedgerEntry::new("service_sms", 10).with_priority(2),
        LedgerEntry::new("loyalty_app", 5).with_priority(5),
        LedgerEntry::new("retention_email", 10).with_priority(4),
    ]
}

/// U1 refuses SMS marketing and has no email consent; app marketing and call service are granted.
pub fn u1_permissions() -> PermissionMatrix {
    PermissionMatrix::empty("U1")
        .with_consent(Channel::Sms, TreatmentType::Marketing, ConsentFlag::No)
        .with_consent(Channel::Sms, TreatmentType::Service, ConsentFlag::Yes)
        .with_consent(Channel::App, TreatmentType::Marketing, ConsentFlag::Yes)
        .with_consent(Channel::Call, TreatmentType::Service, ConsentFlag::Yes)
}

pub fn granted_everything(customer_id: &str) -> PermissionMatrix {
    let mut matrix = PermissionMatrix::empty(customer_id);
    for channel in [Channel::Email, Channel::Sms, Channel::Call, Channel::App] {
        for treatment_type in [TreatmentType::Marketing, TreatmentType::Service] {
            matrix = matrix.with_consent(channel, treatment_type, ConsentFlag::Yes);
        }
    }
    matrix
}

pub fn u1_profile() -> CustomerProfile {
    CustomerProfile::new("U1")
        .with_records(
            "churn_scores",
            vec![
                EventRecord::new("U1", "2024-02-20").with_attribute("churn_probability", json!(0.4)),
            ],
        )
        .with_records(
            "usage_data",
            vec![
                EventRecord::new("U1", "2024-02-28").with_attribute("data_gb", json!(12.5)),
                EventRecord::new("U1", "2024-02-01").with_attribute("data_gb", json!(3.0)),
            ],
        )
}

pub fn fast_limits() -> PipelineLimits {
    PipelineLimits {
        max_alternative_searches: 1,
        oracle_timeout: Duration::from_secs(5),
        provider_timeout: Duration::from_secs(5),
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub catalog: Arc<TreatmentCatalog>,
    pub ledger: Arc<AllocationLedger>,
    pub profiles: Arc<InMemoryProfileProvider>,
    pub permissions: Arc<InMemoryPermissionProvider>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_catalog(treatments(), ledger_entries())
    }

    pub fn with_catalog(treatments: Vec<Treatment>, entries: Vec<LedgerEntry>) -> Self {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 10:00 UTC)));
        let catalog = Arc::new(
            TreatmentCatalog::new(treatments, clock.clone()).expect("catalog should build"),
        );
        let ledger =
            Arc::new(AllocationLedger::new(entries, clock.clone()).expect("ledger should build"));
        let profiles = Arc::new(InMemoryProfileProvider::new().with_profile(u1_profile()));
        let permissions = Arc::new(InMemoryPermissionProvider::new().with_matrix(u1_permissions()));
        Self {
            clock,
            catalog,
            ledger,
            profiles,
            permissions,
        }
    }

    pub fn remaining(&self, treatment_id: &str) -> Option<u32> {
        self.ledger
            .entry(treatment_id)
            .map(|entry| entry.remaining_availability)
    }

    pub fn orchestrator(&self, oracle: Arc<ScriptedOracle>, limits: PipelineLimits) -> Orchestrator {
        self.orchestrator_with_profiles(self.profiles.clone(), oracle, limits)
    }

    pub fn orchestrator_with_profiles(
        &self,
        profiles: Arc<dyn ProfilePort>,
        oracle: Arc<ScriptedOracle>,
        limits: PipelineLimits,
    ) -> Orchestrator {
        Orchestrator::new(
            self.catalog.clone(),
            self.ledger.clone(),
            profiles,
            self.permissions.clone(),
            oracle,
            limits,
        )
        .with_clock(self.clock.clone())
    }
}
