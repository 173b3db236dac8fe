use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    clock::{Clock, SystemClock},
    config::{Config, OracleConfig},
    decision::{BatchRunner, OraclePort, Orchestrator},
    ledger::AllocationLedger,
    oracle::{OpenAiCompatibleOracle, RuleBasedOracle},
    providers::{JsonDirectoryProfileProvider, JsonPermissionProvider},
    treatments::TreatmentCatalog,
};

/// Everything one process needs to make decisions, wired from a loaded [`Config`].
pub struct App {
    pub ledger: Arc<AllocationLedger>,
    pub catalog: Arc<TreatmentCatalog>,
    pub orchestrator: Arc<Orchestrator>,
    pub batch: BatchRunner,
}

impl App {
    pub async fn build(config: &Config) -> Result<Self> {
        Self::build_with_clock(config, Arc::new(SystemClock::default())).await
    }

    pub async fn build_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let ledger = Arc::new(
            AllocationLedger::new(config.ledger_entries(), Arc::clone(&clock))
                .context("failed to build allocation ledger")?,
        );
        let catalog = Arc::new(
            TreatmentCatalog::new(config.treatment_definitions(), Arc::clone(&clock))
                .context("failed to build treatment catalog")?,
        );

        for source in &config.custom_treatments {
            catalog
                .add_custom(&ledger, &source.text(), source.treatment_id())
                .context("failed to add custom treatment")?;
        }

        for treatment in catalog.enabled() {
            if !treatment.is_ignore() && !ledger.contains(&treatment.id) {
                tracing::warn!(
                    target: "treatments",
                    treatment_id = %treatment.id,
                    "treatment_without_constraint"
                );
            }
        }

        let profiles = JsonDirectoryProfileProvider::new(&config.data.profile_dir)
            .skip_file(&config.data.permissions_path)
            .with_cache(config.data.cache_profiles);
        let permissions = JsonPermissionProvider::load(&config.data.permissions_path)
            .await
            .with_context(|| {
                format!(
                    "failed to load permissions from {}",
                    config.data.permissions_path.display()
                )
            })?;

        let limits = config.pipeline.limits();
        let oracle: Arc<dyn OraclePort> = match &config.oracle {
            OracleConfig::RuleBased { churn_threshold } => {
                Arc::new(RuleBasedOracle::new(*churn_threshold))
            }
            OracleConfig::OpenaiCompatible(oracle_config) => Arc::new(
                OpenAiCompatibleOracle::new(oracle_config, limits.oracle_timeout)
                    .context("failed to build openai-compatible oracle")?,
            ),
        };

        tracing::info!(
            target: "decision",
            treatments = catalog.len(),
            constraints = ledger.snapshot().len(),
            permission_records = permissions.len(),
            profile_dir = %config.data.profile_dir.display(),
            max_alternative_searches = limits.max_alternative_searches,
            max_concurrency = config.batch.max_concurrency,
            "app_built"
        );

        let orchestrator = Arc::new(
            Orchestrator::new(
                Arc::clone(&catalog),
                Arc::clone(&ledger),
                Arc::new(profiles),
                Arc::new(permissions),
                oracle,
                limits,
            )
            .with_clock(clock),
        );
        let batch = BatchRunner::new(Arc::clone(&orchestrator), config.batch.max_concurrency);

        Ok(Self {
            ledger,
            catalog,
            orchestrator,
            batch,
        })
    }
}
