use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{
    clock::rfc3339,
    decision::{
        error::internal_error,
        orchestrator::Orchestrator,
        types::{DecisionMode, DecisionResult},
    },
};

/// Runs the orchestrator over many customers.
///
/// Each customer gets its own task, at most `max_concurrency` in flight. Results come back in
/// input order, and a customer whose task panics or is cancelled gets an error result without
/// affecting the others.
pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn run(&self, customer_ids: &[String], mode: &DecisionMode) -> Vec<DecisionResult> {
        tracing::info!(
            target: "batch",
            customers = customer_ids.len(),
            max_concurrency = self.max_concurrency,
            directed = matches!(mode, DecisionMode::Directed { .. }),
            "batch_started"
        );

        let handles: Vec<_> = customer_ids
            .iter()
            .map(|customer_id| {
                let orchestrator = Arc::clone(&self.orchestrator);
                let permits = Arc::clone(&self.permits);
                let customer_id = customer_id.clone();
                let mode = mode.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    orchestrator.run(&customer_id, &mode).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (customer_id, handle) in customer_ids.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    tracing::error!(
                        target: "batch",
                        customer_id = %customer_id,
                        panicked = join_err.is_panic(),
                        error = %join_err,
                        "customer_task_failed"
                    );
                    let err = internal_error(format!(
                        "decision task failed for customer '{}': {}",
                        customer_id, join_err
                    ));
                    DecisionResult::failure(
                        customer_id.clone(),
                        &err,
                        rfc3339(self.orchestrator.clock().now()),
                    )
                }
            };
            results.push(result);
        }

        let succeeded = results.iter().filter(|result| result.is_success()).count();
        tracing::info!(
            target: "batch",
            customers = results.len(),
            succeeded = succeeded,
            failed = results.len() - succeeded,
            "batch_finished"
        );
        results
    }
}
