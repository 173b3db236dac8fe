use async_trait::async_trait;
use serde_json::Value;

use crate::{
    decision::{
        error::DecisionError,
        ports::{AlternativeRequest, OraclePort, Recommendation, RecommendationRequest},
    },
    types::{EventRecord, IGNORE_TREATMENT_ID},
};

pub const DEFAULT_CHURN_THRESHOLD: f64 = 0.6;

const UNRANKED_PRIORITY: i32 = 100;

/// Deterministic oracle driven by journey signals.
///
/// High churn risk asks for `call_back`, poor connectivity for `service_sms`, anyone else gets
/// `loyalty_app`. A rule only fires when its treatment is among the candidates.
#[derive(Debug, Clone)]
pub struct RuleBasedOracle {
    churn_threshold: f64,
}

impl Default for RuleBasedOracle {
    fn default() -> Self {
        Self::new(DEFAULT_CHURN_THRESHOLD)
    }
}

impl RuleBasedOracle {
    pub fn new(churn_threshold: f64) -> Self {
        Self { churn_threshold }
    }

    fn choose(&self, req: &RecommendationRequest) -> Recommendation {
        if req.journey.is_empty() {
            return Recommendation::new(IGNORE_TREATMENT_ID, "No journey data available");
        }
        let offered = |id: &str| {
            req.treatments
                .get(id)
                .is_some_and(|treatment| treatment.enabled)
        };

        let churn = latest(&req.journey, "churn_probability", Value::as_f64);
        if let Some(churn) =
            churn.filter(|churn| *churn > self.churn_threshold && offered("call_back"))
        {
            return Recommendation::new(
                "call_back",
                format!(
                    "High churn risk ({:.2}) detected; an immediate callback may prevent churn.",
                    churn
                ),
            );
        }

        if latest(&req.journey, "connection_quality", Value::as_str) == Some("poor")
            && offered("service_sms")
        {
            return Recommendation::new(
                "service_sms",
                "Poor network connectivity detected; send a service update message.",
            );
        }

        if offered("loyalty_app") {
            return Recommendation::new(
                "loyalty_app",
                "Recommend a loyalty app update with personalised offers.",
            );
        }

        Recommendation::new(
            IGNORE_TREATMENT_ID,
            "No specific treatment recommended based on available data.",
        )
    }
}

/// Most recent value of `key` in a date-ordered journey.
fn latest<'a, T>(
    journey: &'a [EventRecord],
    key: &str,
    extract: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    journey
        .iter()
        .rev()
        .find_map(|record| record.attribute(key).and_then(&extract))
}

#[async_trait]
impl OraclePort for RuleBasedOracle {
    async fn recommend(
        &self,
        req: RecommendationRequest,
    ) -> Result<Recommendation, DecisionError> {
        Ok(self.choose(&req))
    }

    /// Lowest priority number wins; ties go to the smaller id.
    async fn find_alternative(
        &self,
        req: AlternativeRequest,
    ) -> Result<Recommendation, DecisionError> {
        let best = req
            .context
            .treatments
            .values()
            .filter(|treatment| treatment.enabled && !treatment.is_ignore())
            .filter(|treatment| treatment.id != req.excluded_treatment)
            .map(|treatment| {
                let priority = req
                    .context
                    .constraints
                    .get(&treatment.id)
                    .map_or(UNRANKED_PRIORITY, |entry| entry.priority);
                (priority, treatment.id.as_str())
            })
            .min();

        Ok(match best {
            Some((_, id)) => Recommendation::new(
                id,
                format!("Alternative to {}.", req.excluded_treatment),
            ),
            None => Recommendation::new(IGNORE_TREATMENT_ID, "No alternative treatments available."),
        })
    }
}
