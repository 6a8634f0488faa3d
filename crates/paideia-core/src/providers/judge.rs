use std::collections::BTreeMap;
use std::sync::Arc;

use super::{JudgeClient, JudgeRequest};
use crate::checks;
use crate::model::ScoringMethod;
use crate::scoring::Rubric;

/// One turn's judgment after rubric aggregation. A failed judge call keeps
/// the generated content but carries no score; the failure is visible in
/// `method`, never smoothed over with a fallback number.
#[derive(Debug, Clone, Default)]
pub struct JudgeVerdict {
    pub overall: Option<f64>,
    pub base: Option<f64>,
    pub recognition: Option<f64>,
    pub dimensions: BTreeMap<String, f64>,
    pub method: ScoringMethod,
    pub passes_required: Option<bool>,
    pub passes_forbidden: Option<bool>,
    pub summary: Option<String>,
    pub judge_model: Option<String>,
}

/// Wraps a [`JudgeClient`] and turns its raw 1-5 dimension ratings into the
/// 0-100 composites. With no client installed every verdict is `Skipped`;
/// content checks still run locally against the generated text.
#[derive(Clone)]
pub struct JudgeService {
    client: Option<Arc<dyn JudgeClient>>,
    rubric: Rubric,
}

impl JudgeService {
    pub fn new(client: Arc<dyn JudgeClient>, rubric: Rubric) -> Self {
        Self {
            client: Some(client),
            rubric,
        }
    }

    pub fn disabled(rubric: Rubric) -> Self {
        Self {
            client: None,
            rubric,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub async fn judge(&self, req: &JudgeRequest<'_>) -> JudgeVerdict {
        let text = checks::reply_text(req.generation);
        let local_required = checks::passes_required(&text, &req.scenario.required_content);
        let local_forbidden = checks::passes_forbidden(&text, &req.scenario.forbidden_content);

        let Some(client) = &self.client else {
            return JudgeVerdict {
                method: ScoringMethod::Skipped,
                passes_required: local_required,
                passes_forbidden: local_forbidden,
                ..Default::default()
            };
        };

        match client.score(req).await {
            Ok(scores) => {
                let composites = self.rubric.composites(&scores.dimensions);
                let method = if composites.overall.is_some() {
                    ScoringMethod::Rubric
                } else {
                    // the judge answered but rated no known dimension
                    ScoringMethod::JudgeFailed
                };
                JudgeVerdict {
                    overall: composites.overall,
                    base: composites.base,
                    recognition: composites.recognition,
                    dimensions: scores.dimensions,
                    method,
                    passes_required: scores.passes_required.or(local_required),
                    passes_forbidden: scores.passes_forbidden.or(local_forbidden),
                    summary: scores.summary,
                    judge_model: Some(scores.judge_model),
                }
            }
            Err(e) => {
                tracing::warn!(
                    scenario = %req.scenario.id,
                    profile = %req.profile.name,
                    turn = req.turn,
                    error = %e,
                    "judge call failed, recording null score"
                );
                JudgeVerdict {
                    method: ScoringMethod::JudgeFailed,
                    passes_required: local_required,
                    passes_forbidden: local_forbidden,
                    judge_model: Some(client.judge_model()),
                    ..Default::default()
                }
            }
        }
    }
}
