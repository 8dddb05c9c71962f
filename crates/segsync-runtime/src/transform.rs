#![forbid(unsafe_code)]

//! Raw respondent answers to aggregation inputs.
//!
//! A respondent's *profile* is their answers to the visualization's grouping
//! questions, in configured order, joined by `,`. The profile picks the
//! basis split; the primary-question answer picks the expanded response
//! group.

use std::collections::BTreeMap;

use segsync_backend::{LookupMaps, PointContribution, VisualizationConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_weight() -> f64 {
    1.0
}

/// One respondent's submitted answers, keyed by question id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondentAnswers {
    pub respondent_id: u64,
    pub answers: BTreeMap<String, usize>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl RespondentAnswers {
    #[must_use]
    pub fn new(respondent_id: u64) -> Self {
        Self {
            respondent_id,
            answers: BTreeMap::new(),
            weight: default_weight(),
        }
    }

    #[must_use]
    pub fn answer(mut self, question: impl Into<String>, response_index: usize) -> Self {
        self.answers.insert(question.into(), response_index);
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("respondent {respondent_id} did not answer question {question}")]
    MissingAnswer { respondent_id: u64, question: String },

    #[error("respondent {respondent_id} chose response {response_index}, which maps to no group")]
    UnmappedResponse {
        respondent_id: u64,
        response_index: usize,
    },

    #[error("respondent {respondent_id} has profile `{profile}`, which maps to no basis split")]
    UnknownProfile { respondent_id: u64, profile: String },

    #[error("respondent {respondent_id} has invalid weight {weight}")]
    InvalidWeight { respondent_id: u64, weight: f64 },
}

/// Maps answers through one visualization's lookups.
#[derive(Debug, Clone, Copy)]
pub struct ResponseTransformer<'a> {
    config: &'a VisualizationConfig,
    lookup: &'a LookupMaps,
}

impl<'a> ResponseTransformer<'a> {
    #[must_use]
    pub fn new(config: &'a VisualizationConfig, lookup: &'a LookupMaps) -> Self {
        Self { config, lookup }
    }

    /// Grouping-question profile string for `answers`.
    pub fn profile(&self, answers: &RespondentAnswers) -> Result<String, TransformError> {
        let mut parts = Vec::with_capacity(self.config.grouping_questions.len());
        for question in &self.config.grouping_questions {
            let index = answers
                .answers
                .get(question)
                .ok_or_else(|| TransformError::MissingAnswer {
                    respondent_id: answers.respondent_id,
                    question: question.clone(),
                })?;
            parts.push(index.to_string());
        }
        Ok(parts.join(","))
    }

    pub fn transform(&self, answers: &RespondentAnswers) -> Result<PointContribution, TransformError> {
        let respondent_id = answers.respondent_id;
        if !answers.weight.is_finite() || answers.weight < 0.0 {
            return Err(TransformError::InvalidWeight {
                respondent_id,
                weight: answers.weight,
            });
        }

        let primary = &self.config.primary_question;
        let &response_index =
            answers
                .answers
                .get(primary)
                .ok_or_else(|| TransformError::MissingAnswer {
                    respondent_id,
                    question: primary.clone(),
                })?;
        let &expanded_group_index = self
            .lookup
            .response_index_to_group_index
            .get(&response_index)
            .ok_or(TransformError::UnmappedResponse {
                respondent_id,
                response_index,
            })?;

        let profile = self.profile(answers)?;
        let &basis_split_index = self
            .lookup
            .profile_to_split_index
            .get(&profile)
            .ok_or(TransformError::UnknownProfile {
                respondent_id,
                profile: profile.clone(),
            })?;

        Ok(PointContribution {
            respondent_id,
            basis_split_index,
            expanded_group_index,
            weight: answers.weight,
        })
    }

    /// Transform every response, keeping failures separate.
    #[must_use]
    pub fn transform_all(
        &self,
        responses: &[RespondentAnswers],
    ) -> (Vec<PointContribution>, Vec<TransformError>) {
        let mut contributions = Vec::with_capacity(responses.len());
        let mut failures = Vec::new();
        for answers in responses {
            match self.transform(answers) {
                Ok(c) => contributions.push(c),
                Err(e) => failures.push(e),
            }
        }
        (contributions, failures)
    }
}
