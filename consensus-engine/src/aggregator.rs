//! Signal Aggregator - weighted voting across provider responses
//!
//! Each response votes for its decision with `provider weight x confidence`.
//! The decision with the most weighted mass wins; confidence, agreement,
//! reasoning, risk and price levels are derived from the supporters of the
//! winning decision. The aggregator is stateless and never depends on the
//! order responses arrive in.

use super::error::ConsensusError;
use chrono::Utc;
use common::{ConsensusResult, Decision, ProviderResponse};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

/// Weight applied to providers missing from the weight map
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Share of the final confidence that does not depend on agreement
const BASE_CONFIDENCE_SHARE: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct SignalAggregator {
    min_providers: usize,
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self { min_providers: 1 }
    }
}

impl SignalAggregator {
    pub fn new(min_providers: usize) -> Self {
        let min_providers = min_providers.max(1);
        debug!("SignalAggregator initialized (min_providers={})", min_providers);
        Self { min_providers }
    }

    pub fn min_providers(&self) -> usize {
        self.min_providers
    }

    /// Combine responses into one consensus result
    ///
    /// `total_providers` and `participating_providers` are both set to the
    /// number of responses; the orchestrator later overwrites the former
    /// with the number of providers it asked.
    pub fn aggregate(
        &self,
        mut responses: Vec<ProviderResponse>,
        weights: &HashMap<String, f64>,
    ) -> Result<ConsensusResult, ConsensusError> {
        if responses.len() < self.min_providers {
            return Err(ConsensusError::InsufficientProviders {
                available: responses.len(),
                required: self.min_providers,
                providers: responses.iter().map(|r| r.provider_name.clone()).collect(),
            });
        }

        for response in &responses {
            if !response.confidence.is_finite() || !(0.0..=1.0).contains(&response.confidence) {
                return Err(ConsensusError::AggregationFailure(format!(
                    "{} reported confidence {} outside [0, 1]",
                    response.provider_name, response.confidence
                )));
            }
            let weight = weight_of(weights, &response.provider_name);
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConsensusError::AggregationFailure(format!(
                    "{} has invalid weight {}",
                    response.provider_name, weight
                )));
            }
        }

        // Canonical order makes every float sum and tie independent of arrival order
        responses.sort_by(canonical_order);

        let n = responses.len();
        let weighted_votes = weighted_votes(&responses, weights);
        let vote_breakdown = vote_breakdown(&responses);
        let decision = winning_decision(&weighted_votes);

        let supporters: Vec<&ProviderResponse> =
            responses.iter().filter(|r| r.decision == decision).collect();

        let confidence = consensus_confidence(&supporters, n, weights);
        let agreement_score = agreement_score(&weighted_votes, decision);
        let reasoning = consensus_reasoning(&supporters, n);
        let risk_level = responses
            .iter()
            .map(|r| r.risk_level.unwrap_or_default())
            .max()
            .unwrap_or_default();
        let stop_loss = median(supporters.iter().filter_map(|r| r.stop_loss));
        let take_profit = median(supporters.iter().filter_map(|r| r.take_profit));

        let total_latency_ms = responses.iter().map(|r| r.latency_ms).sum();
        let total_cost_usd = responses.iter().map(|r| r.cost_usd).sum();
        let total_tokens = responses.iter().map(|r| r.tokens_used).sum();

        info!(
            "Consensus reached: {} (confidence: {:.2}, agreement: {:.2}, providers: {}/{})",
            decision,
            confidence,
            agreement_score,
            supporters.len(),
            n
        );

        Ok(ConsensusResult {
            id: Uuid::new_v4(),
            decision,
            confidence,
            reasoning,
            risk_level,
            stop_loss,
            take_profit,
            total_providers: n,
            participating_providers: n,
            agreement_score,
            vote_breakdown,
            weighted_votes,
            total_latency_ms,
            total_cost_usd,
            total_tokens,
            timestamp: Utc::now(),
            provider_responses: responses,
        })
    }
}

fn weight_of(weights: &HashMap<String, f64>, provider: &str) -> f64 {
    weights.get(provider).copied().unwrap_or(DEFAULT_WEIGHT)
}

fn canonical_order(a: &ProviderResponse, b: &ProviderResponse) -> Ordering {
    a.provider_name
        .cmp(&b.provider_name)
        .then(a.decision.cmp(&b.decision))
        .then(a.confidence.total_cmp(&b.confidence))
        .then_with(|| a.reasoning.cmp(&b.reasoning))
}

/// Weighted mass per decision; every decision is present
fn weighted_votes(
    responses: &[ProviderResponse],
    weights: &HashMap<String, f64>,
) -> BTreeMap<Decision, f64> {
    let mut votes: BTreeMap<Decision, f64> = Decision::ALL.iter().map(|d| (*d, 0.0)).collect();
    for response in responses {
        let vote = weight_of(weights, &response.provider_name) * response.confidence;
        *votes.entry(response.decision).or_insert(0.0) += vote;
    }
    votes
}

/// Raw vote counts for decisions that received at least one vote
fn vote_breakdown(responses: &[ProviderResponse]) -> BTreeMap<Decision, usize> {
    let mut breakdown = BTreeMap::new();
    for response in responses {
        *breakdown.entry(response.decision).or_insert(0) += 1;
    }
    breakdown
}

/// Highest weighted mass wins; ties go to the earlier of BUY, SELL, HOLD
fn winning_decision(votes: &BTreeMap<Decision, f64>) -> Decision {
    let mut winner = Decision::ALL[0];
    let mut best = f64::NEG_INFINITY;
    for decision in Decision::ALL {
        let mass = votes.get(&decision).copied().unwrap_or(0.0);
        if mass > best {
            winner = decision;
            best = mass;
        }
    }
    winner
}

fn consensus_confidence(
    supporters: &[&ProviderResponse],
    total: usize,
    weights: &HashMap<String, f64>,
) -> f64 {
    if supporters.is_empty() || total == 0 {
        return 0.0;
    }

    let (weight_sum, weighted_confidence) =
        supporters.iter().fold((0.0, 0.0), |(w_sum, c_sum), r| {
            let w = weight_of(weights, &r.provider_name);
            (w_sum + w, c_sum + w * r.confidence)
        });
    let base = if weight_sum > 0.0 {
        weighted_confidence / weight_sum
    } else {
        0.0
    };

    let agreement_factor = supporters.len() as f64 / total as f64;
    let blended = base * (BASE_CONFIDENCE_SHARE + (1.0 - BASE_CONFIDENCE_SHARE) * agreement_factor);
    blended.clamp(0.0, 1.0)
}

fn agreement_score(votes: &BTreeMap<Decision, f64>, decision: Decision) -> f64 {
    let total: f64 = votes.values().sum();
    if total <= 0.0 {
        return 0.0;
    }
    votes.get(&decision).copied().unwrap_or(0.0) / total
}

fn consensus_reasoning(supporters: &[&ProviderResponse], total: usize) -> String {
    // First maximum in canonical order, so equal confidences resolve by provider name
    let most_confident = supporters
        .iter()
        .copied()
        .reduce(|best, r| if r.confidence > best.confidence { r } else { best });

    match most_confident {
        Some(r) => format!(
            "Consensus ({}/{} providers agree): {}",
            supporters.len(),
            total,
            r.reasoning
        ),
        None => "No consensus reasoning available".to_string(),
    }
}

/// Upper median of the usable price levels
fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut values: Vec<f64> = values.filter(|v| v.is_finite() && *v != 0.0).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[values.len() / 2])
}
