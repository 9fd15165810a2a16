//! ELO ranking of responses by pairwise judging

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::prompts::{judge_prompt, parse_verdict, Verdict};
use super::{ConsensusInput, RankedResponse};
use crate::error::{EnsembleError, Result};
use crate::llm::ProviderClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EloConfig {
    /// Passes over every pair of responses
    pub rounds: u32,
    pub k_factor: f64,
    pub baseline: f64,
    /// Responses kept for the summary when the caller does not say
    pub top_n: usize,
    /// Fixed seed for pair order; random when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            k_factor: 32.0,
            baseline: 1500.0,
            top_n: 2,
            seed: None,
        }
    }
}

/// Expected score of a player rated `rating` against `opponent`
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// New ratings of `a` and `b` after a game where `a` scored `score_a`
/// (1 win, 0.5 tie, 0 loss)
pub fn update(a: f64, b: f64, score_a: f64, k_factor: f64) -> (f64, f64) {
    let expected_a = expected_score(a, b);
    let expected_b = expected_score(b, a);
    (
        a + k_factor * (score_a - expected_a),
        b + k_factor * ((1.0 - score_a) - expected_b),
    )
}

/// Rank `inputs` by repeated pairwise judging.
///
/// Returns every input, highest rating first; equal ratings keep input order.
pub async fn rank(
    judge: &dyn ProviderClient,
    judge_model: &str,
    prompt: &str,
    inputs: &[ConsensusInput],
    config: &EloConfig,
) -> Result<Vec<RankedResponse>> {
    let n = inputs.len();
    let mut ratings = vec![config.baseline; n];

    let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!(
        responses = n,
        rounds = config.rounds,
        judge = judge_model,
        "elo: ranking started"
    );

    for round in 0..config.rounds {
        pairs.shuffle(&mut rng);
        for &(i, j) in &pairs {
            // present in random order so position bias averages out
            let swapped = rng.gen_bool(0.5);
            let (first, second) = if swapped { (j, i) } else { (i, j) };

            let reply = judge
                .complete(
                    &judge_prompt(prompt, &inputs[first].text, &inputs[second].text),
                    judge_model,
                )
                .await
                .map_err(|e| EnsembleError::Judge(e.to_string()))?;

            let verdict = parse_verdict(&reply).unwrap_or_else(|| {
                warn!(reply = %reply.trim(), "elo: unparseable verdict, scoring as tie");
                Verdict::Tie
            });

            let score_first = match verdict {
                Verdict::A => 1.0,
                Verdict::B => 0.0,
                Verdict::Tie => 0.5,
            };
            let (new_first, new_second) =
                update(ratings[first], ratings[second], score_first, config.k_factor);
            ratings[first] = new_first;
            ratings[second] = new_second;

            debug!(
                round,
                a = %inputs[first].label,
                b = %inputs[second].label,
                ?verdict,
                "elo: judged pair"
            );
        }
    }

    let mut ranked: Vec<(usize, f64)> = ratings.into_iter().enumerate().collect();
    // sort_by is stable, so equal ratings stay in input order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    Ok(ranked
        .into_iter()
        .map(|(idx, rating)| RankedResponse {
            id: inputs[idx].id.clone(),
            label: inputs[idx].label.clone(),
            rating,
        })
        .collect())
}

/// The first `top_n` ranked responses, as consensus inputs
pub fn select_top(
    ranking: &[RankedResponse],
    inputs: &[ConsensusInput],
    top_n: usize,
) -> Result<Vec<ConsensusInput>> {
    if top_n == 0 || top_n > ranking.len() {
        return Err(EnsembleError::TopNOutOfRange {
            top_n,
            available: ranking.len(),
        });
    }

    Ok(ranking[..top_n]
        .iter()
        .filter_map(|r| inputs.iter().find(|i| i.id == r.id).cloned())
        .collect())
}
