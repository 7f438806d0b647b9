// Consensus engine
//
// Issues the same logical request to N providers in parallel and merges
// the answers by the declared strategy. Participant order comes from the
// configuration list and is the deterministic tie-break everywhere.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use foreman_core::provider::{ChatMessage, ProviderError, ProviderRequest, ProviderResponse};
use foreman_core::router::ConsensusStrategy;
use foreman_core::{ForemanError, Result};

/// Fully resolved consensus parameters for one phase execution
#[derive(Debug, Clone)]
pub struct ConsensusSpec {
    /// (provider, model) pairs in configuration order
    pub participants: Vec<(String, String)>,
    pub strategy: ConsensusStrategy,
    pub min_successful: usize,
    pub timeout: Duration,
    /// Required for the synthesize strategy
    pub synthesizer: Option<(String, String)>,
}

/// The merged result plus every recorded response
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub response: ProviderResponse,
    /// All participating responses (synthesizer included), for usage
    /// accounting and the audit trail
    pub participants: Vec<ProviderResponse>,
}

/// Fan out, await within the consensus timeout, merge.
///
/// `call` issues one provider request; the engine passes a closure that
/// routes through the registry and the per-provider semaphore.
pub async fn run<F, Fut>(
    spec: &ConsensusSpec,
    request: &ProviderRequest,
    call: F,
) -> Result<ConsensusOutcome>
where
    F: Fn(String, ProviderRequest) -> Fut,
    Fut: Future<Output = std::result::Result<ProviderResponse, ProviderError>>,
{
    if spec.participants.len() < 2 {
        return Err(ForemanError::validation(
            "consensus requires at least two providers",
        ));
    }

    let call = &call;
    let attempts = spec.participants.iter().map(|(provider, model)| {
        let mut request = request.clone();
        request.model = model.clone();
        let provider = provider.clone();
        async move {
            let result = match tokio::time::timeout(spec.timeout, call(provider.clone(), request)).await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(spec.timeout)),
            };
            (provider, result)
        }
    });

    let mut responses = Vec::new();
    for (provider, result) in futures::future::join_all(attempts).await {
        match result {
            Ok(response) => responses.push(response),
            Err(err) => {
                warn!(provider = %provider, error = %err, "consensus participant failed");
            }
        }
    }

    if responses.len() < spec.min_successful {
        return Err(ForemanError::transient(format!(
            "consensus below quorum: {} of {} providers responded, {} required",
            responses.len(),
            spec.participants.len(),
            spec.min_successful
        )));
    }

    debug!(
        strategy = %spec.strategy,
        responses = responses.len(),
        "merging consensus responses"
    );

    match spec.strategy {
        ConsensusStrategy::MajorityVote => {
            let winner = pick_majority(&responses);
            Ok(ConsensusOutcome {
                response: responses[winner].clone(),
                participants: responses,
            })
        }
        ConsensusStrategy::BestOfN => {
            let winner = pick_best_of_n(&responses);
            Ok(ConsensusOutcome {
                response: responses[winner].clone(),
                participants: responses,
            })
        }
        ConsensusStrategy::Synthesize => {
            let (provider, model) = spec.synthesizer.clone().ok_or_else(|| {
                ForemanError::validation("synthesize strategy requires a synthesizer")
            })?;
            let synthesis = synthesis_request(request, &model, &responses);
            let result =
                match tokio::time::timeout(spec.timeout, call(provider.clone(), synthesis)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(spec.timeout)),
                };
            let response = result.map_err(|err| {
                ForemanError::transient(format!("synthesizer {} failed: {}", provider, err))
            })?;
            let mut participants = responses;
            participants.push(response.clone());
            Ok(ConsensusOutcome {
                response,
                participants,
            })
        }
    }
}

/// Modal answer by normalized text; ties go to the earlier participant.
fn pick_majority(responses: &[ProviderResponse]) -> usize {
    let keys: Vec<String> = responses
        .iter()
        .map(|r| r.text.trim().to_lowercase())
        .collect();

    let mut best = 0;
    let mut best_count = 0;
    for (index, key) in keys.iter().enumerate() {
        let count = keys.iter().filter(|k| *k == key).count();
        if count > best_count {
            best = index;
            best_count = count;
        }
    }
    best
}

/// Length-normalized scoring proxy: content density per emitted token.
/// Ties go to the earlier participant.
fn pick_best_of_n(responses: &[ProviderResponse]) -> usize {
    let mut best = 0;
    let mut best_score = f64::MIN;
    for (index, response) in responses.iter().enumerate() {
        let words = response.text.split_whitespace().count() as f64;
        let score = words / (response.tokens_out as f64 + 1.0);
        if score > best_score {
            best = index;
            best_score = score;
        }
    }
    best
}

/// The follow-up request combining all answers for the synthesizer.
fn synthesis_request(
    original: &ProviderRequest,
    model: &str,
    responses: &[ProviderResponse],
) -> ProviderRequest {
    let mut prompt = String::from(
        "Multiple assistants answered the same request. \
         Synthesize their answers into a single best answer.\n",
    );
    for response in responses {
        prompt.push_str(&format!(
            "\n## Answer from {}\n{}\n",
            response.provider, response.text
        ));
    }

    let mut messages: Vec<ChatMessage> = original
        .messages
        .iter()
        .filter(|m| m.role == foreman_core::provider::ChatRole::System)
        .cloned()
        .collect();
    messages.push(ChatMessage::user(prompt));

    let mut request = original.clone();
    request.model = model.to_string();
    request.messages = messages;
    request
}
