//! End-to-end behaviour of an ensemble session, driven by simulated clients

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use ensemble::analysis::{AgreementLevel, SyncOutcome};
use ensemble::consensus::{ConsensusStatus, Strategy};
use ensemble::ensemble::ResponseStatus;
use ensemble::llm::{ClientMode, MockClient, ModelCatalog, ModelInfo, ProviderRegistry};
use ensemble::{Config, EnsembleError, EnsembleSession};

const PROMPT: &str = "What is the capital of France?";

fn registry(clients: Vec<MockClient>) -> ProviderRegistry {
    use ensemble::llm::ProviderClient;

    let mut registry = ProviderRegistry::new();
    for client in clients {
        registry.register(client.provider().to_string(), ClientMode::Mock, Arc::new(client));
    }
    registry
}

fn session(clients: Vec<MockClient>) -> EnsembleSession {
    EnsembleSession::with_registry(&Config::default(), registry(clients))
}

/// Summarizer that answers with whichever city most answers name
fn majority_summarizer(client: MockClient) -> MockClient {
    client.with_responder("gpt-4o-mini", |prompt, _| {
        let paris = prompt.matches("Paris").count();
        let lyon = prompt.matches("Lyon").count();
        Ok(if paris >= lyon {
            "Most answers agree: the capital of France is Paris.".to_string()
        } else {
            "Most answers agree: the capital of France is Lyon.".to_string()
        })
    })
}

#[tokio::test]
async fn identical_embeddings_agree_fully() {
    let texts = ["first", "second", "third"];
    let mut openai = MockClient::new("openai");
    for (i, text) in texts.iter().enumerate() {
        openai = openai
            .with_response(&format!("m{i}"), text)
            .with_embedding(text, vec![0.2, 0.4, -0.1, 0.7]);
    }
    let session = session(vec![openai]);
    for i in 0..texts.len() {
        session.add_model("openai", &format!("m{i}"));
    }

    session.run(PROMPT).await;
    session.refresh_agreement().await.unwrap();

    let report = session.agreement();
    let matrix = report.matrix.unwrap();
    assert_eq!(matrix.len(), 3);
    assert!(matrix.values.iter().flatten().all(|v| (v - 1.0).abs() < 1e-9));
    let stats = report.stats.unwrap();
    assert!((stats.mean - 1.0).abs() < 1e-9);
    assert!((stats.median - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn similarity_matrix_is_symmetric_with_unit_diagonal() {
    let session = session(vec![MockClient::new("openai"), MockClient::new("anthropic")]);
    session.add_model("openai", "gpt-4o");
    session.add_model("openai", "gpt-4o-mini");
    session.add_model("anthropic", "claude-3-5-haiku-20241022");
    session.add_model("anthropic", "claude-3-5-sonnet-20241022");

    session.run("Explain the water cycle in two sentences").await;
    session.refresh_agreement().await.unwrap();

    let matrix = session.agreement().matrix.unwrap();
    for i in 0..matrix.len() {
        assert_eq!(matrix.get(i, i), 1.0);
        for j in 0..matrix.len() {
            assert_eq!(matrix.get(i, j), matrix.get(j, i));
        }
    }
}

#[tokio::test]
async fn retry_resets_only_that_record() {
    let openai = MockClient::new("openai")
        .with_response("good", "A fine answer")
        .with_response("flaky", "Never finished")
        .with_failure("flaky", "connection reset");
    let session = session(vec![openai]);
    let good = session.add_model("openai", "good");
    let flaky = session.add_model("openai", "flaky");

    session.run(PROMPT).await;
    let before = session.responses();
    let good_before = before.iter().find(|r| r.model_id == good.id).unwrap().clone();
    let flaky_before = before.iter().find(|r| r.model_id == flaky.id).unwrap();
    assert_eq!(flaky_before.status(), ResponseStatus::Errored);
    assert!(!flaky_before.content.is_empty());

    session.retry(&flaky.id).unwrap();

    let after = session.responses();
    let flaky_after = after.iter().find(|r| r.model_id == flaky.id).unwrap();
    assert_eq!(flaky_after.content, "");
    assert_eq!(flaky_after.error, None);
    assert!(!flaky_after.is_complete);
    assert!(flaky_after.is_streaming);
    assert_eq!(
        after.iter().find(|r| r.model_id == good.id).unwrap(),
        &good_before
    );

    session.wait_for_responses().await;
}

#[tokio::test]
async fn one_failure_does_not_stop_siblings() {
    let session = session(vec![
        MockClient::new("openai").with_chunk_delay(Duration::from_millis(2)),
        MockClient::new("anthropic").with_failure("claude-3-5-haiku-20241022", "rate limited"),
        MockClient::new("google").with_chunk_delay(Duration::from_millis(1)),
    ]);
    session.add_model("openai", "gpt-4o");
    session.add_model("anthropic", "claude-3-5-haiku-20241022");
    session.add_model("google", "gemini-2.0-flash");

    let responses = session.run(PROMPT).await;

    let statuses: Vec<ResponseStatus> = responses.iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        vec![
            ResponseStatus::Complete,
            ResponseStatus::Errored,
            ResponseStatus::Complete
        ]
    );
    assert!(responses[1]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("rate limited")));

    // the two survivors are still enough for agreement and consensus
    session.refresh_agreement().await.unwrap();
    assert_eq!(session.agreement().matrix.unwrap().len(), 2);
    let result = session
        .generate_consensus(Strategy::Standard)
        .await
        .unwrap()
        .unwrap();
    assert!(!result.text.is_empty());
}

#[tokio::test]
async fn unregistered_provider_fails_only_its_record() {
    let session = session(vec![MockClient::new("openai")]);
    session.add_model("openai", "gpt-4o");
    session.add_model("acme", "rocket-1");

    let responses = session.run(PROMPT).await;

    assert_eq!(responses[0].status(), ResponseStatus::Complete);
    assert_eq!(responses[1].status(), ResponseStatus::Errored);
    let error = responses[1].error.as_deref().unwrap();
    assert!(error.contains("acme") && error.contains("mock"));
}

#[tokio::test]
async fn changing_embedding_provider_refetches_everything() {
    let session = session(vec![
        MockClient::new("openai"),
        MockClient::new("google"),
        MockClient::new("anthropic"),
    ]);
    session.add_model("openai", "gpt-4o");
    session.add_model("anthropic", "claude-3-5-haiku-20241022");
    session.add_model("google", "gemini-2.0-flash");
    session.run(PROMPT).await;

    session.refresh_agreement().await.unwrap();
    assert_eq!(session.embeddings().len(), 3);
    assert!(session.agreement().matrix.is_some());

    let outcome = session.set_embedding_provider("google").await.unwrap();

    assert_eq!(outcome, SyncOutcome::Updated { fetched: 3, failed: 0 });
    assert_eq!(session.agreement().provider.as_deref(), Some("google"));
    assert_eq!(session.embeddings().len(), 3);
    assert!(session.agreement().matrix.is_some());
    assert_eq!(
        session.refresh_agreement().await.unwrap(),
        SyncOutcome::Unchanged
    );
}

#[tokio::test]
async fn refresh_requested_mid_sync_is_not_lost() {
    let session = session(vec![
        MockClient::new("openai").with_embedding_delay(Duration::from_millis(300)),
        MockClient::new("google"),
        MockClient::new("anthropic")
            .with_response("claude-3-5-haiku-20241022", "The capital of France is Paris")
            .with_chunk_delay(Duration::from_millis(25)),
    ]);
    session.add_model("google", "gemini-2.0-flash");
    session.add_model("google", "gemini-1.5-pro");
    session.add_model("anthropic", "claude-3-5-haiku-20241022");
    session.submit(PROMPT);

    while session.responses().iter().filter(|r| r.is_usable()).count() < 2 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let (first, second) = tokio::join!(session.refresh_agreement(), async {
        session.wait_for_responses().await;
        session.refresh_agreement().await
    });

    assert_eq!(second.unwrap(), SyncOutcome::Skipped);
    assert_eq!(first.unwrap(), SyncOutcome::Updated { fetched: 3, failed: 0 });
    assert_eq!(session.embeddings().len(), 3);
    assert_eq!(session.agreement().matrix.unwrap().len(), 3);
}

#[tokio::test]
async fn refresh_without_changes_is_a_noop() {
    let session = session(vec![MockClient::new("openai")]);
    session.add_model("openai", "gpt-4o");
    session.add_model("openai", "gpt-4o-mini");
    session.run(PROMPT).await;

    session.refresh_agreement().await.unwrap();
    let matrix = session.agreement().matrix;

    assert_eq!(session.refresh_agreement().await.unwrap(), SyncOutcome::Unchanged);
    assert_eq!(session.agreement().matrix, matrix);
}

#[tokio::test]
async fn elo_with_top_n_equal_to_count_drops_nothing() {
    let openai = MockClient::new("openai")
        .with_response("a", "Paris")
        .with_response("b", "Paris, on the Seine")
        .with_response("c", "Lyon")
        .with_response("gpt-4o-mini", "TIE");
    let session = session(vec![openai]);
    for model in ["a", "b", "c"] {
        session.add_model("openai", model);
    }
    session.run(PROMPT).await;

    let result = session
        .generate_consensus(Strategy::Elo { top_n: 3 })
        .await
        .unwrap()
        .unwrap();

    let ranking = result.ranking.unwrap();
    assert_eq!(ranking.len(), 3);
    let mut ids: Vec<String> = ranking.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    let mut expected: Vec<String> = session.responses().iter().map(|r| r.model_id.clone()).collect();
    expected.sort();
    assert_eq!(ids, expected);
    for pair in ranking.windows(2) {
        assert!(pair[0].rating >= pair[1].rating);
    }
}

#[tokio::test]
async fn elo_top_n_out_of_range_is_a_config_error() {
    let session = session(vec![MockClient::new("openai")]);
    session.add_model("openai", "gpt-4o");
    session.add_model("openai", "o3-mini");
    session.run(PROMPT).await;

    let err = session
        .generate_consensus(Strategy::Elo { top_n: 5 })
        .await
        .unwrap_err();
    assert!(err.is_config());
    assert!(matches!(
        session.consensus_status(),
        ConsensusStatus::Failed { .. }
    ));
}

#[tokio::test]
async fn consensus_trigger_while_generating_is_ignored() {
    let openai = MockClient::new("openai").with_chunk_delay(Duration::from_millis(3));
    let session = session(vec![openai]);
    session.add_model("openai", "gpt-4o");
    session.add_model("openai", "o3-mini");
    session.run(PROMPT).await;

    let (first, second) = tokio::join!(
        session.generate_consensus(Strategy::Standard),
        session.generate_consensus(Strategy::Standard),
    );

    let produced = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(produced, 1);
    assert_eq!(session.consensus_status(), ConsensusStatus::Success);
}

#[tokio::test]
async fn near_identical_pair_outweighs_outlier() {
    let a = "The capital of France is Paris.";
    let b = "Paris is the capital of France.";
    let c = "I believe it is Lyon.";
    let openai = majority_summarizer(
        MockClient::new("openai")
            .with_response("model-a", a)
            .with_response("model-b", b)
            .with_response("model-c", c)
            .with_embedding(a, vec![1.0, 0.0, 0.0])
            .with_embedding(b, vec![0.99, 0.05, 0.0])
            .with_embedding(c, vec![0.0, 0.2, 1.0]),
    );
    let session = session(vec![openai]);
    let sa = session.add_model("openai", "model-a");
    let sb = session.add_model("openai", "model-b");
    let sc = session.add_model("openai", "model-c");

    session.run(PROMPT).await;
    session.refresh_agreement().await.unwrap();

    let report = session.agreement();
    let matrix = report.matrix.unwrap();
    let ab = matrix.between(&sa.id, &sb.id).unwrap();
    assert!(ab > 0.9);
    assert!(matrix.between(&sa.id, &sc.id).unwrap() < ab);
    assert!(matrix.between(&sb.id, &sc.id).unwrap() < ab);

    let stats = report.stats.unwrap();
    assert_eq!(AgreementLevel::from_similarity(stats.mean), AgreementLevel::Low);
    assert_eq!(report.comparisons[0].confidence, AgreementLevel::High);

    let result = session
        .generate_consensus(Strategy::Standard)
        .await
        .unwrap()
        .unwrap();
    assert!(result.text.contains("Paris"));
}

#[tokio::test]
async fn catalog_summarizer_resolves_directly() {
    let acme = MockClient::new("acme").with_response("known-model-x", "Synthesized by acme.");
    let session = EnsembleSession::with_registry(
        &Config::default(),
        registry(vec![MockClient::new("openai"), acme]),
    )
    .with_catalog(ModelCatalog::builtin().with_model(ModelInfo::chat("known-model-x", "acme", "Known X")));
    session.add_model("openai", "gpt-4o");
    session.add_model("openai", "o3-mini");
    session.run(PROMPT).await;

    session.set_summarizer(Some("known-model-x"));
    let result = session
        .generate_consensus(Strategy::Standard)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.summarizer_provider, "acme");
    assert_eq!(result.text, "Synthesized by acme.");
}

#[tokio::test]
async fn unknown_summarizer_fails_with_explicit_error() {
    let session = session(vec![MockClient::new("openai")]);
    session.add_model("openai", "gpt-4o");
    session.add_model("openai", "o3-mini");
    session.run(PROMPT).await;

    session.set_summarizer(Some("mystery-model"));
    let err = session
        .generate_consensus(Strategy::Standard)
        .await
        .unwrap_err();

    assert!(matches!(err, EnsembleError::UnresolvedProvider(_)));
    match session.consensus_status() {
        ConsensusStatus::Failed { reason } => {
            assert!(reason.contains("Cannot determine provider"))
        }
        other => panic!("unexpected status {other:?}"),
    }
}
