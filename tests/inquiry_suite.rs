use std::{path::PathBuf, sync::Arc};

use pruefstand::{
    eval::{inquiry_suite, CaseError, EvalRunner, ExitPolicy, FixtureSet, NamedTest},
    pipeline::{process_customer_message, InquiryCategory, DEFAULT_INQUIRY_MODEL},
    providers::scripted::{ScriptedProvider, ScriptedReply},
    structured::StructuredClient,
    trace::{InMemorySink, SpanLevel, TraceRecorder},
};
use serde_json::json;

fn bundled_fixtures() -> FixtureSet {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    FixtureSet::load_dir(dir).unwrap()
}

fn reply(category: &str, response: &str) -> ScriptedReply {
    ScriptedReply::json(&json!({ "category": category, "response": response }))
}

#[tokio::test]
async fn bundled_fixtures_report_two_of_three() {
    let fixtures = bundled_fixtures();
    assert_eq!(fixtures.len(), 3);

    let provider = Arc::new(ScriptedProvider::from_replies(fixtures.recorded_replies()));
    let client = StructuredClient::new(provider.clone(), DEFAULT_INQUIRY_MODEL);
    let sink = Arc::new(InMemorySink::new());
    let recorder = TraceRecorder::new(sink.clone());
    let scope = recorder.root_scope();

    let summary = EvalRunner::new()
        .run_suite(inquiry_suite(&client, &scope, &fixtures))
        .await;

    assert_eq!(summary.passed_count, 2);
    assert_eq!(summary.total_count, 3);
    assert!(summary.to_string().ends_with("Results: 2/3 tests passed"));

    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "support_categorization");
    let reason = failed[0].failure_reason.as_deref().unwrap();
    assert!(reason.contains("Complaint") && reason.contains("Other"), "{reason}");

    assert_eq!(provider.remaining(), 0);
    assert_eq!(sink.traces().len(), 3);
    assert!(recorder.spans().is_empty());

    assert_eq!(ExitPolicy::AlwaysSucceed.exit_code(&summary), 0);
    assert_eq!(ExitPolicy::FailOnAnyFailure.exit_code(&summary), 1);
}

#[tokio::test]
async fn transport_failure_mid_suite_does_not_stop_later_tests() {
    let fixtures = bundled_fixtures();
    let provider = Arc::new(ScriptedProvider::from_replies(vec![
        reply("billing", "Your duplicate charge will be refunded."),
        ScriptedReply::Failure("connection reset by peer".to_string()),
        reply("complaint", "We're sorry about the outages."),
    ]));
    let client = StructuredClient::new(provider.clone(), DEFAULT_INQUIRY_MODEL);
    let sink = Arc::new(InMemorySink::new());
    let recorder = TraceRecorder::new(sink.clone());
    let scope = recorder.root_scope();

    let summary = EvalRunner::new()
        .run_suite(inquiry_suite(&client, &scope, &fixtures))
        .await;

    assert_eq!(summary.total_count, 3);
    assert_eq!(summary.passed_count, 2);
    let failure = &summary.results[1];
    assert_eq!(failure.name, "feature_request_categorization");
    assert!(failure
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("connection reset by peer"));
    assert_eq!(provider.requests().len(), 3);

    let errored: Vec<_> = sink
        .spans()
        .into_iter()
        .filter(|s| s.level == SpanLevel::Error)
        .collect();
    assert_eq!(errored.len(), 1);
    assert!(!errored[0].is_open());
}

#[tokio::test]
async fn classification_runs_at_temperature_zero_and_is_stable() {
    let message = "Hi, I was charged twice for my subscription this month.";
    let provider = Arc::new(ScriptedProvider::from_replies(
        (0..3).map(|_| reply("billing", "The duplicate charge will be refunded.")),
    ));
    let client = StructuredClient::new(provider.clone(), DEFAULT_INQUIRY_MODEL);
    let recorder = TraceRecorder::new(Arc::new(InMemorySink::new()));
    let scope = recorder.root_scope();

    let mut categories = Vec::new();
    for _ in 0..3 {
        let result = process_customer_message(&client, &scope, message).await.unwrap();
        categories.push(result.category);
    }

    assert!(categories.iter().all(|c| *c == InquiryCategory::Billing));
    let requests = provider.requests();
    assert!(requests.iter().all(|r| r.temperature == Some(0.0)));
    assert!(requests.iter().all(|r| r.model == DEFAULT_INQUIRY_MODEL));
    assert!(requests.iter().all(|r| r.response_format.is_some()));
}

#[tokio::test]
async fn spans_of_a_wrapped_run_nest_inside_one_root() {
    let fixtures = bundled_fixtures();
    let provider = Arc::new(ScriptedProvider::from_replies(fixtures.recorded_replies()));
    let client = StructuredClient::new(provider, DEFAULT_INQUIRY_MODEL);
    let sink = Arc::new(InMemorySink::new());
    let recorder = TraceRecorder::new(sink.clone());
    let root = recorder.root_scope();

    let summary = root
        .with_span("evaluation_run", |scope| async move {
            let summary = EvalRunner::new()
                .run_suite(inquiry_suite(&client, &scope, &fixtures))
                .await;
            Ok::<_, CaseError>(summary)
        })
        .await
        .unwrap();
    assert_eq!(summary.total_count, 3);
    assert!(sink.traces().is_empty());
    recorder.flush().await;

    let traces = sink.traces();
    assert_eq!(traces.len(), 1);
    let tree = &traces[0];
    assert_eq!(tree.len(), 4);

    let run = tree.iter().find(|s| s.is_root()).unwrap();
    assert_eq!(run.name, "evaluation_run");
    for span in tree.iter().filter(|s| !s.is_root()) {
        assert_eq!(span.name, "process_customer_message");
        assert_eq!(span.parent_id.as_ref(), Some(&run.id));
        assert_eq!(span.trace_id, run.trace_id);
        assert!(run.contains(span));
    }
}

#[tokio::test]
async fn custom_tests_mix_with_fixture_tests() {
    let fixtures = bundled_fixtures();
    let provider = Arc::new(ScriptedProvider::from_replies(fixtures.recorded_replies()));
    let client = StructuredClient::new(provider, DEFAULT_INQUIRY_MODEL);
    let recorder = TraceRecorder::new(Arc::new(InMemorySink::new()));
    let scope = recorder.root_scope();

    let mut tests = inquiry_suite(&client, &scope, &fixtures);
    tests.push(NamedTest::new("missing_fixture", || async {
        bundled_fixtures().get("refund_categorization")?;
        Ok::<(), CaseError>(())
    }));

    let summary = EvalRunner::new().run_suite(tests).await;
    assert_eq!(summary.summary_line(), "Results: 2/4 tests passed");
    assert_eq!(
        summary.results[3].failure_reason.as_deref(),
        Some("unknown fixture: refund_categorization")
    );
}
