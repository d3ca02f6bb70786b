mod fixture;

use std::sync::Arc;

use fixture::{body, config, shared_admission, Script, ScriptedTransport};
use streamchat::{ChatError, ExchangeStatus, SamplingParams, Session};

const OPEN_RECORD: &[u8] = b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n";

fn stalled() -> Arc<ScriptedTransport> {
    ScriptedTransport::new(vec![Script::Stalled(vec![OPEN_RECORD.to_vec()])])
}

#[tokio::test]
async fn queued_exchange_starts_once_a_slot_frees() {
    let admission = shared_admission(1, 1);
    let busy = Session::with_transport(config(), stalled(), admission.clone());
    let waiting_transport = ScriptedTransport::new(vec![Script::Body(body(&["queued reply"]))]);
    let waiting = Session::with_transport(
        config(),
        waiting_transport.clone(),
        admission.clone(),
    );

    let first = busy
        .submit("first", SamplingParams::default())
        .expect("active slot");
    let second = waiting
        .submit("second", SamplingParams::default())
        .expect("queued slot");
    assert_eq!(second.latest().status, ExchangeStatus::Queued);
    assert!(!second.latest().input_enabled);

    first.cancel();
    assert_eq!(first.finish().await.status, ExchangeStatus::Cancelled);

    let last = second.finish().await;
    assert_eq!(last.status, ExchangeStatus::Completed { http_status: 200 });
    assert_eq!(last.assistant_text(), Some("queued reply"));
    assert_eq!(waiting_transport.requests().len(), 1);
    assert_eq!(admission.active(), 0);
    assert_eq!(admission.queued(), 0);
}

#[tokio::test]
async fn full_queue_signals_limit_reached_without_touching_the_transcript() {
    let admission = shared_admission(1, 0);
    let busy = Session::with_transport(config(), stalled(), admission.clone());
    let rejected = Session::with_transport(
        config(),
        ScriptedTransport::new(Vec::new()),
        admission.clone(),
    );

    let first = busy
        .submit("first", SamplingParams::default())
        .expect("active slot");
    let error = rejected
        .submit("second", SamplingParams::default())
        .expect_err("no queue capacity");

    assert!(matches!(error, ChatError::LimitReached { queued: 0 }));
    assert!(error.to_string().contains("try again later"));
    assert!(rejected.snapshot().is_empty());
    assert!(!rejected.is_busy());
    assert_eq!(rejected.turn_counter(), 0);

    first.cancel();
    first.finish().await;
    assert!(rejected
        .submit("second", SamplingParams::default())
        .is_ok());
}

#[tokio::test]
async fn cancelling_a_queued_exchange_gives_up_its_place() {
    let admission = shared_admission(1, 1);
    let busy = Session::with_transport(config(), stalled(), admission.clone());
    let waiting = Session::with_transport(
        config(),
        ScriptedTransport::new(Vec::new()),
        admission.clone(),
    );

    let first = busy
        .submit("first", SamplingParams::default())
        .expect("active slot");
    let second = waiting
        .submit("second", SamplingParams::default())
        .expect("queued slot");

    second.cancel();
    let last = second.finish().await;
    assert_eq!(last.status, ExchangeStatus::Cancelled);
    assert_eq!(last.pairs, vec![("second".to_string(), String::new())]);
    assert_eq!(admission.queued(), 0);
    assert_eq!(admission.active(), 1);

    first.cancel();
    first.finish().await;
    assert_eq!(admission.active(), 0);
}
