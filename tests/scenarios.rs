//! End-to-end scenarios driving `Broker` directly, mirroring the request/
//! response shapes the HTTP layer exposes without going through axum.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use genbroker::broker::{Broker, Mode, SubmitOutcome};
use genbroker::config::Config;
use genbroker::registry::Registry;
use serde_json::{Map, Value};

fn test_broker(stale_prompt_secs: u64, stale_worker_secs: u64) -> Arc<Broker> {
    let config = Config {
        stale_prompt_secs,
        stale_worker_secs,
        ..Config::default()
    };
    Broker::new(config, Registry::new())
}

fn params(pairs: &[(&str, i64)]) -> Map<String, Value> {
    let mut m = Map::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), Value::from(*v));
    }
    m
}

#[tokio::test]
async fn scenario_1_async_round_trip_credits_both_sides() {
    let broker = test_broker(600, 300);
    broker
        .register_user("A".into(), "a@x.com".into(), "key-a".into(), "".into())
        .unwrap();
    broker
        .register_user("op".into(), "op@x.com".into(), "key-op".into(), "".into())
        .unwrap();

    let outcome = broker
        .submit_prompt(
            "key-a",
            "hello".into(),
            HashSet::new(),
            params(&[("n", 1), ("max_length", 16)]),
            HashSet::new(),
            vec![],
            Mode::Async,
        )
        .await
        .unwrap();
    let prompt_id = match outcome {
        SubmitOutcome::Accepted(id) => id,
        SubmitOutcome::Completed(_) => panic!("async submit must not block"),
    };

    let poll = broker
        .poll_work("key-op", "W1", "M".into(), 128, 4096, HashSet::new(), String::new(), vec![])
        .unwrap();
    assert!(poll.id.is_some());
    assert_eq!(poll.prompt.as_deref(), Some("hello"));

    let reward = broker.submit_result("key-op", poll.id.unwrap(), " world".into()).unwrap();
    assert_eq!(reward, 2);

    let status = broker.query_status(prompt_id).unwrap();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.processing, 0);
    assert_eq!(status.finished, 1);
    assert_eq!(status.generations, vec![" world".to_string()]);

    let usage = broker.usage_map();
    assert_eq!(usage.get("A#1"), Some(&2));
    let contributions = broker.contributions_map();
    assert_eq!(contributions.get("op#2"), Some(&2));
}

#[tokio::test]
async fn scenario_2_sync_with_no_workers_fails_fast() {
    let broker = test_broker(600, 300);
    broker
        .register_user("A".into(), "a@x.com".into(), "key-a".into(), "".into())
        .unwrap();

    let err = broker
        .submit_prompt(
            "key-a",
            "hello".into(),
            HashSet::new(),
            params(&[]),
            HashSet::new(),
            vec![],
            Mode::Sync,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn scenario_3_per_user_cap_releases_after_completion() {
    let broker = test_broker(600, 300);
    broker
        .register_user("A".into(), "a@x.com".into(), "key-a".into(), "".into())
        .unwrap();
    broker
        .register_user("op".into(), "op@x.com".into(), "key-op".into(), "".into())
        .unwrap();

    for _ in 0..3 {
        broker
            .submit_prompt(
                "key-a",
                "hi".into(),
                HashSet::new(),
                params(&[("n", 1)]),
                HashSet::new(),
                vec![],
                Mode::Async,
            )
            .await
            .unwrap();
    }

    let err = broker
        .submit_prompt(
            "key-a",
            "hi".into(),
            HashSet::new(),
            params(&[("n", 1)]),
            HashSet::new(),
            vec![],
            Mode::Async,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);

    // Drain and complete the oldest prompt's unit, freeing a slot under the cap.
    let poll = broker
        .poll_work("key-op", "W1", "M".into(), 128, 4096, HashSet::new(), String::new(), vec![])
        .unwrap();
    broker.submit_result("key-op", poll.id.expect("a unit is queued"), "done".into()).unwrap();

    let outcome = broker
        .submit_prompt(
            "key-a",
            "hi".into(),
            HashSet::new(),
            params(&[("n", 1)]),
            HashSet::new(),
            vec![],
            Mode::Async,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted(_)));
}

#[tokio::test]
async fn scenario_4_n_three_dispatches_each_unit_exactly_once() {
    let broker = test_broker(600, 300);
    broker
        .register_user("A".into(), "a@x.com".into(), "key-a".into(), "".into())
        .unwrap();
    broker
        .register_user("op".into(), "op@x.com".into(), "key-op".into(), "".into())
        .unwrap();

    let outcome = broker
        .submit_prompt(
            "key-a",
            "hi".into(),
            HashSet::new(),
            params(&[("n", 3)]),
            HashSet::new(),
            vec![],
            Mode::Async,
        )
        .await
        .unwrap();
    let prompt_id = match outcome {
        SubmitOutcome::Accepted(id) => id,
        _ => unreachable!(),
    };

    let mut procgen_ids = Vec::new();
    for i in 0..3 {
        let worker_name = if i % 2 == 0 { "W1" } else { "W2" };
        let poll = broker
            .poll_work("key-op", worker_name, "M".into(), 128, 4096, HashSet::new(), String::new(), vec![])
            .unwrap();
        procgen_ids.push(poll.id.expect("a unit should be available"));
    }
    // all three units dispatched, none left
    let empty_poll = broker
        .poll_work("key-op", "W1", "M".into(), 128, 4096, HashSet::new(), String::new(), vec![])
        .unwrap();
    assert!(empty_poll.id.is_none());

    for (i, pg) in procgen_ids.into_iter().enumerate() {
        broker.submit_result("key-op", pg, format!("gen-{i}")).unwrap();
    }

    let status = broker.query_status(prompt_id).unwrap();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.finished, 3);
    assert_eq!(status.generations, vec!["gen-0".to_string(), "gen-1".to_string(), "gen-2".to_string()]);
}

#[tokio::test]
async fn scenario_5_abandoned_unit_expires_but_late_submit_still_credits() {
    // A one-second staleness window keeps the test fast.
    let broker = test_broker(1, 300);
    broker
        .register_user("A".into(), "a@x.com".into(), "key-a".into(), "".into())
        .unwrap();
    broker
        .register_user("op".into(), "op@x.com".into(), "key-op".into(), "".into())
        .unwrap();

    let sync_broker = broker.clone();
    let waiter = tokio::spawn(async move {
        sync_broker
            .submit_prompt(
                "key-a",
                "hi".into(),
                HashSet::new(),
                params(&[("n", 1)]),
                HashSet::new(),
                vec![],
                Mode::Sync,
            )
            .await
    });

    // Give the sync submit a moment to enqueue, then have a worker pick it up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let poll = broker
        .poll_work("key-op", "W1", "M".into(), 128, 4096, HashSet::new(), String::new(), vec![])
        .unwrap();
    let procgen_id = poll.id.expect("the only unit should be handed to W1");

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let result = waiter.await.unwrap();
    assert_eq!(result.unwrap_err().status_code(), 500);

    let reward = broker.submit_result("key-op", procgen_id, "late".into()).unwrap();
    assert!(reward > 0);
}

#[tokio::test]
async fn scenario_6_concurrent_duplicate_submit_only_one_wins() {
    let broker = test_broker(600, 300);
    broker
        .register_user("A".into(), "a@x.com".into(), "key-a".into(), "".into())
        .unwrap();
    broker
        .register_user("op".into(), "op@x.com".into(), "key-op".into(), "".into())
        .unwrap();

    let outcome = broker
        .submit_prompt(
            "key-a",
            "hi".into(),
            HashSet::new(),
            params(&[("n", 1)]),
            HashSet::new(),
            vec![],
            Mode::Async,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted(_)));

    let poll = broker
        .poll_work("key-op", "W1", "M".into(), 128, 4096, HashSet::new(), String::new(), vec![])
        .unwrap();
    let procgen_id = poll.id.unwrap();

    let b1 = broker.clone();
    let b2 = broker.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { b1.submit_result("key-op", procgen_id, "first".into()) }),
        tokio::spawn(async move { b2.submit_result("key-op", procgen_id, "second".into()) }),
    );
    let (r1, r2) = (r1.unwrap(), r2.unwrap());

    let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
    let failures = [&r1, &r2].iter().filter(|r| r.is_err()).count();
    assert_eq!(successes, 1);
    assert_eq!(failures, 1);
    let failed = if r1.is_err() { r1 } else { r2 };
    assert_eq!(failed.unwrap_err().status_code(), 400);
}

#[tokio::test]
async fn priority_usernames_are_serviced_in_given_rank_order_not_insertion_order() {
    let broker = test_broker(600, 300);
    broker
        .register_user("op".into(), "op@x.com".into(), "key-op".into(), "".into())
        .unwrap();
    broker
        .register_user("B".into(), "b@x.com".into(), "key-b".into(), "".into())
        .unwrap();
    broker
        .register_user("C".into(), "c@x.com".into(), "key-c".into(), "".into())
        .unwrap();

    // Inserted in the order C, then B - the opposite of the rank order
    // `priority_usernames` will request below.
    let c_prompt = broker
        .submit_prompt(
            "key-c",
            "from c".into(),
            HashSet::new(),
            params(&[("n", 1)]),
            HashSet::new(),
            vec![],
            Mode::Async,
        )
        .await
        .unwrap();
    let b_prompt = broker
        .submit_prompt(
            "key-b",
            "from b".into(),
            HashSet::new(),
            params(&[("n", 1)]),
            HashSet::new(),
            vec![],
            Mode::Async,
        )
        .await
        .unwrap();
    let (c_id, b_id) = match (c_prompt, b_prompt) {
        (SubmitOutcome::Accepted(c), SubmitOutcome::Accepted(b)) => (c, b),
        _ => unreachable!(),
    };

    // The polling user has no prompts of its own, so the first dispatched
    // unit must come from whichever priority user ranks first: B.
    let poll = broker
        .poll_work(
            "key-op",
            "W1",
            "M".into(),
            128,
            4096,
            HashSet::new(),
            String::new(),
            vec!["B".into(), "C".into()],
        )
        .unwrap();
    assert_eq!(poll.prompt.as_deref(), Some("from b"));

    let next = broker
        .poll_work(
            "key-op",
            "W1",
            "M".into(),
            128,
            4096,
            HashSet::new(),
            String::new(),
            vec!["B".into(), "C".into()],
        )
        .unwrap();
    assert_eq!(next.prompt.as_deref(), Some("from c"));

    // Both ended up dispatched, each exactly once.
    assert_eq!(broker.query_status(b_id).unwrap().processing, 1);
    assert_eq!(broker.query_status(c_id).unwrap().processing, 1);
}
