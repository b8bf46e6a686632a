/// Integration tests for the response cache

use std::time::Duration;

use apilane_client::{CacheLifetime, CachePolicy};
use apilane_test::{on, test_dispatcher, MockTransport, Reply};
use serde_json::json;
use tokio::task::LocalSet;

#[tokio::test(start_paused = true)]
async fn cached_response_is_an_independent_copy() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([{"f": [1, 2]}]))]);
            let dispatcher = test_dispatcher(&transport);
            let options = on(0).cached(CachePolicy::Seconds(60));

            let mut first = dispatcher
                .submit(json!({"a": "f", "c": 1}), options.clone())
                .await
                .unwrap();
            first["f"] = json!("mutated by caller");

            let second = dispatcher
                .submit(json!({"a": "f", "c": 1}), options)
                .await
                .unwrap();

            assert_eq!(second, json!({"f": [1, 2]}));
            assert_eq!(transport.request_count(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn expired_entry_issues_a_fresh_request() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!(["old"])),
                Reply::json(json!(["new"])),
            ]);
            let dispatcher = test_dispatcher(&transport);
            let options = on(0).cached(CachePolicy::Seconds(10));

            let first = dispatcher.submit(json!({"a": "uq"}), options.clone()).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            let cached = dispatcher.submit(json!({"a": "uq"}), options.clone()).await;
            tokio::time::sleep(Duration::from_secs(6)).await;
            let fresh = dispatcher.submit(json!({"a": "uq"}), options).await;

            assert_eq!(first, Ok(json!("old")));
            assert_eq!(cached, Ok(json!("old")));
            assert_eq!(fresh, Ok(json!("new")));
            assert_eq!(transport.request_count(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn computed_policy_decides_from_the_response() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([{"keep": false}])),
                Reply::json(json!([{"keep": true}])),
            ]);
            let dispatcher = test_dispatcher(&transport);
            let policy = CachePolicy::computed(|response| {
                if response["keep"] == json!(true) {
                    CacheLifetime::Forever
                } else {
                    CacheLifetime::Skip
                }
            });
            let options = on(0).cached(policy);

            dispatcher.submit(json!({"a": "q"}), options.clone()).await.unwrap();
            dispatcher.submit(json!({"a": "q"}), options.clone()).await.unwrap();
            let cached = dispatcher.submit(json!({"a": "q"}), options).await;

            assert_eq!(cached, Ok(json!({"keep": true})));
            assert_eq!(transport.request_count(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn purge_cache_forgets_everything() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([1])),
                Reply::json(json!([2])),
            ]);
            let dispatcher = test_dispatcher(&transport);
            let options = on(0).cached(CachePolicy::Forever);

            dispatcher.submit(json!({"a": "q"}), options.clone()).await.unwrap();
            dispatcher.purge_cache();
            let after_purge = dispatcher.submit(json!({"a": "q"}), options).await;

            assert_eq!(after_purge, Ok(json!(2)));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn errors_are_never_cached() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([-9])),
                Reply::json(json!([{"found": 1}])),
            ]);
            let dispatcher = test_dispatcher(&transport);
            let options = on(0).cached(CachePolicy::Forever);

            assert!(dispatcher.submit(json!({"a": "q"}), options.clone()).await.is_err());
            let retried = dispatcher.submit(json!({"a": "q"}), options).await;

            assert_eq!(retried, Ok(json!({"found": 1})));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn session_change_drops_cached_responses() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([{"u": "alice"}])),
                Reply::json(json!([{"u": "bob"}])),
            ]);
            let dispatcher = test_dispatcher(&transport);
            let options = on(0).cached(CachePolicy::Forever);

            dispatcher.set_session_id(Some("ALICE".to_string()));
            let alice = dispatcher.submit(json!({"a": "ug"}), options.clone()).await;
            dispatcher.set_session_id(Some("BOB".to_string()));
            dispatcher.reinit_all();
            let bob = dispatcher.submit(json!({"a": "ug"}), options).await;

            assert_eq!(alice, Ok(json!({"u": "alice"})));
            assert_eq!(bob, Ok(json!({"u": "bob"})));
            assert_eq!(transport.request_count(), 2);
            assert_eq!(transport.query_param(1, "sid"), Some("BOB".to_string()));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn reinit_drops_cached_responses_of_the_channel() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([1])),
                Reply::json(json!([2])),
            ]);
            let dispatcher = test_dispatcher(&transport);
            let options = on(0).cached(CachePolicy::Forever);

            dispatcher.submit(json!({"a": "q"}), options.clone()).await.unwrap();
            dispatcher.reinit_channel(0).unwrap();
            let after_reinit = dispatcher.submit(json!({"a": "q"}), options).await;

            assert_eq!(after_reinit, Ok(json!(2)));
            assert_eq!(transport.request_count(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn cached_responses_are_kept_per_channel() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([1])),
                Reply::json(json!([2])),
            ]);
            let dispatcher = test_dispatcher(&transport);

            dispatcher
                .submit(json!({"a": "q"}), on(0).cached(CachePolicy::Forever))
                .await
                .unwrap();
            let other_channel = dispatcher
                .submit(json!({"a": "q"}), on(2).cached(CachePolicy::Forever))
                .await;

            assert_eq!(other_channel, Ok(json!(2)));
            assert_eq!(transport.request_count(), 2);
        })
        .await;
}
