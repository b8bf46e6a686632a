/// Integration tests for unrecoverable responses
/// A body that cannot be trusted fails the exchange and asks for a reload

use apilane_shared::ApiError;
use apilane_test::{on, test_dispatcher, MockTransport, Reply};
use serde_json::json;
use tokio::task::LocalSet;

#[tokio::test(start_paused = true)]
async fn syntax_error_requests_a_reload() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();

    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::Bytes(b"[{\"a\":".to_vec())]);
            let dispatcher = test_dispatcher(&transport);
            assert!(!dispatcher.reload_requested());

            let result = dispatcher.submit(json!({"a": "ug"}), on(0)).await;

            assert!(matches!(result, Err(ApiError::Malformed { .. })));
            assert!(dispatcher.reload_requested());
            assert_eq!(transport.request_count(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn result_count_mismatch_is_malformed() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([1, 2]))]);
            let dispatcher = test_dispatcher(&transport);

            let result = dispatcher.submit(json!({"a": "ug"}), on(0)).await;

            assert!(matches!(result, Err(ApiError::Malformed { .. })));
            assert!(dispatcher.reload_requested());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn channel_keeps_working_after_a_malformed_response() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!({"not": "an array"})),
                Reply::json(json!([3])),
            ]);
            let dispatcher = test_dispatcher(&transport);

            let broken = dispatcher.submit(json!({"a": "p1"}), on(0)).await;
            let next = dispatcher.submit(json!({"a": "p2"}), on(0)).await;

            assert!(matches!(broken, Err(ApiError::Malformed { .. })));
            assert_eq!(next, Ok(json!(3)));
        })
        .await;
}
