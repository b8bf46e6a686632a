/// Integration tests for in-flight deduplication
/// Identical concurrent commands must share one exchange and one outcome

use apilane_shared::ApiError;
use apilane_test::{on, test_dispatcher, MockTransport, Reply};
use serde_json::json;
use tokio::task::LocalSet;

#[tokio::test(start_paused = true)]
async fn identical_concurrent_commands_share_one_exchange() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([{"u": "y"}]))]);
            let dispatcher = test_dispatcher(&transport);

            let (first, second) = tokio::join!(
                dispatcher.submit(json!({"a": "x"}), on(0)),
                dispatcher.submit(json!({"a": "x"}), on(0)),
            );

            assert_eq!(transport.request_count(), 1);
            assert_eq!(transport.bodies(), vec![Some(r#"[{"a":"x"}]"#.to_string())]);
            assert_eq!(first, Ok(json!({"u": "y"})));
            assert_eq!(second, first);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn many_identical_commands_issue_a_single_request() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([7]))]);
            let dispatcher = test_dispatcher(&transport);

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let dispatcher = dispatcher.clone();
                    tokio::task::spawn_local(async move {
                        dispatcher.submit(json!({"a": "uq", "v": 1}), on(0)).await
                    })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.await.unwrap(), Ok(json!(7)));
            }
            assert_eq!(transport.request_count(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn shared_failure_reaches_every_caller() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([-9]))]);
            let dispatcher = test_dispatcher(&transport);

            let (first, second) = tokio::join!(
                dispatcher.submit(json!({"a": "g", "n": "h"}), on(0)),
                dispatcher.submit(json!({"a": "g", "n": "h"}), on(0)),
            );

            assert_eq!(first, Err(ApiError::application(-9)));
            assert_eq!(second, first);
            assert_eq!(transport.request_count(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn opting_out_sends_every_copy() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([1, 2]))]);
            let dispatcher = test_dispatcher(&transport);

            let (first, second) = tokio::join!(
                dispatcher.submit(json!({"a": "x"}), on(0).without_dedup()),
                dispatcher.submit(json!({"a": "x"}), on(0).without_dedup()),
            );

            assert_eq!(first, Ok(json!(1)));
            assert_eq!(second, Ok(json!(2)));
            assert_eq!(transport.body_values(), vec![json!([{"a": "x"}, {"a": "x"}])]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn commands_with_caller_ids_are_never_merged() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([0, 0]))]);
            let dispatcher = test_dispatcher(&transport);

            let (first, second) = tokio::join!(
                dispatcher.submit(json!({"a": "x", "i": "c1"}), on(0)),
                dispatcher.submit(json!({"a": "x", "i": "c1"}), on(0)),
            );

            assert!(first.is_ok() && second.is_ok());
            assert_eq!(transport.body_values()[0].as_array().map(Vec::len), Some(2));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn identical_commands_on_different_channels_are_sent_separately() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([{"owner": "first"}])),
                Reply::json(json!([{"owner": "second"}])),
            ]);
            let dispatcher = test_dispatcher(&transport);
            dispatcher.set_session_id(Some("MAINSID".to_string()));
            dispatcher.set_folder_session_id(Some("FOLDER".to_string()), Some("FSID".to_string()));

            let (main, folder) = tokio::join!(
                dispatcher.submit(json!({"a": "f"}), on(0)),
                dispatcher.submit(json!({"a": "f"}), on(1)),
            );

            assert_eq!(transport.request_count(), 2);
            assert!(main.is_ok());
            assert!(folder.is_ok());
            assert_ne!(main, folder);

            let mut sessions: Vec<_> = (0..2)
                .map(|index| {
                    (
                        transport.query_param(index, "sid"),
                        transport.query_param(index, "n"),
                    )
                })
                .collect();
            sessions.sort();
            assert_eq!(
                sessions,
                vec![
                    (Some("FSID".to_string()), Some("FOLDER".to_string())),
                    (Some("MAINSID".to_string()), None),
                ]
            );
        })
        .await;
}
