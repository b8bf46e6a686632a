/// Integration tests for custom channels registered beyond the built-in table

use apilane_client::{ChannelPhase, ChannelSpec};
use apilane_shared::{ApiError, SessionScope};
use apilane_test::{on, test_dispatcher, MockTransport, Reply, TEST_API_BASE};
use serde_json::json;
use tokio::task::LocalSet;

#[tokio::test(start_paused = true)]
async fn custom_channel_gets_the_next_index_and_works() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([1]))]);
            let dispatcher = test_dispatcher(&transport);
            dispatcher.set_session_id(Some("S1".to_string()));

            let index = dispatcher.register_custom_channel(ChannelSpec::new("cs", SessionScope::Main));
            assert_eq!(index, 6);
            assert_eq!(dispatcher.channel_count(), 7);

            let result = dispatcher.submit(json!({"a": "f"}), on(index)).await;
            assert_eq!(result, Ok(json!(1)));
            assert!(transport.requests()[0]
                .url
                .as_str()
                .starts_with(&format!("{}cs?", TEST_API_BASE)));
            assert_eq!(transport.query_param(0, "sid"), Some("S1".to_string()));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn removed_channel_rejects_queued_work_and_disappears() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::new();
            let dispatcher = test_dispatcher(&transport);
            let index =
                dispatcher.register_custom_channel(ChannelSpec::new("dl", SessionScope::Anonymous));

            let queued = {
                let dispatcher = dispatcher.clone();
                tokio::task::spawn_local(async move {
                    dispatcher.submit(json!({"a": "g"}), on(index)).await
                })
            };
            tokio::task::yield_now().await;
            assert_eq!(dispatcher.channel_stats(index).unwrap().phase, ChannelPhase::Scheduled);

            dispatcher.remove_custom_channel(index).unwrap();

            assert_eq!(queued.await.unwrap(), Err(ApiError::Cancelled));
            assert_eq!(
                dispatcher.channel_stats(index),
                Err(ApiError::UnknownChannel { index })
            );
            assert_eq!(
                dispatcher.remove_custom_channel(index),
                Err(ApiError::UnknownChannel { index })
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn built_in_channels_cannot_be_removed() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::new();
            let dispatcher = test_dispatcher(&transport);

            assert!(matches!(
                dispatcher.remove_custom_channel(0),
                Err(ApiError::Invariant { .. })
            ));
            assert!(dispatcher.channel_stats(0).is_ok());
        })
        .await;
}
