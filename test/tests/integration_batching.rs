/// Integration tests for per-channel batching and ordering

use std::time::Duration;

use apilane_client::ChannelPhase;
use apilane_test::{on, past_batch_window, test_dispatcher, MockTransport, Reply, TEST_API_BASE};
use serde_json::json;
use tokio::{task::LocalSet, time::Instant};

#[tokio::test(start_paused = true)]
async fn commands_within_the_window_travel_together() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!(["r1", "r2", "r3"]))]);
            let dispatcher = test_dispatcher(&transport);

            let (p1, p2, p3) = tokio::join!(
                dispatcher.submit(json!({"a": "p1"}), on(0)),
                dispatcher.submit(json!({"a": "p2"}), on(0)),
                dispatcher.submit(json!({"a": "p3"}), on(0)),
            );

            assert_eq!(
                transport.bodies(),
                vec![Some(r#"[{"a":"p1"},{"a":"p2"},{"a":"p3"}]"#.to_string())]
            );
            assert_eq!(p1, Ok(json!("r1")));
            assert_eq!(p2, Ok(json!("r2")));
            assert_eq!(p3, Ok(json!("r3")));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn flush_waits_for_the_batch_window() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([0]))]);
            let dispatcher = test_dispatcher(&transport);
            let started = Instant::now();

            let result = dispatcher.submit(json!({"a": "p1"}), on(0)).await;

            assert_eq!(result, Ok(json!(0)));
            assert!(started.elapsed() >= Duration::from_millis(350));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn commands_queued_during_an_exchange_go_in_the_next_one() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::after(Duration::from_secs(1), Reply::json(json!([1]))),
                Reply::json(json!([2, 3])),
            ]);
            let dispatcher = test_dispatcher(&transport);

            let first = {
                let dispatcher = dispatcher.clone();
                tokio::task::spawn_local(async move {
                    dispatcher.submit(json!({"a": "p1"}), on(0)).await
                })
            };
            tokio::time::sleep(past_batch_window()).await;
            assert_eq!(
                dispatcher.channel_stats(0).unwrap().phase,
                ChannelPhase::AwaitingResponse
            );

            let (second, third) = tokio::join!(
                dispatcher.submit(json!({"a": "p2"}), on(0)),
                dispatcher.submit(json!({"a": "p3"}), on(0)),
            );

            assert_eq!(first.await.unwrap(), Ok(json!(1)));
            assert_eq!(second, Ok(json!(2)));
            assert_eq!(third, Ok(json!(3)));
            assert_eq!(
                transport.body_values(),
                vec![json!([{"a": "p1"}]), json!([{"a": "p2"}, {"a": "p3"}])]
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn channels_are_independent() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!(["main"])),
                Reply::json(json!(["bulk"])),
            ]);
            let dispatcher = test_dispatcher(&transport);

            let main = {
                let dispatcher = dispatcher.clone();
                tokio::task::spawn_local(async move {
                    dispatcher.submit(json!({"a": "ug"}), on(0)).await
                })
            };
            // channel 2 opens its window later, so it flushes second
            tokio::time::sleep(Duration::from_millis(100)).await;
            let bulk = dispatcher.submit(json!({"a": "f"}), on(2)).await;
            let main = main.await.unwrap();

            assert_eq!(main, Ok(json!("main")));
            assert_eq!(bulk, Ok(json!("bulk")));
            assert_eq!(transport.request_count(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn exchange_url_carries_service_and_sequence_number() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([
                Reply::json(json!([0])),
                Reply::json(json!([0])),
            ]);
            let dispatcher = test_dispatcher(&transport);

            dispatcher.submit(json!({"a": "p1"}), on(0)).await.unwrap();
            dispatcher.submit(json!({"a": "p2"}), on(0)).await.unwrap();

            let requests = transport.requests();
            let expected_prefix = format!("{}cs?id=", TEST_API_BASE);
            assert!(requests[0].url.as_str().starts_with(&expected_prefix));

            let first: u64 = transport.query_param(0, "id").unwrap().parse().unwrap();
            let second: u64 = transport.query_param(1, "id").unwrap().parse().unwrap();
            assert_eq!(second, first.wrapping_add(1));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn channel_stats_count_received_bytes() {
    LocalSet::new()
        .run_until(async {
            let transport = MockTransport::scripted([Reply::json(json!([{"f": [1, 2, 3]}]))]);
            let dispatcher = test_dispatcher(&transport);

            dispatcher.submit(json!({"a": "f"}), on(0)).await.unwrap();

            let stats = dispatcher.channel_stats(0).unwrap();
            let body_len = r#"[{"f":[1,2,3]}]"#.len() as u64;
            assert_eq!(stats.phase, ChannelPhase::Idle);
            assert_eq!(stats.received_bytes, body_len);
            assert_eq!(stats.total_bytes, Some(body_len));
            assert_eq!(stats.pending, 0);
            assert_eq!(stats.service, "cs");
        })
        .await;
}
