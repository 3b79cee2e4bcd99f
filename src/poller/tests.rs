use super::*;
use crate::auth::{Tenant, TokenManager};
use crate::config::Endpoints;
use crate::mapping::{FieldMap, RecordFlattener};
use chrono::TimeZone;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use std::collections::HashMap;

/// In-memory sink recording every published event.
#[derive(Default)]
struct MemorySink {
    events: Mutex<Vec<SinkEvent>>,
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: SinkEvent) -> anyhow::Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Sink that refuses every event.
struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn publish(&self, _event: SinkEvent) -> anyhow::Result<()> {
        anyhow::bail!("collector unavailable")
    }
}

fn started_at() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1438167001716).unwrap()
}

fn config(mode: RetrievalMode) -> PollerConfig {
    PollerConfig {
        mode,
        period_secs: 300,
        lookback_secs: 3600,
        batch_size: 2,
        ..PollerConfig::default()
    }
}

fn make_poller(server: &ServerGuard, mode: RetrievalMode, sink: Arc<dyn EventSink>) -> Poller {
    let endpoints = Endpoints::from_base(&server.url());
    let http_client = reqwest::Client::new();
    let tokens = TokenManager::new(
        http_client.clone(),
        endpoints.token_url.clone(),
        Tenant {
            customer_id: "cust-1".to_string(),
            domain_id: "dom-1".to_string(),
        },
        "O2IDtest".to_string(),
        "secret".to_string(),
    );
    let engine = RetrievalEngine::new(
        http_client,
        endpoints,
        tokens,
        RecordFlattener::new(Arc::new(FieldMap::identity())),
    )
    .with_search_clock_skew(ChronoDuration::zero());
    Poller::new(engine, sink, &config(mode), started_at())
}

async fn token_ok(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/oauth2/tokens")
        .with_status(200)
        .with_body(r#"{"access_token":"tok-1","expires_in":3600}"#)
        .create_async()
        .await
}

async fn token_rejected(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/oauth2/tokens")
        .with_status(401)
        .with_body(r#"{"error":"invalid_client"}"#)
        .create_async()
        .await
}

type Seen = Arc<std::sync::Mutex<Vec<String>>>;

/// Single export mock for every category. The first request of a category
/// gets its scripted body (or `[]`), later ones get `[]`. Returns the mock
/// and the categories requested, in order.
async fn scripted_export(
    server: &mut ServerGuard,
    scripts: &[(&'static str, &'static str)],
) -> (Mock, Seen) {
    let scripts: HashMap<&'static str, &'static str> = scripts.iter().copied().collect();
    let seen: Seen = Arc::default();
    let recorder = Arc::clone(&seen);
    let mock = server
        .mock("POST", "/sccs/v1/events/export")
        .with_status(200)
        .with_body_from_request(move |request| {
            let body: serde_json::Value = serde_json::from_slice(request.body().unwrap()).unwrap();
            let event_type = body["type"].as_str().unwrap().to_string();
            let mut seen = recorder.lock().unwrap();
            let first = !seen.contains(&event_type);
            seen.push(event_type.clone());
            match scripts.get(event_type.as_str()) {
                Some(script) if first => script.as_bytes().to_vec(),
                _ => b"[]".to_vec(),
            }
        })
        .create_async()
        .await;
    (mock, seen)
}

#[cfg(test)]
mod construction_tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_window_starts_lookback_before_start() {
        let server = Server::new_async().await;
        let poller = make_poller(&server, RetrievalMode::Export, Arc::new(MemorySink::default()));

        assert_eq!(poller.last_run(), started_at() - ChronoDuration::seconds(3600));

        let status = poller.status();
        let status = status.lock().await;
        assert_eq!(status.state, PollerState::Idle);
        assert_eq!(status.last_run, Some(poller.last_run()));
        assert_eq!(status.cycle_count, 0);
    }
}

#[cfg(test)]
mod export_cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_failure_keeps_window() {
        let mut server = Server::new_async().await;
        let _token = token_rejected(&mut server).await;
        let export = server
            .mock("POST", "/sccs/v1/events/export")
            .expect(0)
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::default());
        let mut poller = make_poller(&server, RetrievalMode::Export, sink.clone());
        let before = poller.last_run();

        let outcome = poller.run_cycle(started_at()).await;

        assert_eq!(outcome, CycleOutcome::AuthFailed);
        assert_eq!(poller.last_run(), before);
        assert!(sink.events.lock().await.is_empty());
        export.assert_async().await;

        let status = poller.status();
        let status = status.lock().await;
        assert_eq!(status.cycle_count, 1);
        assert_eq!(status.error_count, 1);
        assert!(status.last_error.as_deref().unwrap().contains("Credential exchange failed"));
    }

    #[tokio::test]
    async fn test_export_cycle_attempts_every_category() {
        let mut server = Server::new_async().await;
        let _token = token_ok(&mut server).await;
        let (_export, seen) = scripted_export(
            &mut server,
            &[
                ("FIREWALL", r#"[{"device":{"name":"d1"}},{"device":{"name":"d2"}}]"#),
                ("MALWARE PROTECTION", r#"[{"broken":"#),
            ],
        )
        .await;

        let sink = Arc::new(MemorySink::default());
        let mut poller = make_poller(&server, RetrievalMode::Export, sink.clone());
        let now = started_at();

        let outcome = poller.run_cycle(now).await;

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                published: 2,
                failed_types: vec![EventType::MalwareProtection],
            }
        );
        // Window advances despite the failed category.
        assert_eq!(poller.last_run(), now);

        // Every category attempted once, FIREWALL once more to reach its end.
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 27);
        for event_type in EventType::CATEGORIES {
            assert!(seen.iter().any(|t| t == event_type.as_str()), "{event_type} not requested");
        }
        assert!(!seen.iter().any(|t| t == "ALL"));

        let events = sink.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].fields["device.name"], "d1");
        assert_eq!(events[1].fields["device.name"], "d2");
        assert_ne!(events[0].event_id, events[1].event_id);

        let status = poller.status();
        let status = status.lock().await;
        assert_eq!(status.published, 2);
        assert_eq!(status.error_count, 1);
        assert!(status.last_error.as_deref().unwrap().contains("MALWARE PROTECTION"));
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_abort_drain() {
        let mut server = Server::new_async().await;
        let _token = token_ok(&mut server).await;
        let (_export, _seen) =
            scripted_export(&mut server, &[("FIREWALL", r#"[{"a":1},{"a":2}]"#)]).await;

        let mut poller = make_poller(&server, RetrievalMode::Export, Arc::new(FailingSink));
        let now = started_at();

        let outcome = poller.run_cycle(now).await;

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                published: 0,
                failed_types: vec![],
            }
        );
        assert_eq!(poller.last_run(), now);
    }
}

#[cfg(test)]
mod search_cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_search_cycle_advances_window() {
        let mut server = Server::new_async().await;
        let _token = token_ok(&mut server).await;
        let search = server
            .mock("POST", "/v1/event-search")
            .match_body(Matcher::PartialJson(json!({
                "start_date": "2015-07-29T09:50:01.716+00:00",
                "end_date": "2015-07-29T10:50:01.716+00:00",
                "next": 0
            })))
            .with_status(200)
            .with_body(r#"{"total":1,"next":1,"events":[{"user":{"name":"alice"}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::default());
        let mut poller = make_poller(&server, RetrievalMode::Search, sink.clone());
        let now = started_at();

        let outcome = poller.run_cycle(now).await;

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                published: 1,
                failed_types: vec![],
            }
        );
        assert_eq!(poller.last_run(), now);
        assert_eq!(sink.events.lock().await[0].fields["user.name"], "alice");
        search.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_page_reply_keeps_window() {
        let mut server = Server::new_async().await;
        let _token = token_ok(&mut server).await;
        let _search = server
            .mock("POST", "/v1/event-search")
            .with_status(200)
            .with_body(r#"{"message":"rate limit exceeded, retry later"}"#)
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::default());
        let mut poller = make_poller(&server, RetrievalMode::Search, sink.clone());
        let before = poller.last_run();

        let outcome = poller.run_cycle(started_at() + ChronoDuration::seconds(60)).await;

        assert_eq!(outcome, CycleOutcome::SearchFailed { published: 0 });
        assert_eq!(poller.last_run(), before);
        assert!(sink.events.lock().await.is_empty());

        let status = poller.status();
        let status = status.lock().await;
        assert!(status.last_error.as_deref().unwrap().contains("malformed response"));
    }

    #[tokio::test]
    async fn test_search_failure_keeps_window() {
        let mut server = Server::new_async().await;
        let _token = token_ok(&mut server).await;
        let _search = server
            .mock("POST", "/v1/event-search")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::default());
        let mut poller = make_poller(&server, RetrievalMode::Search, sink.clone());
        let before = poller.last_run();

        let outcome = poller.run_cycle(started_at()).await;

        // Unlike export mode, a failed search does not advance the window.
        assert_eq!(outcome, CycleOutcome::SearchFailed { published: 0 });
        assert_eq!(poller.last_run(), before);
    }

    #[tokio::test]
    async fn test_retry_after_auth_failure_covers_same_start() {
        let mut server = Server::new_async().await;
        let rejected = token_rejected(&mut server).await;

        let sink = Arc::new(MemorySink::default());
        let mut poller = make_poller(&server, RetrievalMode::Search, sink.clone());
        let first_tick = started_at();
        assert_eq!(poller.run_cycle(first_tick).await, CycleOutcome::AuthFailed);

        rejected.remove_async().await;
        let _token = token_ok(&mut server).await;
        let second_tick = first_tick + ChronoDuration::seconds(300);
        let search = server
            .mock("POST", "/v1/event-search")
            .match_body(Matcher::PartialJson(json!({
                "start_date": "2015-07-29T09:50:01.716+00:00",
                "end_date": "2015-07-29T10:55:01.716+00:00"
            })))
            .with_status(200)
            .with_body(r#"{"total":0,"next":0,"events":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let outcome = poller.run_cycle(second_tick).await;

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                published: 0,
                failed_types: vec![],
            }
        );
        assert_eq!(poller.last_run(), second_tick);
        search.assert_async().await;

        let status = poller.status();
        let status = status.lock().await;
        assert_eq!(status.cycle_count, 2);
        assert!(status.last_error.is_none());
    }
}

#[cfg(test)]
mod run_loop_tests {
    use super::*;

    #[tokio::test]
    async fn test_stops_on_shutdown_before_first_tick() {
        let server = Server::new_async().await;
        let poller = make_poller(&server, RetrievalMode::Export, Arc::new(MemorySink::default()));
        let status = poller.status();

        let (tx, rx) = watch::channel(false);
        let handle = poller.start(rx);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert_eq!(status.lock().await.cycle_count, 0);
    }

    #[tokio::test]
    async fn test_stops_when_sender_dropped() {
        let server = Server::new_async().await;
        let poller = make_poller(&server, RetrievalMode::Search, Arc::new(MemorySink::default()));

        let (tx, rx) = watch::channel(false);
        let handle = poller.start(rx);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }

    #[test]
    fn test_outcome_published() {
        assert_eq!(CycleOutcome::AuthFailed.published(), 0);
        assert_eq!(CycleOutcome::SearchFailed { published: 3 }.published(), 3);
        assert_eq!(
            CycleOutcome::Completed {
                published: 7,
                failed_types: vec![EventType::Firewall],
            }
            .published(),
            7
        );
    }
}
