use super::testing::{DeliveryMode, RecordingTransport};
use super::*;
use crate::config::test_env::ScopedEnv;
use crate::config::{CollectorConfig, MetricsConfigStore, PermissionRecord, PersistedConfig};
use crate::error::{CancelError, is_cancellation};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

struct Harness {
    reporter: Reporter,
    transport: RecordingTransport,
    interrupts: ChannelInterrupts,
}

fn harness_with(mode: DeliveryMode, enabled: bool) -> Harness {
    let transport = RecordingTransport::new(mode);
    let interrupts = ChannelInterrupts::new();
    let reporter = Reporter::new(ReporterParams {
        ambient: AmbientContext {
            session_id: "s1".into(),
            os: OsInfo {
                platform: "linux".into(),
                arch: "x86_64".into(),
            },
            c3_version: "2.0.0".into(),
            is_first_usage: false,
        },
        enabled,
        delivery: DeliveryClient::with_transport(
            transport.clone().shared(),
            "d1".into(),
            Some("u1".into()),
        ),
        interrupts: Arc::new(interrupts.clone()),
    });
    Harness {
        reporter,
        transport,
        interrupts,
    }
}

fn harness() -> Harness {
    harness_with(DeliveryMode::Succeed, true)
}

fn session(project_name: &str) -> CollectOptions<SessionProps> {
    let mut args = Map::new();
    args.insert("projectName".into(), json!(project_name));
    CollectOptions {
        started_props: SessionProps { args },
    }
}

#[tokio::test(start_paused = true)]
async fn completed_session_reports_started_then_completed() {
    let h = harness();

    let result = h
        .reporter
        .collect_async_metrics(session("app"), || async {
            tokio::time::sleep(Duration::from_millis(1234)).await;
            Ok("ok")
        })
        .await
        .unwrap();
    assert_eq!(result, "ok");

    let payloads = h.transport.payloads();
    assert_eq!(payloads.len(), 2);

    assert_eq!(payloads[0].event, "c3 session started");
    assert_eq!(payloads[0].device_id, "d1");
    assert_eq!(payloads[0].user_id.as_deref(), Some("u1"));
    assert_eq!(
        Value::Object(payloads[0].properties.clone()),
        json!({
            "args": {"projectName": "app"},
            "sessionId": "s1",
            "os": {"platform": "linux", "arch": "x86_64"},
            "c3Version": "2.0.0",
            "isFirstUsage": false
        })
    );

    assert_eq!(payloads[1].event, "c3 session completed");
    let mut expected = payloads[0].properties.clone();
    expected.insert("durationMs".into(), json!(1234));
    assert_eq!(payloads[1].properties, expected);
}

#[tokio::test(start_paused = true)]
async fn completed_includes_only_completed_stage_contributions() {
    let h = harness();
    let reporter = h.reporter.clone();

    h.reporter
        .collect_async_metrics(session("app"), move || async move {
            reporter.set_event_property(TerminalStage::Completed, "template", "hello-world");
            set_event_property(TerminalStage::Errored, "failedStep", "install");
            Ok(())
        })
        .await
        .unwrap();

    let completed = &h.transport.payloads()[1];
    assert_eq!(completed.properties["template"], "hello-world");
    assert!(!completed.properties.contains_key("failedStep"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_marker_reports_cancelled_without_signal() {
    let h = harness();

    let err = h
        .reporter
        .collect_async_metrics(session("app"), || async {
            set_event_property(TerminalStage::Cancelled, "step", "framework");
            Err::<(), _>(CancelError::new().into())
        })
        .await
        .unwrap_err();
    assert!(is_cancellation(&err));
    assert_eq!(err.downcast_ref::<CancelError>(), Some(&CancelError::new()));

    let payloads = h.transport.payloads();
    assert_eq!(
        h.transport.events(),
        vec!["c3 session started", "c3 session cancelled"]
    );
    assert!(!payloads[1].properties.contains_key("signal"));
    assert_eq!(payloads[1].properties["step"], "framework");
    assert_eq!(payloads[1].properties["args"]["projectName"], "app");
    assert!(payloads[1].properties["durationMs"].is_u64());
}

#[tokio::test(start_paused = true)]
async fn interrupt_wins_race_and_late_settlement_is_discarded() {
    let h = harness();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let operation = h
        .reporter
        .collect_async_metrics(session("app"), move || async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            set_event_property(TerminalStage::Completed, "late", true);
            let _ = done_tx.send(());
            Ok("too late")
        });
    let interrupt = async {
        started_rx.await.unwrap();
        assert_eq!(h.interrupts.active_listeners(), 1);
        h.interrupts.trigger(InterruptSignal::Interrupt);
    };
    let (result, ()) = tokio::join!(operation, interrupt);

    let err = result.unwrap_err();
    assert_eq!(
        err.downcast_ref::<CancelError>(),
        Some(&CancelError::from_signal("SIGINT"))
    );
    assert_eq!(h.interrupts.active_listeners(), 0);

    release_tx.send(()).unwrap();
    done_rx.await.unwrap();
    tokio::task::yield_now().await;

    let payloads = h.transport.payloads();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[1].event, "c3 session cancelled");
    assert_eq!(payloads[1].properties["signal"], "SIGINT");
    assert!(!payloads[1].properties.contains_key("late"));
}

#[tokio::test(start_paused = true)]
async fn terminate_signal_is_named() {
    let h = harness();
    let (started_tx, started_rx) = oneshot::channel::<()>();

    let operation = h
        .reporter
        .collect_async_metrics(session("app"), move || async move {
            let _ = started_tx.send(());
            std::future::pending::<anyhow::Result<()>>().await
        });
    let interrupt = async {
        started_rx.await.unwrap();
        h.interrupts.trigger(InterruptSignal::Terminate);
    };
    let (result, ()) = tokio::join!(operation, interrupt);

    assert!(is_cancellation(&result.unwrap_err()));
    assert_eq!(h.transport.payloads()[1].properties["signal"], "SIGTERM");
}

#[tokio::test(start_paused = true)]
async fn failure_reports_errored_and_reraises() {
    let h = harness();

    let err = h
        .reporter
        .collect_async_metrics(session("app"), || async {
            set_event_property(TerminalStage::Errored, "failedStep", "install");
            tokio::time::sleep(Duration::from_millis(40)).await;
            Err::<(), _>(anyhow::anyhow!("npm install failed"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "npm install failed");

    let errored = &h.transport.payloads()[1];
    assert_eq!(errored.event, "c3 session errored");
    assert_eq!(errored.properties["error"]["message"], "npm install failed");
    assert_eq!(errored.properties["failedStep"], "install");
    assert_eq!(errored.properties["durationMs"], 40);
    assert!(!errored.properties.contains_key("signal"));
}

#[tokio::test(start_paused = true)]
async fn interrupt_raised_while_building_the_operation_is_reported() {
    let h = harness();
    let interrupts = h.interrupts.clone();

    let err = h
        .reporter
        .collect_async_metrics(session("app"), move || {
            assert_eq!(interrupts.trigger(InterruptSignal::Interrupt), 1);
            std::future::pending::<anyhow::Result<()>>()
        })
        .await
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<CancelError>(),
        Some(&CancelError::from_signal("SIGINT"))
    );
    assert_eq!(h.transport.payloads()[1].properties["signal"], "SIGINT");
    assert_eq!(h.interrupts.active_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn panic_reports_errored_and_resumes() {
    let h = harness();
    let reporter = h.reporter.clone();

    let joined = tokio::spawn(async move {
        reporter
            .collect_async_metrics(session("app"), || async {
                if true {
                    panic!("template missing");
                }
                Ok(())
            })
            .await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());
    let errored = &h.transport.payloads()[1];
    assert_eq!(errored.event, "c3 session errored");
    assert_eq!(errored.properties["error"]["message"], "template missing");
    assert_eq!(h.interrupts.active_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn listeners_are_scoped_to_each_operation() {
    let h = harness();
    let interrupts = h.interrupts.clone();

    for attempt in 0..3 {
        let interrupts = interrupts.clone();
        let _ = h
            .reporter
            .collect_async_metrics(session("app"), move || async move {
                assert_eq!(interrupts.active_listeners(), 1);
                if attempt % 2 == 0 {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("attempt {attempt} failed"))
                }
            })
            .await;
        assert_eq!(h.interrupts.active_listeners(), 0);
    }
    assert_eq!(h.transport.payloads().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn nested_prompt_keeps_its_own_properties() {
    let h = harness();
    let reporter = h.reporter.clone();

    h.reporter
        .collect_async_metrics(session("app"), move || async move {
            let answer = reporter
                .collect_async_metrics(
                    CollectOptions {
                        started_props: PromptProps {
                            key: "framework".into(),
                            config: json!({"type": "select"}),
                        },
                    },
                    || async {
                        set_event_property(TerminalStage::Completed, "answer", "astro");
                        set_event_property(TerminalStage::Completed, "isDefaultValue", false);
                        Ok("astro")
                    },
                )
                .await?;
            set_event_property(TerminalStage::Completed, "framework", answer);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(
        h.transport.events(),
        vec![
            "c3 session started",
            "c3 prompt started",
            "c3 prompt completed",
            "c3 session completed",
        ]
    );
    let payloads = h.transport.payloads();
    assert_eq!(payloads[2].properties["answer"], "astro");
    assert_eq!(payloads[2].properties["key"], "framework");
    assert_eq!(payloads[3].properties["framework"], "astro");
    assert!(!payloads[3].properties.contains_key("answer"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_operations_do_not_share_context() {
    let h = harness();

    let first = h
        .reporter
        .collect_async_metrics(session("one"), || async {
            set_event_property(TerminalStage::Completed, "who", "one");
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        });
    let second = h
        .reporter
        .collect_async_metrics(session("two"), || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            set_event_property(TerminalStage::Completed, "who", "two");
            Ok(())
        });
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    for payload in h
        .transport
        .payloads()
        .iter()
        .filter(|payload| payload.event == "c3 session completed")
    {
        assert_eq!(
            payload.properties["who"],
            payload.properties["args"]["projectName"]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn disabled_permission_sends_nothing() {
    let h = harness_with(DeliveryMode::Succeed, false);

    let value = h
        .reporter
        .collect_async_metrics(session("app"), || async { Ok(7) })
        .await
        .unwrap();
    h.reporter.send_event("c3 custom", Map::new());

    assert_eq!(value, 7);
    assert!(h.transport.payloads().is_empty());
    assert_eq!(h.reporter.pending_count(), 0);
}

#[tokio::test]
async fn settle_tolerates_failed_deliveries() {
    for mode in [DeliveryMode::Fail, DeliveryMode::Panic] {
        let h = harness_with(mode, true);
        h.reporter.send_event("c3 session started", Map::new());
        h.reporter.send_event("c3 session errored", Map::new());
        assert_eq!(h.reporter.pending_count(), 2);

        h.reporter.wait_for_all_events_settled().await;
        assert_eq!(h.reporter.pending_count(), 0);
    }
}

#[tokio::test]
async fn settle_only_covers_earlier_sends() {
    let h = harness();
    h.reporter.send_event("c3 session started", Map::new());
    h.reporter.wait_for_all_events_settled().await;

    h.reporter.send_event("c3 session completed", Map::new());
    assert_eq!(h.reporter.pending_count(), 1);
}

#[tokio::test]
async fn event_properties_override_ambient_fields() {
    let h = harness();
    let mut properties = Map::new();
    properties.insert("sessionId".into(), json!("override"));
    h.reporter.send_event("c3 custom", properties);

    assert_eq!(h.transport.payloads()[0].properties["sessionId"], "override");
    assert_eq!(h.transport.payloads()[0].properties["c3Version"], "2.0.0");
}

#[test]
fn from_store_initialises_config_on_first_use() {
    let mut env = ScopedEnv::lock();
    env.unset("C3_TELEMETRY_DISABLED");
    let dir = tempfile::TempDir::new().unwrap();
    let store = MetricsConfigStore::new(dir.path().join("metrics.json"));
    let collector = CollectorConfig {
        source_key: None,
        ..CollectorConfig::default()
    };

    let reporter = Reporter::from_store(&store, &collector);

    assert!(reporter.is_enabled());
    assert!(reporter.ambient().is_first_usage);
    let persisted = store.read();
    assert!(persisted.device_id.is_some());
    assert!(persisted.permission.unwrap().enabled);

    let again = Reporter::from_store(&store, &collector);
    assert!(!again.ambient().is_first_usage);
    assert_ne!(again.ambient().session_id, reporter.ambient().session_id);
}

#[test]
fn from_store_respects_stored_opt_out_and_kill_switch() {
    let mut env = ScopedEnv::lock();
    let dir = tempfile::TempDir::new().unwrap();
    let store = MetricsConfigStore::new(dir.path().join("metrics.json"));
    let collector = CollectorConfig::default();

    store
        .write(&PersistedConfig {
            permission: Some(PermissionRecord::new(false)),
            ..PersistedConfig::default()
        })
        .unwrap();
    env.unset("C3_TELEMETRY_DISABLED");
    assert!(!Reporter::from_store(&store, &collector).is_enabled());

    store.set_permission(true).unwrap();
    env.set("C3_TELEMETRY_DISABLED", "1");
    assert!(!Reporter::from_store(&store, &collector).is_enabled());
}

#[test]
fn send_event_outside_a_runtime_is_dropped() {
    let h = harness();

    h.reporter.send_event("c3 session started", Map::new());

    assert!(h.transport.payloads().is_empty());
    assert_eq!(h.reporter.pending_count(), 0);
}

#[test]
fn permission_gate_is_resolved_when_the_reporter_is_built() {
    let mut env = ScopedEnv::lock();
    env.unset("C3_TELEMETRY_DISABLED");
    let dir = tempfile::TempDir::new().unwrap();
    let store = MetricsConfigStore::new(dir.path().join("metrics.json"));
    let collector = CollectorConfig {
        source_key: None,
        ..CollectorConfig::default()
    };

    let reporter = Reporter::from_store(&store, &collector);
    store.set_permission(false).unwrap();

    assert!(reporter.is_enabled());
    assert!(!Reporter::from_store(&store, &collector).is_enabled());
}
