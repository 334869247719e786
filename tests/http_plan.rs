use std::sync::Arc;
use std::time::Duration;

use curvebot::api::{CurveClient, RelayClient};
use curvebot::execution::{MemoryEventSink, OrchestratorEvent, OrchestratorPolicy};
use curvebot::models::{HistoryStatus, Side, TradeKind};
use curvebot::persistence::{JsonFileStore, LedgerStore};
use curvebot::plan::{BotContext, Collaborators, Plan, PlanRunner, StepOutcome};
use mockito::{Matcher, Server, ServerGuard};

const PLAN: &str = r#"{
    "steps": [
        {"type": "open_long", "instrument": "PEPE", "budget": "1000000000", "adverseMovePct": 0.15},
        {"type": "close_long", "orderingKey": "start_time_desc", "closeFraction": 100}
    ]
}"#;

async fn mock_curve(server: &mut ServerGuard) {
    server
        .mock("GET", "/instruments/PEPE")
        .with_body(r#"{"id": "pepe-mint"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/instruments/pepe-mint/price")
        .with_body(r#"{"price": "1000000"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/quote/buy")
        .with_body(r#"{"endPrice": "1000420", "size": "987654"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/simulate")
        .with_body(
            r#"{"suggestedSize": "900000", "suggestedBudget": "911000000",
                "completionPct": 91.1, "slippagePct": 0.7}"#,
        )
        .create_async()
        .await;
    server
        .mock("POST", "/stop-loss")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "instrumentId": "pepe-mint",
            "side": "long",
            "size": "900000",
            "targetPrice": "850000"
        })))
        .with_body(
            r#"{"executablePrice": "852000", "prevAnchor": null, "nextAnchor": "order-77",
                "leverage": 6.7, "stopLossPercentage": 14.8,
                "tradeAmountEstimate": "900000", "iterationCount": 4}"#,
        )
        .create_async()
        .await;
}

async fn mock_relay(server: &mut ServerGuard) {
    server
        .mock("POST", "/tx/open")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "wallet": "wallet-1",
            "size": "900000",
            "maxSpendCap": "2000000000",
            "margin": "5000000000",
            "stopPrice": "852000",
            "nextAnchor": "order-77"
        })))
        .with_body(r#"{"orderRef": "order-100", "payload": "b64-open"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/tx/close")
        .match_body(Matcher::Json(serde_json::json!({
            "wallet": "wallet-1",
            "orderRef": "order-100",
            "size": "900000"
        })))
        .with_body(r#"{"orderRef": "order-100", "payload": "b64-close"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/tx/submit")
        .with_body(r#"{"signature": "sig-1"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/tx/sig-1/status")
        .with_body(r#"{"status": "confirmed", "slot": 9}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/tx/sig-1/logs")
        .with_body(r#"{"logs": ["Program log: Instruction: OpenPosition"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/balance/wallet-1")
        .with_body(r#"{"balance": "10000000000"}"#)
        .create_async()
        .await;
}

fn temp_store() -> Arc<JsonFileStore> {
    let path = std::env::temp_dir().join(format!("curvebot-e2e-{}.json", uuid::Uuid::new_v4()));
    Arc::new(JsonFileStore::new(path))
}

#[tokio::test]
async fn test_plan_over_http_open_then_close() {
    let mut curve_server = Server::new_async().await;
    let mut relay_server = Server::new_async().await;
    mock_curve(&mut curve_server).await;
    mock_relay(&mut relay_server).await;

    let curve = Arc::new(CurveClient::new(&curve_server.url(), 6_000).unwrap());
    let relay = Arc::new(
        RelayClient::new(
            &relay_server.url(),
            None,
            "wallet-1",
            6_000,
            Duration::from_secs(5),
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(10)),
    );
    let events = Arc::new(MemoryEventSink::new());
    let store = temp_store();

    let ctx = BotContext::start(
        Collaborators::new(curve, relay).with_events(events.clone()),
        OrchestratorPolicy::default(),
        Some(store.clone()),
    )
    .await
    .unwrap();

    let plan = Plan::from_json(PLAN).unwrap();
    let report = PlanRunner::new().run(&ctx, &plan).await;

    assert!(report.is_success(), "{:?}", report);
    match &report.steps[0].result {
        Ok(StepOutcome::Opened(open)) => {
            assert_eq!(open.order_ref, "order-100");
            assert_eq!(open.size, 900_000);
            assert_eq!(open.close_price, 852_000);
        }
        other => panic!("unexpected open outcome: {:?}", other),
    }
    match &report.steps[1].result {
        Ok(StepOutcome::Closed(close)) => {
            assert!(close.fully_closed);
            assert_eq!(close.realized_size, 900_000);
        }
        other => panic!("unexpected close outcome: {:?}", other),
    }

    assert!(events.events().iter().any(|e| matches!(
        e,
        OrchestratorEvent::Simulate { clamped: true, suggested_size: 900_000, .. }
    )));

    let snapshot = ctx.shutdown().await.unwrap();
    assert!(snapshot.positions.is_empty());

    let saved = store.load().await.unwrap().unwrap();
    assert!(saved.positions.is_empty());
    let kinds: Vec<_> = saved.history.iter().map(|h| h.kind).collect();
    assert_eq!(kinds, vec![TradeKind::open(Side::Long), TradeKind::close(Side::Long)]);
    assert!(saved
        .history
        .iter()
        .all(|h| h.status == HistoryStatus::Completed));

    let _ = tokio::fs::remove_file(store.path()).await;
}

#[tokio::test]
async fn test_relay_rejection_is_reported_verbatim() {
    let mut curve_server = Server::new_async().await;
    let mut relay_server = Server::new_async().await;
    mock_curve(&mut curve_server).await;
    relay_server
        .mock("GET", "/balance/wallet-1")
        .with_body(r#"{"balance": "10000000000"}"#)
        .create_async()
        .await;
    relay_server
        .mock("POST", "/tx/open")
        .with_status(400)
        .with_body("Transaction simulation failed: custom program error: 0x1771")
        .create_async()
        .await;

    let curve = Arc::new(CurveClient::new(&curve_server.url(), 6_000).unwrap());
    let relay = Arc::new(
        RelayClient::new(&relay_server.url(), None, "wallet-1", 6_000, Duration::from_secs(5))
            .unwrap(),
    );

    let ctx = BotContext::start(
        Collaborators::new(curve, relay),
        OrchestratorPolicy::default(),
        None,
    )
    .await
    .unwrap();

    let plan = Plan::from_json(PLAN).unwrap();
    let report = PlanRunner::new().run(&ctx, &plan).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped, 1);
    let err = report.steps[0].result.as_ref().unwrap_err();
    assert!(err.to_string().contains("custom program error: 0x1771"));
    assert!(err.to_string().contains("ms)"));

    let snapshot = ctx.snapshot().await;
    assert!(snapshot.positions.is_empty());
    assert_eq!(snapshot.history[0].status, HistoryStatus::Error);
}
