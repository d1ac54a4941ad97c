//! End-to-end device scenarios driven in-process through the assembled
//! gateway, without sockets.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use evcs_gateway::application::events::EventSubscriber;
use evcs_gateway::application::session::{Outbound, OutboundReceiver, Session};
use evcs_gateway::config::AppConfig;
use evcs_gateway::domain::{ProtocolEvent, ProtocolType, SessionStatus};
use evcs_gateway::infrastructure::crypto::{HmacSignatureVerifier, SignedFields};
use evcs_gateway::interfaces::http::{create_api_router, ApiState};
use evcs_gateway::server::GatewayServer;
use evcs_gateway::support::ocpp_frame::OcppFrame;

const SECRET: &str = "scenario-secret";

fn gateway() -> GatewayServer {
    let mut cfg = AppConfig::default();
    cfg.cloud_charge.app_secret = Some(SECRET.to_string());
    GatewayServer::new(cfg).unwrap()
}

fn connect(gw: &GatewayServer, device: &str) -> (Arc<Session>, OutboundReceiver) {
    let (session, rx) = Session::channel(
        device,
        ProtocolType::Ocpp,
        gw.config.session.default_heartbeat_interval,
    );
    let session = Arc::new(session);
    gw.registry.admit(session.clone()).unwrap();
    (session, rx)
}

fn boot(gw: &GatewayServer, session: &Session) -> OcppFrame {
    gw.dispatcher
        .handle_text(
            session,
            r#"[2,"boot-1","BootNotification",{"chargePointVendor":"Acme","chargePointModel":"X1"}]"#,
        )
        .expect("BootNotification is answered")
}

fn drain(subscriber: &mut EventSubscriber) -> Vec<ProtocolEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscriber.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn scenario_a_boot_authenticates_session() {
    let gw = gateway();
    let (session, _rx) = connect(&gw, "CP-1");
    assert_eq!(session.status(), SessionStatus::Connected);

    match boot(&gw, &session) {
        OcppFrame::CallResult {
            message_id,
            payload,
        } => {
            assert_eq!(message_id, "boot-1");
            assert_eq!(payload["status"], "Accepted");
            assert_eq!(payload["interval"], 300);
        }
        other => panic!("expected CallResult, got {other:?}"),
    }

    assert_eq!(session.status(), SessionStatus::Authenticated);
    assert_eq!(session.heartbeat_interval(), 300);
    assert_eq!(session.attribute("heartbeatInterval"), Some(json!(300)));
}

#[test]
fn scenario_b_heartbeat_touches_session_and_emits_once() {
    let gw = gateway();
    let (session, _rx) = connect(&gw, "CP-1");
    boot(&gw, &session);

    let mut subscriber = gw.event_bus.subscribe();
    let earlier = Utc::now() - Duration::seconds(120);
    session.set_last_active(earlier);

    let reply = gw
        .dispatcher
        .handle_text(&session, r#"[2,"hb-1","Heartbeat",{}]"#)
        .unwrap();
    match reply {
        OcppFrame::CallResult { payload, .. } => {
            let current = payload["currentTime"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(current).is_ok());
        }
        other => panic!("expected CallResult, got {other:?}"),
    }

    let stored = gw.registry.get("CP-1").unwrap();
    assert!(stored.last_active() > earlier);

    let events = drain(&mut subscriber);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ProtocolEvent::Heartbeat(e) if e.device_id == "CP-1"));
}

#[test]
fn scenario_c_silent_session_is_evicted_by_sweep() {
    let gw = gateway();
    let (session, mut rx) = connect(&gw, "CP-1");
    boot(&gw, &session);
    let interval = i64::from(session.heartbeat_interval());

    // Right at the 3x boundary the session survives.
    let now = Utc::now();
    session.set_last_active(now - Duration::seconds(interval * 3));
    assert!(gw.registry.check_heartbeats_at(now).is_empty());
    assert!(gw.registry.contains("CP-1"));

    session.set_last_active(now - Duration::seconds(interval * 3 + 1));
    assert_eq!(gw.registry.check_heartbeats_at(now), vec!["CP-1".to_string()]);
    assert!(!gw.registry.contains("CP-1"));
    assert_eq!(session.status(), SessionStatus::Error);
    assert!(matches!(rx.try_recv(), Ok(Outbound::Close(_))));

    let reply = gw
        .dispatcher
        .handle_text(&session, r#"[2,"hb-2","Heartbeat",{}]"#);
    assert!(reply.is_none());
}

#[test]
fn scenario_d_second_connection_replaces_first() {
    let gw = gateway();
    let (first, mut first_rx) = connect(&gw, "CP-2");
    let (second, _second_rx) = connect(&gw, "CP-2");

    assert!(matches!(first_rx.try_recv(), Ok(Outbound::Close(_))));
    assert!(!first.is_live());
    assert_eq!(gw.registry.count(), 1);
    assert!(Arc::ptr_eq(&gw.registry.get("CP-2").unwrap(), &second));
}

#[tokio::test]
async fn scenario_e_signed_start_emits_one_start_ack() {
    let gw = gateway();
    let mut subscriber = gw.event_bus.subscribe();
    let app = create_api_router(ApiState::new(
        gw.manager.clone(),
        gw.registry.clone(),
        gw.verifier.clone(),
    ));

    let timestamp = Utc::now().to_rfc3339();
    let data: Map<String, Value> = Map::new();
    let signature = HmacSignatureVerifier::new(SECRET, 300)
        .sign(&SignedFields {
            request_id: "req-e",
            api_version: "3.0",
            timestamp: &timestamp,
            device_code: "CC-7",
            session_id: Some("ORDER-42"),
            action: None,
            data: Some(&data),
        })
        .unwrap();

    let body = json!({
        "requestId": "req-e",
        "apiVersion": "3.0",
        "timestamp": timestamp,
        "signature": signature,
        "deviceCode": "CC-7",
        "sessionId": "ORDER-42",
        "data": {}
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cloudcharge/start")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let acks: Vec<_> = drain(&mut subscriber)
        .into_iter()
        .filter_map(|e| match e {
            ProtocolEvent::TransactionStartAck(ack) => Some(ack),
            _ => None,
        })
        .collect();
    assert_eq!(acks.len(), 1);
    assert!(acks[0].accepted);
    assert_eq!(acks[0].device_id, "CC-7");
    assert_eq!(acks[0].session_id, "ORDER-42");
}
