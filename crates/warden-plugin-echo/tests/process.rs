//! Runs the built echo binary through the gateway's process launcher.

#![cfg(target_os = "linux")]

use serde_json::json;
use warden_config::GatewayConfig;
use warden_gateway::Router;
use warden_gateway::ledger::LedgerKind;
use warden_gateway::manifest::{Entrypoint, PluginManifest};
use warden_gateway::protocol::{PluginRequest, PluginStatus, RequestPolicy};

fn router() -> Router {
    let router = Router::from_config(GatewayConfig::default()).expect("router");
    let manifest = PluginManifest::new(
        "warden.echo",
        "Echo",
        "0.1.0",
        Entrypoint::new(env!("CARGO_BIN_EXE_warden-plugin-echo"), "handle"),
    )
    .with_description("Echoes its payload")
    .with_max_ms(5000);
    router.register(manifest, "sig", true).expect("register");
    router.enable("warden.echo").expect("enable");
    router.bind_process("warden.echo").expect("bind");
    router
}

#[test]
fn built_binary_answers_through_the_sandbox() {
    let router = router();
    let payload = json!({"text": "hi"});
    let request = PluginRequest::new("run-1", "req-1", payload.clone(), RequestPolicy::new(5000));

    let response = router.invoke("warden.echo", &request);

    assert_eq!(response.status(), PluginStatus::Ok, "notes: {}", response.notes());
    assert_eq!(response.result(), &payload);
    let kinds: Vec<LedgerKind> = router
        .ledger()
        .by_request("req-1")
        .iter()
        .map(|entry| entry.kind)
        .collect();
    assert_eq!(kinds, [LedgerKind::Invoke, LedgerKind::Result]);
    assert!(router.ledger().verify_chain().valid);
}

#[test]
fn each_invocation_gets_a_fresh_process() {
    let router = router();
    for (index, payload) in [json!({}), json!([]), json!("text")].into_iter().enumerate() {
        let request = PluginRequest::new(
            "run-2",
            format!("req-{index}"),
            payload.clone(),
            RequestPolicy::new(5000),
        );
        let response = router.invoke("warden.echo", &request);
        assert_eq!(response.status(), PluginStatus::Ok, "notes: {}", response.notes());
        assert_eq!(response.result(), &payload);
    }
    assert_eq!(router.export_proof("run-2").events.len(), 6);
}
