//! Crate-level end-to-end and BDD tests.

use serde_json::json;
use warden_config::GatewayConfig;

use crate::ledger::LedgerKind;
use crate::manifest::{Entrypoint, PluginManifest};
use crate::protocol::{PluginRequest, PluginResponse, PluginStatus, RequestPolicy};
use crate::router::Router;
use crate::worker::HandlerError;

mod behaviour;

pub(crate) fn fixture_manifest(plugin_id: &str) -> PluginManifest {
    PluginManifest::new(
        plugin_id,
        "Fixture",
        "1.0.0",
        Entrypoint::new(format!("/usr/libexec/warden/{plugin_id}"), "handle"),
    )
    .with_description("behaviour fixture")
    .with_max_ms(1000)
}

#[test]
fn end_to_end_inline_round_trip() {
    let router = Router::from_config(GatewayConfig::for_tests()).expect("router");
    router
        .register(fixture_manifest("upper"), "sig", true)
        .expect("register");
    router.enable("upper").expect("enable");
    router
        .bind_inline("upper", |request: PluginRequest| -> Result<PluginResponse, HandlerError> {
            let text = request
                .payload()
                .get("text")
                .and_then(|value| value.as_str())
                .ok_or_else(|| HandlerError::new("text missing"))?;
            Ok(PluginResponse::ok(json!({"text": text.to_uppercase()})))
        })
        .expect("bind");

    let request = PluginRequest::new("run-9", "req-9", json!({"text": "hi"}), RequestPolicy::new(500));
    let response = router.invoke("upper", &request);

    assert_eq!(response.status(), PluginStatus::Ok);
    assert_eq!(response.result(), &json!({"text": "HI"}));
    let proof = router.export_proof("run-9");
    let kinds: Vec<LedgerKind> = proof.events.iter().map(|entry| entry.kind).collect();
    assert_eq!(kinds, [LedgerKind::Invoke, LedgerKind::Result]);
    assert!(proof.plugin_manifest_digests.contains_key("upper"));
    let ndjson = router.ledger().to_ndjson().expect("ndjson");
    assert_eq!(ndjson.lines().count(), router.ledger().len());
}
