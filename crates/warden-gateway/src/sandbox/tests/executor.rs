//! Executor behaviour against inline handlers and scripted isolates.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use serde_json::json;

use crate::evidence::{content_hash, output_hash};
use crate::manifest::{Entrypoint, PluginManifest};
use crate::protocol::{PluginRequest, PluginResponse, PluginStatus, RequestPolicy};
use crate::sandbox::{
    InlineLauncher, Isolate, IsolateError, IsolateLauncher, SandboxExecutor, effective_timeout_ms,
};
use crate::worker::HandlerError;

#[fixture]
fn manifest() -> PluginManifest {
    PluginManifest::new("echo", "Echo", "1.0.0", Entrypoint::new("/bin/true", "handle"))
        .with_max_ms(1000)
}

fn request(timeout_ms: u64) -> PluginRequest {
    PluginRequest::new(
        "run-1",
        "req-1",
        json!({"text": "hi"}),
        RequestPolicy::new(timeout_ms),
    )
}

fn echo(request: PluginRequest) -> Result<PluginResponse, HandlerError> {
    Ok(PluginResponse::ok(request.payload().clone()).with_notes("echoed"))
}

/// Isolate that answers with a fixed line and counts terminations.
struct ScriptedLauncher {
    reply: Option<String>,
    launchable: bool,
    terminations: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_owned()),
            launchable: true,
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn silent() -> Self {
        Self {
            reply: None,
            launchable: true,
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn unlaunchable() -> Self {
        Self {
            reply: None,
            launchable: false,
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

struct ScriptedIsolate {
    reply: Option<String>,
    terminations: Arc<AtomicUsize>,
}

impl IsolateLauncher for ScriptedLauncher {
    fn launch(&self, _manifest: &PluginManifest) -> Result<Box<dyn Isolate>, IsolateError> {
        if !self.launchable {
            return Err(IsolateError::Launch {
                message: "/opt/plugins/echo: permission denied".into(),
            });
        }
        Ok(Box::new(ScriptedIsolate {
            reply: self.reply.clone(),
            terminations: Arc::clone(&self.terminations),
        }))
    }

    fn is_isolated(&self) -> bool {
        true
    }
}

impl Isolate for ScriptedIsolate {
    fn send(&mut self, _line: &str) -> Result<(), IsolateError> {
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<String, IsolateError> {
        self.reply.clone().ok_or(IsolateError::Elapsed)
    }

    fn terminate(&mut self) -> Result<(), IsolateError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[rstest]
fn inline_echo_is_stamped_by_the_gateway(manifest: PluginManifest) {
    let response =
        SandboxExecutor.execute(&manifest, &request(1000), &InlineLauncher::new(echo));

    assert_eq!(response.status(), PluginStatus::Ok);
    assert_eq!(response.request_id(), "req-1");
    assert_eq!(response.plugin_id(), "echo");
    assert_eq!(response.result(), &json!({"text": "hi"}));
    assert_eq!(response.notes(), "echoed");
    assert_eq!(
        response.evidence_hashes().input_hash,
        content_hash(&json!({"text": "hi"}))
    );
    assert_eq!(
        response.evidence_hashes().output_hash,
        output_hash(&json!({"text": "hi"}))
    );
}

#[rstest]
fn handler_supplied_identifiers_are_overwritten(manifest: PluginManifest) {
    let launcher = ScriptedLauncher::replying(
        r#"{"type":"result","response":{"request_id":"forged","plugin_id":"other","status":"ok","result":1,"duration_ms":99999,"evidence_hashes":{"input_hash":"x","output_hash":"y"}}}"#,
    );
    let response = SandboxExecutor.execute(&manifest, &request(1000), &launcher);

    assert_eq!(response.request_id(), "req-1");
    assert_eq!(response.plugin_id(), "echo");
    assert!(response.duration_ms() < 99_999);
    assert_eq!(response.evidence_hashes().output_hash, output_hash(&json!(1)));
}

#[rstest]
fn slow_handler_times_out_at_the_effective_budget() {
    let manifest = PluginManifest::new("slow", "Slow", "1.0.0", Entrypoint::new("/bin/true", "handle"))
        .with_max_ms(200);
    let sleeper = |request: PluginRequest| {
        thread::sleep(Duration::from_millis(2000));
        Ok::<_, HandlerError>(PluginResponse::ok(request.payload().clone()))
    };

    let started = Instant::now();
    let response = SandboxExecutor.execute(&manifest, &request(5000), &InlineLauncher::new(sleeper));
    let waited = started.elapsed();

    assert_eq!(response.status(), PluginStatus::Timeout);
    assert_eq!(response.duration_ms(), 200);
    assert!(response.result().is_null());
    assert!(response.evidence_hashes().output_hash.is_empty());
    assert!(waited >= Duration::from_millis(190), "waited {waited:?}");
    assert!(waited < Duration::from_millis(1500), "waited {waited:?}");
}

#[rstest]
#[case::request_smaller(100, 1000, 100)]
#[case::manifest_smaller(5000, 1000, 1000)]
fn effective_timeout_is_the_minimum(
    #[case] requested: u64,
    #[case] ceiling: u64,
    #[case] expected: u64,
) {
    let manifest = PluginManifest::new("echo", "Echo", "1.0.0", Entrypoint::new("/bin/true", "run"))
        .with_max_ms(ceiling);
    assert_eq!(effective_timeout_ms(&request(requested), &manifest), expected);
}

#[rstest]
fn silent_isolate_times_out_and_is_terminated(manifest: PluginManifest) {
    let launcher = ScriptedLauncher::silent();
    let response = SandboxExecutor.execute(&manifest, &request(50), &launcher);
    assert_eq!(response.status(), PluginStatus::Timeout);
    assert_eq!(response.duration_ms(), 50);
    assert_eq!(launcher.terminations(), 1);
}

#[rstest]
fn successful_isolate_is_terminated(manifest: PluginManifest) {
    let launcher =
        ScriptedLauncher::replying(r#"{"type":"result","response":{"status":"ok","result":true}}"#);
    let response = SandboxExecutor.execute(&manifest, &request(1000), &launcher);
    assert_eq!(response.status(), PluginStatus::Ok);
    assert_eq!(launcher.terminations(), 1);
}

#[rstest]
fn handler_failure_is_a_generic_error(manifest: PluginManifest) {
    let failing = |_request: PluginRequest| -> Result<PluginResponse, HandlerError> {
        Err(HandlerError::new("token sk-secret rejected by upstream"))
    };
    let response = SandboxExecutor.execute(&manifest, &request(1000), &InlineLauncher::new(failing));
    assert_eq!(response.status(), PluginStatus::Error);
    assert_eq!(response.notes(), "plugin execution failed");
    assert!(!response.notes().contains("secret"));
}

#[rstest]
fn panicking_handler_is_an_error(manifest: PluginManifest) {
    let panicking = |_request: PluginRequest| -> Result<PluginResponse, HandlerError> {
        panic!("handler bug");
    };
    let response =
        SandboxExecutor.execute(&manifest, &request(1000), &InlineLauncher::new(panicking));
    assert_eq!(response.status(), PluginStatus::Error);
}

#[rstest]
#[case::garbage("this is not json")]
#[case::wrong_shape(r#"{"type":"log","message":"working"}"#)]
#[case::self_reported_timeout(r#"{"type":"result","response":{"status":"timeout"}}"#)]
fn protocol_violations_are_errors(manifest: PluginManifest, #[case] reply: &str) {
    let launcher = ScriptedLauncher::replying(reply);
    let response = SandboxExecutor.execute(&manifest, &request(1000), &launcher);
    assert_eq!(response.status(), PluginStatus::Error);
    assert_eq!(response.notes(), "plugin protocol violation");
    assert_eq!(launcher.terminations(), 1);
}

#[rstest]
fn launch_failure_does_not_leak_details(manifest: PluginManifest) {
    let response =
        SandboxExecutor.execute(&manifest, &request(1000), &ScriptedLauncher::unlaunchable());
    assert_eq!(response.status(), PluginStatus::Error);
    assert_eq!(response.notes(), "plugin execution failed");
    assert!(!response.notes().contains("/opt/plugins"));
    assert_eq!(
        response.evidence_hashes().input_hash,
        content_hash(&json!({"text": "hi"}))
    );
}

#[rstest]
fn handler_rejection_drops_result_and_notes(manifest: PluginManifest) {
    let launcher = ScriptedLauncher::replying(
        r#"{"type":"result","response":{"status":"rejected","result":{"partial":true},"notes":"internal: quota"}}"#,
    );
    let response = SandboxExecutor.execute(&manifest, &request(1000), &launcher);
    assert_eq!(response.status(), PluginStatus::Rejected);
    assert!(response.result().is_null());
    assert_eq!(response.notes(), "plugin rejected the request");
}

#[test]
fn inline_launcher_is_not_isolated() {
    assert!(!InlineLauncher::new(echo).is_isolated());
}
