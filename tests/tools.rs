//! Tool bridge integration tests

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use voicelink::Result;
use voicelink::tools::{
    DeviceRegistry, DeviceState, HostExecutor, InMemoryDeviceRegistry, OutcomeStatus,
    ProcessBridge, RiskLevel, ToolBridge, ToolCallRequest, ToolExecutor, ToolOutcome, ToolStatus,
    UpdateDecision, UpdateQueue, VisionLink, builtin_tools, extract_embedded_call,
};

mod common;
use common::{CountingExecutor, wait_for, within};

/// Executor that holds every call until released
#[derive(Clone, Default)]
struct GatedExecutor {
    release: Arc<Notify>,
}

#[async_trait]
impl ToolExecutor for GatedExecutor {
    async fn execute(&self, _name: &str, _args: &Value) -> Result<ToolOutcome> {
        self.release.notified().await;
        Ok(ToolOutcome::success())
    }
}

struct Fixture {
    bridge: ToolBridge,
    registry: Arc<InMemoryDeviceRegistry>,
    updates: UpdateQueue,
    vision: VisionLink,
}

fn fixture() -> Fixture {
    let registry = Arc::new(InMemoryDeviceRegistry::default());
    let updates = UpdateQueue::new();
    let (vision, _scans) = VisionLink::channel();
    let executor = HostExecutor::new(
        Arc::new(ProcessBridge::new()),
        registry.clone(),
        updates.clone(),
    )
    .with_vision(vision.clone());

    Fixture {
        bridge: ToolBridge::new(builtin_tools(), Arc::new(executor)),
        registry,
        updates,
        vision,
    }
}

fn request(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        args,
    }
}

#[tokio::test]
async fn test_resolve_echoes_correlation_id() {
    let fx = fixture();

    let response = fx
        .bridge
        .resolve(request("c-1", "getSmartHomeState", json!({})))
        .await;

    assert_eq!(response.id, "c-1");
    assert_eq!(response.name, "getSmartHomeState");
    assert_eq!(response.response["result"]["status"], "success");
    assert_eq!(
        response.response["result"]["devices"].as_array().unwrap().len(),
        3
    );

    assert!(fx.bridge.invocation("c-1").is_none());
    assert_eq!(fx.bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_invocation_tracked_only_while_in_flight() {
    let executor = GatedExecutor::default();
    let bridge = Arc::new(ToolBridge::new(builtin_tools(), Arc::new(executor.clone())));

    let in_flight = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move {
            bridge
                .resolve(request("c-7", "toggleLight", json!({"room": "lab", "state": true})))
                .await
        }
    });

    assert!(wait_for(|| bridge.pending_count() == 1).await);
    let invocation = bridge.invocation("c-7").unwrap();
    assert_eq!(invocation.status, ToolStatus::Pending);
    assert_eq!(invocation.tool_name, "toggleLight");
    assert_eq!(invocation.arguments["room"], "lab");

    executor.release.notify_one();
    let response = within(in_flight).await.unwrap();

    assert_eq!(response.id, "c-7");
    assert!(bridge.invocation("c-7").is_none());
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_resolved_calls_are_not_retained() {
    let fx = fixture();

    for i in 0..50 {
        fx.bridge
            .resolve(request(&format!("c{i}"), "getSmartHomeState", json!({})))
            .await;
    }

    assert_eq!(fx.bridge.pending_count(), 0);
    assert!(fx.bridge.invocation("c0").is_none());
}

#[tokio::test]
async fn test_unknown_tool_never_reaches_executor() {
    let executor = CountingExecutor::default();
    let bridge = ToolBridge::new(builtin_tools(), Arc::new(executor.clone()));

    let outcome = bridge.dispatch("rm_rf", &json!({})).await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.message(), Some("Unknown tool"));
    assert_eq!(executor.calls(), 0);

    bridge.dispatch("getSmartHomeState", &json!({})).await;
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_malformed_arguments_are_reported_not_raised() {
    let fx = fixture();

    let outcome = fx
        .bridge
        .dispatch("toggleLight", &json!({"room": "lab"}))
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.message().unwrap().contains("state"));
    assert_eq!(
        fx.registry.list()[0].state,
        DeviceState::Switch(true),
        "registry must be untouched"
    );
}

#[tokio::test]
async fn test_embedded_call_round_trip() {
    let fx = fixture();
    let reply = r#"Right away, sir. {"tool": "toggleLight", "args": {"room": "Lab", "state": false}}"#;

    let call = extract_embedded_call(reply).unwrap();
    let outcome = fx
        .bridge
        .dispatch(&call.tool, &serde_json::Value::Object(call.args))
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.message(), Some("Updated 1 devices"));
    assert_eq!(fx.registry.list()[0].state, DeviceState::Switch(false));
}

#[test]
fn test_prose_around_embedded_call_is_ignored() {
    let reply = r#"Sure! {"tool":"toggleLight","args":{"room":"lab","state":true}} done"#;

    let call = extract_embedded_call(reply).unwrap();

    assert_eq!(call.tool, "toggleLight");
    assert_eq!(
        serde_json::Value::Object(call.args),
        json!({"room": "lab", "state": true})
    );
}

#[tokio::test]
async fn test_update_proposal_waits_for_operator() {
    let fx = fixture();

    let outcome = fx
        .bridge
        .dispatch(
            "proposeSystemUpdate",
            &json!({"description": "Dark theme", "code": "body { background: #000 }"}),
        )
        .await;

    assert_eq!(outcome.status, OutcomeStatus::PendingAuth);
    let pending = fx.updates.pending().unwrap();
    assert_eq!(pending.description, "Dark theme");
    assert_eq!(pending.risk_level, RiskLevel::High);

    let decided = fx.updates.decide(UpdateDecision::Rejected).unwrap();
    assert_eq!(decided.description, "Dark theme");
    assert!(fx.updates.pending().is_none());
}

#[tokio::test]
async fn test_scan_follows_camera_availability() {
    let fx = fixture();

    let offline = fx.bridge.dispatch("scanEnvironment", &json!({})).await;
    assert_eq!(offline.message(), Some("Vision offline."));

    fx.vision.set_available(true);
    // The receiver was dropped with the fixture's channel half
    let dropped = fx.bridge.dispatch("scanEnvironment", &json!({})).await;
    assert_eq!(dropped.status, OutcomeStatus::Error);
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_output_is_returned() {
    let fx = fixture();

    let response = fx
        .bridge
        .resolve(request(
            "sh-1",
            "execute_shell",
            json!({"command": "echo voicelink"}),
        ))
        .await;

    let result = &response.response["result"];
    assert_eq!(result["status"], "success");
    assert!(result["stdout"].as_str().unwrap().contains("voicelink"));
}
