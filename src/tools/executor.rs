//! Tool executor: routes tool calls to host commands, devices and the
//! operator-facing update queue

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::devices::DeviceRegistry;
use super::host::{CommandOutput, HostCommandBridge};
use super::updates::{PendingUpdate, RiskLevel, UpdateQueue};
use crate::{Error, Result};

/// Status field of a tool outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
    PendingAuth,
}

/// Result of one tool call, serialized flat as `{ "status": …, …payload }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: OutcomeStatus,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ToolOutcome {
    /// Successful outcome with no payload
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            payload: Map::new(),
        }
    }

    /// Error outcome carrying a message
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            payload: Map::new(),
        }
        .with("message", message.into())
    }

    /// Outcome awaiting operator authorization
    #[must_use]
    pub fn pending_auth(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::PendingAuth,
            payload: Map::new(),
        }
        .with("message", message.into())
    }

    /// Outcome of a host command: error status on non-zero exit
    #[must_use]
    pub fn from_command(output: &CommandOutput) -> Self {
        let status = if output.succeeded() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Error
        };

        Self {
            status,
            payload: Map::new(),
        }
        .with("stdout", output.stdout.clone())
        .with("stderr", output.stderr.clone())
        .with("exit_code", output.exit_code)
    }

    /// Add a payload field
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// The `message` payload field, if any
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }

    /// Whether the status is success
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Flat JSON form
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = self.payload.clone();
        map.insert(
            "status".to_string(),
            serde_json::to_value(self.status).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }
}

/// Performs named tool calls
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `name` with `args`
    ///
    /// # Errors
    ///
    /// Returns error if the tool crashed; the bridge reports it as one
    /// error outcome
    async fn execute(&self, name: &str, args: &Value) -> Result<ToolOutcome>;
}

/// A request for the next camera frame to be analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest;

/// Link between the scan tool and whoever owns the camera
#[derive(Debug, Clone)]
pub struct VisionLink {
    available: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<ScanRequest>,
}

impl VisionLink {
    /// Create a link, initially without a camera, and its request stream
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScanRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                available: Arc::new(AtomicBool::new(false)),
                tx,
            },
            rx,
        )
    }

    /// Record whether a camera was acquired
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a camera is available
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn request(&self) -> bool {
        self.is_available() && self.tx.send(ScanRequest).is_ok()
    }
}

/// Default executor for the agent's tool catalogue
pub struct HostExecutor {
    host: Arc<dyn HostCommandBridge>,
    devices: Arc<dyn DeviceRegistry>,
    vision: Option<VisionLink>,
    updates: UpdateQueue,
}

impl HostExecutor {
    /// Create an executor over its collaborators
    #[must_use]
    pub fn new(
        host: Arc<dyn HostCommandBridge>,
        devices: Arc<dyn DeviceRegistry>,
        updates: UpdateQueue,
    ) -> Self {
        Self {
            host,
            devices,
            vision: None,
            updates,
        }
    }

    /// Attach the camera link used by `scanEnvironment`
    #[must_use]
    pub fn with_vision(mut self, vision: VisionLink) -> Self {
        self.vision = Some(vision);
        self
    }

    async fn host_command(&self, name: &str, args: &Value) -> Result<ToolOutcome> {
        let output = match name {
            "execute_python" => self.host.execute_python(required_str(args, "code")?).await?,
            "execute_powershell" => {
                self.host
                    .execute_powershell(required_str(args, "command")?)
                    .await?
            }
            "install_python_package" => {
                self.host
                    .install_python_package(required_str(args, "package")?)
                    .await?
            }
            _ => self.host.execute_shell(required_str(args, "command")?).await?,
        };

        Ok(ToolOutcome::from_command(&output))
    }
}

#[async_trait]
impl ToolExecutor for HostExecutor {
    async fn execute(&self, name: &str, args: &Value) -> Result<ToolOutcome> {
        match name {
            "execute_python" | "execute_powershell" | "install_python_package"
            | "execute_shell" => self.host_command(name, args).await,

            "launchApp" => {
                let app = required_str(args, "appName")?;
                self.host.launch_app(app).await?;
                Ok(ToolOutcome::success().with("message", format!("Application {app} launched.")))
            }

            "getSmartHomeState" => {
                let devices = serde_json::to_value(self.devices.list())?;
                Ok(ToolOutcome::success().with("devices", devices))
            }

            "toggleLight" => {
                let room = required_str(args, "room")?;
                let on = args
                    .get("state")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| Error::ToolExecution("missing boolean 'state'".to_string()))?;

                let updated = self.devices.update_lights(room, on);
                if updated > 0 {
                    Ok(ToolOutcome::success().with("message", format!("Updated {updated} devices")))
                } else {
                    Ok(ToolOutcome::error(format!("No devices found matching '{room}'")))
                }
            }

            "scanEnvironment" => match &self.vision {
                Some(vision) if vision.request() => {
                    Ok(ToolOutcome::success().with("message", "Scanning initiated..."))
                }
                _ => Ok(ToolOutcome::error("Vision offline.")),
            },

            "proposeSystemUpdate" => {
                let update = PendingUpdate {
                    description: required_str(args, "description")?.to_string(),
                    code: required_str(args, "code")?.to_string(),
                    risk_level: args
                        .get("riskLevel")
                        .cloned()
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or(RiskLevel::High),
                };
                self.updates.propose(update);
                Ok(ToolOutcome::pending_auth(
                    "User authorization requested. Waiting for manual override.",
                ))
            }

            other => {
                tracing::warn!(tool = other, "no handler for tool");
                Ok(ToolOutcome::error("Unknown tool"))
            }
        }
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::ToolExecution(format!("missing string argument '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::devices::InMemoryDeviceRegistry;
    use serde_json::json;

    struct FixedHost(CommandOutput);

    #[async_trait]
    impl HostCommandBridge for FixedHost {
        async fn execute_python(&self, _code: &str) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
        async fn execute_powershell(&self, _command: &str) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
        async fn install_python_package(&self, _package: &str) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
        async fn execute_shell(&self, _command: &str) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
        async fn launch_app(&self, _app_name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn executor(exit_code: i32) -> (HostExecutor, UpdateQueue) {
        let host = FixedHost(CommandOutput {
            stdout: "out".to_string(),
            stderr: String::new(),
            exit_code,
        });
        let updates = UpdateQueue::new();
        (
            HostExecutor::new(
                Arc::new(host),
                Arc::new(InMemoryDeviceRegistry::default()),
                updates.clone(),
            ),
            updates,
        )
    }

    #[test]
    fn outcome_serializes_flat() {
        let value = serde_json::to_value(ToolOutcome::error("nope")).unwrap();
        assert_eq!(value, json!({"status": "error", "message": "nope"}));
        assert_eq!(ToolOutcome::error("nope").to_value(), value);
    }

    #[tokio::test]
    async fn non_zero_exit_is_error_status() {
        let (exec, _) = executor(2);
        let outcome = exec
            .execute("execute_python", &json!({"code": "raise"}))
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.payload["exit_code"], 2);
        assert_eq!(outcome.payload["stdout"], "out");
    }

    #[tokio::test]
    async fn toggle_light_reports_count_or_error() {
        let (exec, _) = executor(0);
        let ok = exec
            .execute("toggleLight", &json!({"room": "lab", "state": false}))
            .await
            .unwrap();
        assert_eq!(ok.message(), Some("Updated 1 devices"));

        let missing = exec
            .execute("toggleLight", &json!({"room": "garage", "state": true}))
            .await
            .unwrap();
        assert_eq!(missing.message(), Some("No devices found matching 'garage'"));
    }

    #[tokio::test]
    async fn scan_without_camera_is_offline() {
        let (exec, _) = executor(0);
        let outcome = exec.execute("scanEnvironment", &json!({})).await.unwrap();
        assert_eq!(outcome.message(), Some("Vision offline."));

        let (vision, mut rx) = VisionLink::channel();
        vision.set_available(true);
        let exec = exec.with_vision(vision);
        let outcome = exec.execute("scanEnvironment", &json!({})).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(rx.try_recv().unwrap(), ScanRequest);
    }

    #[tokio::test]
    async fn proposal_is_queued_for_authorization() {
        let (exec, updates) = executor(0);
        let outcome = exec
            .execute(
                "proposeSystemUpdate",
                &json!({"description": "white ui", "code": "x()"}),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::PendingAuth);

        let pending = updates.pending().unwrap();
        assert_eq!(pending.description, "white ui");
        assert_eq!(pending.risk_level, RiskLevel::High);
    }
}
