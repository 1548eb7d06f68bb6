//! Tool catalogue, execution and the model-facing call bridge

pub mod bridge;
pub mod declarations;
pub mod devices;
pub mod executor;
pub mod host;
pub mod updates;

pub use bridge::{
    EmbeddedToolCall, ToolBridge, ToolCallRequest, ToolCallResponse, ToolInvocation, ToolStatus,
    extract_embedded_call, follow_up_prompt,
};
pub use declarations::{ToolDeclaration, builtin_tools};
pub use devices::{DeviceKind, DeviceRegistry, DeviceState, InMemoryDeviceRegistry, SmartDevice};
pub use executor::{
    HostExecutor, OutcomeStatus, ScanRequest, ToolExecutor, ToolOutcome, VisionLink,
};
pub use host::{CommandOutput, HostCommandBridge, ProcessBridge};
pub use updates::{PendingUpdate, RiskLevel, UpdateDecision, UpdateQueue};
