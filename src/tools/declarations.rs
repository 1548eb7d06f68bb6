//! Tool catalogue advertised to the model

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the arguments
    pub parameters: Value,
}

impl ToolDeclaration {
    fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

fn string_param(name: &str, description: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        name.to_string(),
        json!({ "type": "STRING", "description": description }),
    );
    json!({ "type": "OBJECT", "properties": properties, "required": [name] })
}

fn no_params() -> Value {
    json!({ "type": "OBJECT", "properties": {} })
}

/// The full set of tools the agent exposes
#[must_use]
pub fn builtin_tools() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration::new(
            "execute_python",
            "Execute Python code to solve complex tasks. Can do calculations, data analysis, \
             file processing, API calls, etc. Returns stdout, stderr, and exit code.",
            string_param(
                "code",
                "The Python code to execute. Can be multi-line. Use print() for output.",
            ),
        ),
        ToolDeclaration::new(
            "execute_powershell",
            "Execute PowerShell commands for Windows system operations. Good for file \
             management, system info, process control.",
            string_param("command", "The PowerShell command to execute."),
        ),
        ToolDeclaration::new(
            "install_python_package",
            "Install a Python package using pip. Use this before executing Python code that \
             requires external libraries.",
            string_param(
                "package",
                "The pip package name to install (e.g., 'pandas', 'requests').",
            ),
        ),
        ToolDeclaration::new(
            "execute_shell",
            "Execute a shell command. Cross-platform but use with caution. Prefer \
             execute_powershell for Windows-specific tasks.",
            string_param("command", "The shell command to execute."),
        ),
        ToolDeclaration::new(
            "getSmartHomeState",
            "Get the current status of all smart home devices (lights, locks, thermostats).",
            no_params(),
        ),
        ToolDeclaration::new(
            "toggleLight",
            "Turn a specific smart light on or off.",
            json!({
                "type": "OBJECT",
                "properties": {
                    "room": { "type": "STRING" },
                    "state": { "type": "BOOLEAN" }
                },
                "required": ["room", "state"]
            }),
        ),
        ToolDeclaration::new(
            "launchApp",
            "Launches a desktop application on the host machine. Use common names like \
             'calculator', 'spotify', 'notepad', 'chrome'.",
            string_param("appName", "The name of the application to launch."),
        ),
        ToolDeclaration::new(
            "scanEnvironment",
            "Triggers a visual scan of the current camera feed.",
            no_params(),
        ),
        ToolDeclaration::new(
            "proposeSystemUpdate",
            "Propose a code modification or new feature. Use this when the user asks to \
             change how the system behaves, looks, or calculates things.",
            json!({
                "type": "OBJECT",
                "properties": {
                    "description": {
                        "type": "STRING",
                        "description": "Short description of what the code does"
                    },
                    "code": {
                        "type": "STRING",
                        "description": "The code to run in the sandbox."
                    },
                    "riskLevel": { "type": "STRING", "enum": ["LOW", "HIGH"] }
                },
                "required": ["description", "code", "riskLevel"]
            }),
        ),
    ]
}
