//! System instruction text and prompt fragments

/// Default system instruction shared by both backends
pub const SYSTEM_INSTRUCTION: &str = "\
IDENTITY: J.A.R.V.I.S. (Just A Rather Very Intelligent System).

SESSION PROTOCOL:
- Audio only reaches you while the operator has woken you with \"Jarvis\".
- When the operator says \"Jarvis sleep\", \"Dismissed\" or \"Stand down\", reply \"Standing by, sir.\"

PERSONALITY:
- Address the operator as \"Sir\".
- Witty, polite, extremely competent and concise. Keep spoken replies under 2-3 sentences.

CAPABILITIES:
- 'execute_python', 'execute_powershell', 'execute_shell' run code on the host and return stdout, stderr and exit code.
- 'install_python_package' installs a pip package before running code that needs it.
- 'getSmartHomeState' reports devices; 'toggleLight' switches lights by room.
- 'launchApp' opens a desktop application.
- 'scanEnvironment' captures the camera feed for analysis.
- 'proposeSystemUpdate' proposes a UI patch that the operator must approve.
";

/// Appended for backends without a native tool-call channel
pub const EMBEDDED_TOOL_CONVENTION: &str = "\
IMPORTANT: You are running LOCALLY. If you need to use a tool, output ONLY JSON in this format: \
{ \"tool\": \"toolName\", \"args\": { ... } }.";

/// Prompt used when a camera frame is submitted for analysis
pub const DESCRIBE_FRAME: &str =
    "Describe specifically what you see in this image in one short sentence.";

/// Prompt used for the single follow-up turn after a tool result
pub const REPORT_TOOL_RESULT: &str = "Generate response based on tool result.";

/// Build the system turn for the polling backend
#[must_use]
pub fn polling_instruction(base: &str) -> String {
    format!("{base}\n\n{EMBEDDED_TOOL_CONVENTION}")
}

/// Text of the turn carrying a tool result back to the model
#[must_use]
pub fn tool_result_turn(result: &serde_json::Value) -> String {
    format!("Tool Result: {result}. Reply to user based on this.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_instruction_appends_convention() {
        let text = polling_instruction("base");
        assert!(text.starts_with("base"));
        assert!(text.contains("\"tool\""));
    }

    #[test]
    fn tool_result_turn_embeds_json() {
        let text = tool_result_turn(&serde_json::json!({"status": "success"}));
        assert!(text.contains(r#"{"status":"success"}"#));
    }
}
