//! Turns a finished run into the single text block returned to the caller.

use serde_json::Value;

use crate::cost::CostSummary;
use crate::process::InvocationResult;

/// Name used in status lines.
pub const TOOL_LABEL: &str = "Vibe";

/// Pull the assistant's reply out of `--output json` stdout.
///
/// When stdout is a JSON array, the last element with `role: "assistant"`
/// and string `content` wins.  Anything else (including parse failures)
/// falls back to the trimmed raw stdout.
pub fn extract_assistant_text(stdout: &str) -> String {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Ok(Value::Array(messages)) = serde_json::from_str::<Value>(trimmed) {
        let reply = messages.iter().rev().find_map(|msg| {
            if msg.get("role").and_then(Value::as_str) != Some("assistant") {
                return None;
            }
            msg.get("content").and_then(Value::as_str)
        });
        if let Some(text) = reply {
            return text.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// `Cost: <last> EUR | Month: <total> EUR`, four decimals.
pub fn format_cost_line(cost: &CostSummary) -> String {
    let last = cost
        .last_task_cost
        .map(|c| format!("{c:.4}"))
        .unwrap_or_else(|| "n/a".to_string());
    format!("Cost: {last} EUR | Month: {:.4} EUR", cost.monthly_total)
}

/// Render the outcome of one run.
///
/// Timeout beats exit status; a clean exit shows the reply (or stderr, or a
/// generic notice); any other exit is reported with its code.  The cost
/// line always comes last.
pub fn format_result(result: &InvocationResult, extracted: &str, cost: &CostSummary) -> String {
    let out = extracted.trim();
    let err = result.stderr.trim();
    let stdout = result.stdout.trim();
    let cost_line = format_cost_line(cost);

    let first_non_empty = [err, stdout, out]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    let text = if result.timed_out {
        format!("error: {TOOL_LABEL} timed out\n{first_non_empty}\n{cost_line}")
    } else if result.exit_code == Some(0) {
        let body = if !out.is_empty() {
            out.to_string()
        } else if !err.is_empty() {
            err.to_string()
        } else {
            format!("ok: {TOOL_LABEL} completed with no output")
        };
        format!("{body}\n{cost_line}")
    } else {
        let status = match result.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "was terminated by a signal".to_string(),
        };
        format!("error: {TOOL_LABEL} {status}\n{first_non_empty}\n{cost_line}")
    };

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: Option<i32>, stdout: &str, stderr: &str, timed_out: bool) -> InvocationResult {
        InvocationResult {
            exit_code: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out,
        }
    }

    fn cost() -> CostSummary {
        CostSummary {
            monthly_total: 1.5,
            last_task_cost: Some(0.25),
        }
    }

    #[test]
    fn extracts_last_assistant_string_message() {
        let stdout = r#"[
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": " first "},
            {"role": "assistant", "content": [{"type": "text"}]},
            {"role": "tool", "content": "x"}
        ]"#;
        assert_eq!(extract_assistant_text(stdout), "first");
    }

    #[test]
    fn extraction_falls_back_to_raw_stdout() {
        assert_eq!(extract_assistant_text("  plain text \n"), "plain text");
        assert_eq!(extract_assistant_text(r#"{"role":"assistant"}"#), r#"{"role":"assistant"}"#);
        assert_eq!(extract_assistant_text(r#"[{"role":"user","content":"u"}]"#), r#"[{"role":"user","content":"u"}]"#);
        assert_eq!(extract_assistant_text(""), "");
    }

    #[test]
    fn cost_line_formats_four_decimals() {
        assert_eq!(format_cost_line(&cost()), "Cost: 0.2500 EUR | Month: 1.5000 EUR");
        assert_eq!(
            format_cost_line(&CostSummary::default()),
            "Cost: n/a EUR | Month: 0.0000 EUR"
        );
    }

    #[test]
    fn success_with_text_hides_stderr() {
        let text = format_result(&result(Some(0), "raw", "warning!", false), "hello", &cost());
        assert_eq!(text, "hello\nCost: 0.2500 EUR | Month: 1.5000 EUR");
    }

    #[test]
    fn success_without_output_uses_notice() {
        let text = format_result(&result(Some(0), "", "", false), "", &cost());
        assert_eq!(
            text,
            "ok: Vibe completed with no output\nCost: 0.2500 EUR | Month: 1.5000 EUR"
        );
    }

    #[test]
    fn success_falls_back_to_stderr() {
        let text = format_result(&result(Some(0), "", " note ", false), "", &cost());
        assert!(text.starts_with("note\nCost:"));
    }

    #[test]
    fn timeout_takes_precedence_over_exit_code() {
        let text = format_result(&result(Some(0), "partial", "", true), "partial", &cost());
        assert_eq!(
            text,
            "error: Vibe timed out\npartial\nCost: 0.2500 EUR | Month: 1.5000 EUR"
        );
    }

    #[test]
    fn failure_prefers_stderr_then_stdout() {
        let text = format_result(&result(Some(2), "out", "bad flag", false), "out", &cost());
        assert!(text.starts_with("error: Vibe exited with code 2\nbad flag\n"));

        let text = format_result(&result(Some(1), "only stdout", "", false), "x", &cost());
        assert!(text.starts_with("error: Vibe exited with code 1\nonly stdout\n"));
    }

    #[test]
    fn signal_exit_is_reported() {
        let text = format_result(&result(None, "", "", false), "", &cost());
        assert!(text.starts_with("error: Vibe was terminated by a signal"));
    }
}
