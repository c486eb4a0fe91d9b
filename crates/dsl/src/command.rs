use autopage_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One validated step of a compiled automation script. Each variant carries
/// only the fields valid for its kind; shape is checked at construction and
/// the sequence is immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "args")]
pub enum Command {
    #[serde(rename = "goto", rename_all = "camelCase")]
    Goto {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "click", rename_all = "camelCase")]
    Click {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "fill")]
    Fill { selector: String, value: String },
    #[serde(rename = "waitForSelector", rename_all = "camelCase")]
    WaitForSelector {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "waitForNavigation", rename_all = "camelCase")]
    WaitForNavigation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "extract")]
    Extract {
        selector: String,
        #[serde(rename = "as")]
        as_name: String,
        #[serde(default)]
        multiple: bool,
    },
}

impl Command {
    /// The script-level kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Goto { .. } => "goto",
            Command::Click { .. } => "click",
            Command::Fill { .. } => "fill",
            Command::WaitForSelector { .. } => "waitForSelector",
            Command::WaitForNavigation { .. } => "waitForNavigation",
            Command::Extract { .. } => "extract",
        }
    }

    /// Backend operation name this command translates to. Args pass through
    /// unchanged ([`Command::args`]).
    pub fn operation(&self) -> &'static str {
        match self {
            Command::Goto { .. } => "open_page",
            Command::Click { .. } => "click",
            Command::Fill { .. } => "fill",
            Command::WaitForSelector { .. } => "wait_for_selector",
            Command::WaitForNavigation { .. } => "wait_for_navigation",
            Command::Extract { .. } => "extract",
        }
    }

    /// The kind-specific argument object, as sent over the wire.
    pub fn args(&self) -> Value {
        match self {
            Command::Goto { url, timeout_ms } => {
                let mut args = json!({ "url": url });
                if let Some(t) = timeout_ms {
                    args["timeoutMs"] = json!(t);
                }
                args
            }
            Command::Click {
                selector,
                timeout_ms,
            } => {
                let mut args = json!({ "selector": selector });
                if let Some(t) = timeout_ms {
                    args["timeoutMs"] = json!(t);
                }
                args
            }
            Command::Fill { selector, value } => json!({ "selector": selector, "value": value }),
            Command::WaitForSelector {
                selector,
                timeout_ms,
            } => {
                let mut args = json!({ "selector": selector });
                if let Some(t) = timeout_ms {
                    args["timeoutMs"] = json!(t);
                }
                args
            }
            Command::WaitForNavigation { timeout_ms } => match timeout_ms {
                Some(t) => json!({ "timeoutMs": t }),
                None => json!({}),
            },
            Command::Extract {
                selector,
                as_name,
                multiple,
            } => json!({ "selector": selector, "as": as_name, "multiple": multiple }),
        }
    }
}

fn required_str(args: &Value, field: &str, kind: &str) -> Result<String> {
    match args.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(Error::InvalidScript(format!(
            "{} requires a non-empty '{}'",
            kind, field
        ))),
    }
}

fn optional_timeout(args: &Value) -> Option<u64> {
    args.get("timeoutMs").and_then(|v| v.as_u64())
}

/// Build one command from a `kind` tag and its argument object, validating
/// the shape per kind.
pub fn command_from_parts(kind: &str, args: &Value) -> Result<Command> {
    match kind {
        "goto" => Ok(Command::Goto {
            url: required_str(args, "url", "goto")?,
            timeout_ms: optional_timeout(args),
        }),
        "click" => Ok(Command::Click {
            selector: required_str(args, "selector", "click")?,
            timeout_ms: optional_timeout(args),
        }),
        "fill" => {
            let selector = required_str(args, "selector", "fill")?;
            let value = match args.get("value").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => {
                    return Err(Error::InvalidScript(
                        "fill requires a string 'value'".to_string(),
                    ))
                }
            };
            Ok(Command::Fill { selector, value })
        }
        "waitForSelector" => Ok(Command::WaitForSelector {
            selector: required_str(args, "selector", "waitForSelector")?,
            timeout_ms: optional_timeout(args),
        }),
        "waitForNavigation" => Ok(Command::WaitForNavigation {
            timeout_ms: optional_timeout(args),
        }),
        "extract" => Ok(Command::Extract {
            selector: required_str(args, "selector", "extract")?,
            as_name: required_str(args, "as", "extract")?,
            multiple: args
                .get("multiple")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }),
        other => Err(Error::UnsupportedCommand(format!(
            "unknown command kind '{}'",
            other
        ))),
    }
}

/// Compile a structured (already-parsed JSON) script into a command sequence.
pub fn compile_from_structured(raw: &Value) -> Result<Vec<Command>> {
    let list = raw
        .as_array()
        .ok_or_else(|| Error::InvalidScript("script must be a command list".to_string()))?;

    let mut commands = Vec::with_capacity(list.len());
    for (index, entry) in list.iter().enumerate() {
        let obj = entry.as_object().ok_or_else(|| {
            Error::InvalidScript(format!("command {} is not an object", index))
        })?;
        let kind = obj.get("kind").and_then(|v| v.as_str()).ok_or_else(|| {
            Error::InvalidScript(format!("command {} is missing a string 'kind'", index))
        })?;
        let args = obj.get("args").ok_or_else(|| {
            Error::InvalidScript(format!("command {} is missing an 'args' object", index))
        })?;
        if !args.is_object() {
            return Err(Error::InvalidScript(format!(
                "command {} 'args' must be an object",
                index
            )));
        }
        commands.push(command_from_parts(kind, args)?);
    }
    Ok(commands)
}

/// Project a compiled sequence into the wire shape used by `dslCommands`.
pub fn commands_to_wire(commands: &[Command]) -> Value {
    Value::Array(
        commands
            .iter()
            .map(|c| json!({ "kind": c.kind(), "args": c.args() }))
            .collect(),
    )
}
