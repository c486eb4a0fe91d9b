//! Line-oriented textual script front-end.
//!
//! One command per line, verb first, positional arguments after. Blank lines
//! and `#` comments are skipped. Double-quoted segments form single tokens
//! (quotes stripped, no escape sequences).

use autopage_core::{Error, Result};
use tracing::warn;

use crate::command::Command;

/// Split a line into tokens, honoring double-quoted segments.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                    in_quotes = false;
                } else {
                    in_quotes = true;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Canonicalize a verb: case-insensitive, snake_case and camelCase aliases
/// collapse to the same key.
fn canonical_verb(raw: &str) -> String {
    raw.to_lowercase().replace('_', "")
}

/// Parse an optional positional timeout token. A token that is not a valid
/// number is dropped (the field stays absent) — the drop is logged so the
/// loss is observable.
fn parse_timeout(token: Option<&String>, line_no: usize) -> Option<u64> {
    let token = token?;
    match token.parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(_) => {
            warn!(line = line_no, token = %token, "Dropping unparsable timeout value");
            None
        }
    }
}

/// Compile a textual script into a command sequence. Errors name the 1-based
/// source line.
pub fn compile_from_text(text: &str) -> Result<Vec<Command>> {
    let mut commands = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let tokens = tokenize(trimmed);
        let Some(verb) = tokens.first() else {
            continue;
        };

        let command = match canonical_verb(verb).as_str() {
            "goto" => {
                let url = tokens.get(1).filter(|t| !t.is_empty()).ok_or_else(|| {
                    Error::InvalidScript(format!("line {}: goto requires a url", line_no))
                })?;
                Command::Goto {
                    url: url.clone(),
                    timeout_ms: parse_timeout(tokens.get(2), line_no),
                }
            }
            "click" => {
                let selector = tokens.get(1).filter(|t| !t.is_empty()).ok_or_else(|| {
                    Error::InvalidScript(format!("line {}: click requires a selector", line_no))
                })?;
                Command::Click {
                    selector: selector.clone(),
                    timeout_ms: parse_timeout(tokens.get(2), line_no),
                }
            }
            "fill" => {
                let selector = tokens.get(1).filter(|t| !t.is_empty()).ok_or_else(|| {
                    Error::InvalidScript(format!("line {}: fill requires a selector", line_no))
                })?;
                if tokens.len() < 3 {
                    return Err(Error::InvalidScript(format!(
                        "line {}: fill requires a value",
                        line_no
                    )));
                }
                // Everything after the selector is the value; spaces survive
                // without quoting.
                Command::Fill {
                    selector: selector.clone(),
                    value: tokens[2..].join(" "),
                }
            }
            "waitforselector" => {
                let selector = tokens.get(1).filter(|t| !t.is_empty()).ok_or_else(|| {
                    Error::InvalidScript(format!(
                        "line {}: waitForSelector requires a selector",
                        line_no
                    ))
                })?;
                Command::WaitForSelector {
                    selector: selector.clone(),
                    timeout_ms: parse_timeout(tokens.get(2), line_no),
                }
            }
            "waitfornavigation" => Command::WaitForNavigation {
                timeout_ms: parse_timeout(tokens.get(1), line_no),
            },
            "extract" => {
                let selector = tokens.get(1).filter(|t| !t.is_empty()).ok_or_else(|| {
                    Error::InvalidScript(format!("line {}: extract requires a selector", line_no))
                })?;
                let as_name = tokens.get(2).filter(|t| !t.is_empty()).ok_or_else(|| {
                    Error::InvalidScript(format!(
                        "line {}: extract requires an 'as' name",
                        line_no
                    ))
                })?;
                Command::Extract {
                    selector: selector.clone(),
                    as_name: as_name.clone(),
                    multiple: tokens.get(3).map(|t| t == "multiple").unwrap_or(false),
                }
            }
            _ => {
                return Err(Error::UnsupportedCommand(format!(
                    "line {}: unrecognized command '{}'",
                    line_no, verb
                )))
            }
        };
        commands.push(command);
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goto_single_command() {
        let commands = compile_from_text("goto https://example.com").unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            Command::Goto {
                url: "https://example.com".to_string(),
                timeout_ms: None
            }
        );
    }

    #[test]
    fn test_fill_joins_value_tokens() {
        let commands = compile_from_text("fill #name John Doe").unwrap();
        assert_eq!(
            commands[0],
            Command::Fill {
                selector: "#name".to_string(),
                value: "John Doe".to_string()
            }
        );
    }

    #[test]
    fn test_quoted_selector_is_one_token() {
        let commands = compile_from_text("fill \"input[name=full name]\" Ada Lovelace").unwrap();
        assert_eq!(
            commands[0],
            Command::Fill {
                selector: "input[name=full name]".to_string(),
                value: "Ada Lovelace".to_string()
            }
        );
    }

    #[test]
    fn test_blank_lines_and_comments_skipped() {
        let script = "\n# open the page\ngoto https://example.com\n\n# done\n";
        let commands = compile_from_text(script).unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_verb_aliases() {
        let commands =
            compile_from_text("wait_for_selector .ready\nwaitForSelector .ready\nWAITFORSELECTOR .ready")
                .unwrap();
        assert_eq!(commands.len(), 3);
        assert!(commands
            .iter()
            .all(|c| matches!(c, Command::WaitForSelector { .. })));
    }

    #[test]
    fn test_extract_multiple_flag() {
        let commands = compile_from_text("extract .row text multiple\nextract .price text").unwrap();
        assert_eq!(
            commands[0],
            Command::Extract {
                selector: ".row".to_string(),
                as_name: "text".to_string(),
                multiple: true
            }
        );
        assert_eq!(
            commands[1],
            Command::Extract {
                selector: ".price".to_string(),
                as_name: "text".to_string(),
                multiple: false
            }
        );
    }

    #[test]
    fn test_unknown_verb_names_line() {
        let err = compile_from_text("goto https://example.com\nhover #menu").unwrap_err();
        assert!(
            matches!(err, Error::UnsupportedCommand(ref m) if m.contains("line 2") && m.contains("hover"))
        );
    }

    #[test]
    fn test_numeric_timeout_parsed() {
        let commands = compile_from_text("click #go 2500").unwrap();
        assert_eq!(
            commands[0],
            Command::Click {
                selector: "#go".to_string(),
                timeout_ms: Some(2500)
            }
        );
    }

    #[test]
    fn test_bad_timeout_becomes_absent() {
        let commands = compile_from_text("click #go soon").unwrap();
        assert_eq!(
            commands[0],
            Command::Click {
                selector: "#go".to_string(),
                timeout_ms: None
            }
        );
    }

    #[test]
    fn test_wait_for_navigation_bare() {
        let commands = compile_from_text("wait_for_navigation\nwait_for_navigation 8000").unwrap();
        assert_eq!(commands[0], Command::WaitForNavigation { timeout_ms: None });
        assert_eq!(
            commands[1],
            Command::WaitForNavigation {
                timeout_ms: Some(8000)
            }
        );
    }

    #[test]
    fn test_fill_without_value_fails() {
        let err = compile_from_text("fill #name").unwrap_err();
        assert!(matches!(err, Error::InvalidScript(ref m) if m.contains("line 1")));
    }
}
