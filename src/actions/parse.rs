//! Parses a model's raw completion into a thought plus an ordered action sequence.
//!
//! The grammar is exactly what [`super::xml::to_xml`] emits: a `<thought>` block
//! followed by zero or more self-closing action tags, with `<ed>` the only tag carrying
//! a verbatim text body. Anything else is a parse failure (§4.2: "if parse-or-validation
//! fails, the child is born `Done/SyntaxFailure`").

use std::collections::HashMap;

use super::Action;
use super::xml::unescape;
use crate::errors::{OrchestratorError, Result};

/// A model's output, already split into its free-text reasoning and its ordered,
/// structurally valid action list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub thought: String,
    pub actions: Vec<Action>,
}

const THOUGHT_OPEN: &str = "<thought>\n";
const THOUGHT_CLOSE: &str = "\n</thought>\n";

/// Parse one raw model completion. Also runs [`Action::validate`] on every parsed
/// action, so a syntactically well-formed but semantically empty action (e.g. an
/// empty `path`) fails here too.
pub fn parse_model_output(raw: &str) -> Result<ParsedOutput> {
    let fail =
        |msg: &str| Err(OrchestratorError::ActionParseFailed(msg.to_string()));

    let Some(after_open) = raw.strip_prefix(THOUGHT_OPEN) else {
        return fail("output must begin with `<thought>`");
    };
    let Some(thought_end) = after_open.find(THOUGHT_CLOSE) else {
        return fail("unterminated `<thought>` block");
    };
    let thought = after_open[..thought_end].to_string();
    let mut rest = &after_open[thought_end + THOUGHT_CLOSE.len()..];

    let mut actions = Vec::new();
    while !rest.is_empty() {
        let (action, remainder) = parse_one_tag(rest)?;
        action
            .validate()
            .map_err(|e| OrchestratorError::ActionParseFailed(e.to_string()))?;
        actions.push(action);
        rest = remainder;
    }

    Ok(ParsedOutput { thought, actions })
}

fn parse_one_tag(s: &str) -> Result<(Action, &str)> {
    if !s.starts_with('<') {
        return Err(OrchestratorError::ActionParseFailed(format!(
            "expected a tag, found `{}`",
            &s[..s.len().min(32)]
        )));
    }
    let name_end = s
        .find(|c: char| c == ' ' || c == '/' || c == '>')
        .ok_or_else(|| OrchestratorError::ActionParseFailed("unterminated tag".into()))?;
    let name = &s[1..name_end];

    if name == "ed" {
        return parse_ed_tag(s, name_end);
    }

    let close = s
        .find("/>")
        .ok_or_else(|| OrchestratorError::ActionParseFailed(format!("unterminated tag `{name}`")))?;
    let attrs = parse_attrs(&s[name_end..close]);
    let action = build_action(name, attrs)?;
    let mut remainder = &s[close + 2..];
    if let Some(stripped) = remainder.strip_prefix('\n') {
        remainder = stripped;
    }
    Ok((action, remainder))
}

fn parse_ed_tag<'a>(s: &'a str, name_end: usize) -> Result<(Action, &'a str)> {
    let tag_end = s
        .find('>')
        .ok_or_else(|| OrchestratorError::ActionParseFailed("unterminated `<ed>` tag".into()))?;
    let attrs = parse_attrs(&s[name_end..tag_end]);
    let path = attrs
        .get("path")
        .ok_or_else(|| OrchestratorError::ActionParseFailed("`<ed>` requires a `path`".into()))?;

    let body_start = tag_end + 1;
    let close_tag = "</ed>";
    let close_start = s[body_start..]
        .find(close_tag)
        .ok_or_else(|| OrchestratorError::ActionParseFailed("unterminated `<ed>` body".into()))?
        + body_start;

    let mut body = &s[body_start..close_start];
    body = body.strip_prefix('\n').unwrap_or(body);
    body = body.strip_suffix('\n').unwrap_or(body);

    let mut remainder = &s[close_start + close_tag.len()..];
    if let Some(stripped) = remainder.strip_prefix('\n') {
        remainder = stripped;
    }

    Ok((
        Action::Ed {
            path: unescape(path),
            script: body.to_string(),
        },
        remainder,
    ))
}

fn build_action(name: &str, attrs: HashMap<String, String>) -> Result<Action> {
    let required = |key: &str| -> Result<String> {
        attrs
            .get(key)
            .map(|v| unescape(v))
            .ok_or_else(|| OrchestratorError::ActionParseFailed(format!("`{name}` requires `{key}`")))
    };

    match name {
        "ls" => Ok(Action::Ls {
            path: required("path")?,
        }),
        "cat" => Ok(Action::Cat {
            path: required("path")?,
        }),
        "grep" => Ok(Action::Grep {
            pattern: required("pattern")?,
            path: attrs.get("path").map(|v| unescape(v)),
        }),
        "mkdir" => Ok(Action::Mkdir {
            path: required("path")?,
        }),
        "git-status" => Ok(Action::GitStatus),
        "git-commit" => Ok(Action::GitCommit {
            message: required("message")?,
        }),
        "abort" => Ok(Action::Abort {
            reason: required("reason")?,
        }),
        other => Err(OrchestratorError::ActionParseFailed(format!(
            "unknown action tag `{other}`"
        ))),
    }
}

/// Scan `key="value"` pairs out of the text between a tag's name and its `>`/`/>`.
fn parse_attrs(s: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i] as char).is_whitespace() {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let key = s[key_start..i].trim().to_string();
        i += 1; // skip '='
        if i >= bytes.len() || bytes[i] != b'"' {
            break;
        }
        i += 1; // skip opening quote
        let value_start = i;
        while i < bytes.len() && bytes[i] != b'"' {
            i += 1;
        }
        let value = s[value_start..i].to_string();
        i += 1; // skip closing quote
        if !key.is_empty() {
            attrs.insert(key, value);
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::super::xml::to_xml;
    use super::*;

    #[test]
    fn round_trips_a_self_closing_action_sequence() {
        let raw = "<thought>\nlooking around first\n</thought>\n<ls path=\"src\"/>\n<git-commit message=\"done\"/>\n";
        let parsed = parse_model_output(raw).unwrap();
        assert_eq!(parsed.thought, "looking around first");
        assert_eq!(parsed.actions.len(), 2);
        assert_eq!(to_xml(&parsed), raw);
    }

    #[test]
    fn round_trips_an_ed_action_with_a_multiline_script() {
        let raw = "<thought>\nedit the file\n</thought>\n<ed path=\"src/main.rs\">\n1,2d\nw\n</ed>\n";
        let parsed = parse_model_output(raw).unwrap();
        match &parsed.actions[0] {
            Action::Ed { path, script } => {
                assert_eq!(path, "src/main.rs");
                assert_eq!(script, "1,2d\nw");
            }
            other => panic!("expected Ed, got {other:?}"),
        }
        assert_eq!(to_xml(&parsed), raw);
    }

    #[test]
    fn missing_thought_block_is_a_parse_failure() {
        assert!(parse_model_output("<ls path=\"x\"/>").is_err());
    }

    #[test]
    fn unknown_tag_is_a_parse_failure() {
        let raw = "<thought>\nhi\n</thought>\n<frobnicate/>\n";
        assert!(parse_model_output(raw).is_err());
    }

    #[test]
    fn empty_path_fails_action_validation() {
        let raw = "<thought>\nhi\n</thought>\n<ls path=\"\"/>\n";
        assert!(parse_model_output(raw).is_err());
    }

    /// A restricted `Action` generator: alphanumeric-only fields, so the generated XML
    /// never needs escaping and the round-trip law (§8) can be checked byte-for-byte
    /// against [`to_xml`]'s output rather than just structurally.
    #[derive(Clone, Debug)]
    struct SafeAction(Action);

    impl quickcheck::Arbitrary for SafeAction {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let word = |g: &mut quickcheck::Gen| -> String {
                let len = 1 + (usize::arbitrary(g) % 8);
                (0..len)
                    .map(|_| {
                        let letters = b"abcdefghijklmnopqrstuvwxyz";
                        letters[usize::arbitrary(g) % letters.len()] as char
                    })
                    .collect()
            };
            let variant = u8::arbitrary(g) % 7;
            SafeAction(match variant {
                0 => Action::Ls { path: word(g) },
                1 => Action::Cat { path: word(g) },
                2 => Action::Grep {
                    pattern: word(g),
                    path: if bool::arbitrary(g) { Some(word(g)) } else { None },
                },
                3 => Action::Mkdir { path: word(g) },
                4 => Action::GitStatus,
                5 => Action::GitCommit { message: word(g) },
                _ => Action::Abort { reason: word(g) },
            })
        }
    }

    fn round_trip_law_holds_for_any_safe_action_sequence(
        thought: String,
        actions: Vec<SafeAction>,
    ) -> quickcheck::TestResult {
        if thought.contains(['\n', '<', '>']) {
            return quickcheck::TestResult::discard();
        }
        let parsed = ParsedOutput {
            thought,
            actions: actions.into_iter().map(|a| a.0).collect(),
        };
        let xml = to_xml(&parsed);
        let reparsed = match parse_model_output(&xml) {
            Ok(p) => p,
            Err(_) => return quickcheck::TestResult::failed(),
        };
        quickcheck::TestResult::from_bool(to_xml(&reparsed) == xml)
    }

    #[test]
    fn round_trip_law_quickcheck() {
        quickcheck::QuickCheck::new()
            .tests(200)
            .quickcheck(round_trip_law_holds_for_any_safe_action_sequence as fn(String, Vec<SafeAction>) -> quickcheck::TestResult);
    }
}
