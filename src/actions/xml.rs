//! Canonical XML-ish serialisation of a parsed thought + action sequence.
//!
//! This is not general XML: it is the narrow, fixed micro-format the model is prompted
//! to produce, with exactly the tags [`super::Action`] knows about. [`to_xml`] is the
//! left inverse of [`super::parse::parse_model_output`] (§8 round-trip law): attribute
//! values are escaped, and an `<ed>` script's body is emitted byte-for-byte.

use super::{Action, ParsedOutput};

/// Render a parsed thought + action sequence back into its canonical textual form.
pub fn to_xml(parsed: &ParsedOutput) -> String {
    let mut out = String::new();
    out.push_str("<thought>\n");
    out.push_str(&parsed.thought);
    out.push_str("\n</thought>\n");
    for action in &parsed.actions {
        out.push_str(&action_to_xml(action));
        out.push('\n');
    }
    out
}

fn action_to_xml(action: &Action) -> String {
    match action {
        Action::Ls { path } => format!("<ls path=\"{}\"/>", escape(path)),
        Action::Cat { path } => format!("<cat path=\"{}\"/>", escape(path)),
        Action::Grep { pattern, path } => match path {
            Some(path) => format!(
                "<grep pattern=\"{}\" path=\"{}\"/>",
                escape(pattern),
                escape(path)
            ),
            None => format!("<grep pattern=\"{}\"/>", escape(pattern)),
        },
        Action::Mkdir { path } => format!("<mkdir path=\"{}\"/>", escape(path)),
        Action::Ed { path, script } => {
            format!("<ed path=\"{}\">\n{}\n</ed>", escape(path), script)
        }
        Action::GitStatus => "<git-status/>".to_string(),
        Action::GitCommit { message } => format!("<git-commit message=\"{}\"/>", escape(message)),
        Action::Abort { reason } => format!("<abort reason=\"{}\"/>", escape(reason)),
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(super) fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_angle_brackets_in_attributes() {
        let xml = action_to_xml(&Action::GitCommit {
            message: "fix \"the\" <bug>".into(),
        });
        assert_eq!(
            xml,
            "<git-commit message=\"fix &quot;the&quot; &lt;bug&gt;\"/>"
        );
    }
}
