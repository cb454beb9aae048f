//! Handler output protocol.
//!
//! A handler's standard output is read line by line. Two verbs are
//! understood, case-insensitively:
//!
//! ```text
//! attach_file <path>
//! change_reply_address <address>
//! ```
//!
//! Every other line is ignored.

use std::path::PathBuf;

/// One recognised instruction from a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    AttachFile(PathBuf),
    ChangeReplyAddress(String),
}

impl Directive {
    /// Parse a single line. `None` for anything that is not a directive.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let (verb, argument) = line.split_once(char::is_whitespace)?;
        let argument = argument.trim();
        if argument.is_empty() {
            return None;
        }

        if verb.eq_ignore_ascii_case("attach_file") {
            Some(Self::AttachFile(PathBuf::from(argument)))
        } else if verb.eq_ignore_ascii_case("change_reply_address") {
            Some(Self::ChangeReplyAddress(argument.to_string()))
        } else {
            None
        }
    }
}

/// All directives in `output`, in the order they appear.
pub fn parse_directives(output: &str) -> Vec<Directive> {
    output.lines().filter_map(Directive::parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_verbs() {
        let directives =
            parse_directives("attach_file /tmp/out.csv\nchange_reply_address other@example.com\n");
        assert_eq!(
            directives,
            vec![
                Directive::AttachFile(PathBuf::from("/tmp/out.csv")),
                Directive::ChangeReplyAddress("other@example.com".into()),
            ]
        );
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(
            Directive::parse_line("ATTACH_FILE /tmp/a"),
            Some(Directive::AttachFile(PathBuf::from("/tmp/a")))
        );
        assert_eq!(
            Directive::parse_line("Change_Reply_Address x@example.com"),
            Some(Directive::ChangeReplyAddress("x@example.com".into()))
        );
    }

    #[test]
    fn windows_line_endings_and_padding() {
        let directives = parse_directives("  attach_file   /tmp/with space.txt \r\n");
        assert_eq!(
            directives,
            vec![Directive::AttachFile(PathBuf::from("/tmp/with space.txt"))]
        );
    }

    #[test]
    fn other_output_is_ignored() {
        let output = "3 torrents running\nattach_file\nattach_files /tmp/x\nattach_file /tmp/log\n";
        assert_eq!(
            parse_directives(output),
            vec![Directive::AttachFile(PathBuf::from("/tmp/log"))]
        );
        assert!(parse_directives("").is_empty());
    }
}
