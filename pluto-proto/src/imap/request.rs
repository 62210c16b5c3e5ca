/// Commands the engine knows. Anything else, tagged or not, is rejected
/// with `* BAD Received invalid IMAP command`.
pub const KNOWN_COMMANDS: [&str; 12] = [
    "CAPABILITY",
    "STARTTLS",
    "LOGIN",
    "LOGOUT",
    "NOOP",
    "SELECT",
    "CREATE",
    "DELETE",
    "LIST",
    "APPEND",
    "EXPUNGE",
    "STORE",
];

/// One upstream request line, split on the first two whitespace runs:
/// `<tag> <command> [<payload>]`. The command is uppercased; tag and
/// payload are preserved byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tag: String,
    pub command: String,
    pub payload: String,
}

pub fn is_known_command(token: &str) -> bool {
    KNOWN_COMMANDS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(token))
}

/// `None` means the line is not a well-formed request: empty, a bare
/// command with no tag in front, or a tag with nothing after it.
pub fn parse(line: &str) -> Option<Request> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut rest = line.trim_start();
    if rest.is_empty() {
        return None;
    }

    let tag_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let tag = &rest[..tag_end];
    // A client that forgot its tag: the first token is itself a command.
    if is_known_command(tag) {
        return None;
    }
    rest = rest[tag_end..].trim_start();
    if rest.is_empty() {
        return None;
    }

    let cmd_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let command = rest[..cmd_end].to_ascii_uppercase();
    let payload = rest[cmd_end..].trim_start().to_owned();

    Some(Request {
        tag: tag.to_owned(),
        command,
        payload,
    })
}

/// Splits a payload into whitespace-run tokens, honoring double quotes so
/// `"My Folder"` stays one argument (quotes stripped).
pub fn split_args(payload: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut seen = false;
    for c in payload.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                seen = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if seen {
                    args.push(std::mem::take(&mut current));
                    seen = false;
                }
            }
            c => {
                current.push(c);
                seen = true;
            }
        }
    }
    if seen {
        args.push(current);
    }
    args
}
