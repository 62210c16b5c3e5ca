/// A handler's reply: the lines to put on the wire, and whether the
/// connection must be torn down afterwards (fatal). Client-level errors
/// are ordinary tagged BAD/NO replies; fatal is reserved for internal
/// failures where the node aborts rather than diverge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub fatal: bool,
}

impl Reply {
    pub fn ok(tag: &str, text: &str) -> Self {
        Self::tagged(tag, "OK", text)
    }

    pub fn no(tag: &str, text: &str) -> Self {
        Self::tagged(tag, "NO", text)
    }

    pub fn bad(tag: &str, text: &str) -> Self {
        Self::tagged(tag, "BAD", text)
    }

    fn tagged(tag: &str, status: &str, text: &str) -> Self {
        Self {
            lines: vec![format!("{} {} {}", tag, status, text)],
            fatal: false,
        }
    }

    pub fn invalid() -> Self {
        Self {
            lines: vec!["* BAD Received invalid IMAP command".to_owned()],
            fatal: false,
        }
    }

    pub fn extra_parameters(tag: &str, command: &str) -> Self {
        Self::bad(
            tag,
            &format!("Command {} was sent with extra parameters", command),
        )
    }

    pub fn missing_parameters(tag: &str, command: &str) -> Self {
        Self::bad(
            tag,
            &format!("Command {} was sent without enough parameters", command),
        )
    }

    pub fn continuation(text: &str) -> Self {
        Self {
            lines: vec![format!("+ {}", text)],
            fatal: false,
        }
    }

    pub fn internal_error() -> Self {
        Self {
            lines: vec!["* BAD Internal server error, sorry. Closing connection.".to_owned()],
            fatal: true,
        }
    }

    /// Inserts an untagged data line before the completion line.
    pub fn data(mut self, line: impl Into<String>) -> Self {
        let at = self.lines.len().saturating_sub(1);
        self.lines.insert(at, line.into());
        self
    }

    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_precede_the_completion() {
        let reply = Reply::ok("a1", "SELECT completed")
            .data("* 3 EXISTS")
            .data("* 1 RECENT");
        assert_eq!(
            reply.to_wire(),
            "* 3 EXISTS\r\n* 1 RECENT\r\na1 OK SELECT completed\r\n"
        );
    }
}
