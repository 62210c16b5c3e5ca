//! Control frames of the inter-node protocol, delimited by `> … <`:
//! `> id: <clientid> [worker] <`, `> done <`, `> error <`, `> ping <`,
//! `> literal: <N> <`. Data frames are rmp-encoded messages and never
//! start with `> `, so the two are distinguishable by prefix.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Ping,
    Done,
    Error,
    /// `client` names the connecting node (sync channel) or the proxied
    /// session (mail channel); `worker` carries the identity a storage
    /// node must emit under when standing in for a failed worker.
    Id {
        client: String,
        worker: Option<String>,
    },
    /// Announces `size` raw octets of client data on a proxied mail
    /// channel.
    Literal { size: usize },
}

impl Control {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Control::Ping => b"> ping <".to_vec(),
            Control::Done => b"> done <".to_vec(),
            Control::Error => b"> error <".to_vec(),
            Control::Id { client, worker } => match worker {
                Some(worker) => format!("> id: {} {} <", client, worker).into_bytes(),
                None => format!("> id: {} <", client).into_bytes(),
            },
            Control::Literal { size } => format!("> literal: {} <", size).into_bytes(),
        }
    }

    /// `None` for anything that is not a well-formed control frame; the
    /// caller then treats the bytes as a data frame.
    pub fn parse(frame: &[u8]) -> Option<Control> {
        let text = std::str::from_utf8(frame).ok()?;
        let inner = text.strip_prefix("> ")?.strip_suffix(" <")?;
        match inner {
            "ping" => Some(Control::Ping),
            "done" => Some(Control::Done),
            "error" => Some(Control::Error),
            _ if inner.starts_with("literal: ") => {
                let size = inner.strip_prefix("literal: ")?.parse().ok()?;
                Some(Control::Literal { size })
            }
            _ => {
                let rest = inner.strip_prefix("id: ")?;
                let mut parts = rest.split_whitespace();
                let client = parts.next()?.to_owned();
                let worker = parts.next().map(str::to_owned);
                if parts.next().is_some() {
                    return None;
                }
                Some(Control::Id { client, worker })
            }
        }
    }
}
