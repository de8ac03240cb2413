//! Wire vocabulary spoken by the peer.

const PACKAGE_PATH_PREFIX: &str = "package.path:";
const MODULES_PREFIX: &str = "modules:";

/// One parsed message from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Keepalive.
    Ping,
    /// The peer wants a fresh channel.
    Restart,
    /// Search-path segments the peer loads scripts from.
    PackagePath(Vec<String>),
    /// Module paths, relative to the installation root.
    Modules(Vec<String>),
    /// Anything else.
    Unknown(String),
}

impl Message {
    /// Parses a raw payload. Empty list entries are dropped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            "ping" => Self::Ping,
            "restart" => Self::Restart,
            _ => {
                if let Some(segments) = text.strip_prefix(PACKAGE_PATH_PREFIX) {
                    Self::PackagePath(split_list(segments))
                } else if let Some(modules) = text.strip_prefix(MODULES_PREFIX) {
                    Self::Modules(split_list(modules))
                } else {
                    Self::Unknown(text.to_owned())
                }
            }
        }
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
