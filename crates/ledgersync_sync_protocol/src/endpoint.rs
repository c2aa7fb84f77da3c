//! Endpoint paths.

use std::fmt;

/// One sync endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Store encrypted messages.
    Push,
    /// Compare Merkle tries.
    PullDiff,
    /// Fetch messages in bucket ranges.
    PullMessages,
    /// Wipe the relay's copy of a file.
    Reset,
    /// Rebuild the relay's trie.
    Repair,
}

impl Endpoint {
    /// All endpoints.
    pub const ALL: [Endpoint; 5] = [
        Endpoint::Push,
        Endpoint::PullDiff,
        Endpoint::PullMessages,
        Endpoint::Reset,
        Endpoint::Repair,
    ];

    /// Request path, relative to the relay's base URL.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Push => "/sync/push",
            Endpoint::PullDiff => "/sync/pull-diff",
            Endpoint::PullMessages => "/sync/pull-messages",
            Endpoint::Reset => "/sync/reset",
            Endpoint::Repair => "/sync/repair",
        }
    }

    /// Looks an endpoint up by path.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.path() == path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_resolve() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::from_path(endpoint.path()), Some(endpoint));
        }
        assert_eq!(Endpoint::from_path("/sync/handshake"), None);
    }
}
