use serde::{Deserialize, Serialize};

/// Which half of the installation a mod belongs to. The `J9` variants mark
/// archives built for the modernized launcher runtime; they follow the same
/// client/server inclusion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Client,
    Server,
    Both,
    ClientJ9,
    ServerJ9,
    BothJ9,
}

/// Which half this instance is: stored lowercase in the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallSide {
    Client,
    Server,
}

impl Side {
    /// Parses a side string case-insensitively. Unknown values yield `None`,
    /// which callers treat as "not included".
    pub fn parse(s: &str) -> Option<Side> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CLIENT" => Some(Side::Client),
            "SERVER" => Some(Side::Server),
            "BOTH" => Some(Side::Both),
            "CLIENT_J9" => Some(Side::ClientJ9),
            "SERVER_J9" => Some(Side::ServerJ9),
            "BOTH_J9" => Some(Side::BothJ9),
            _ => None,
        }
    }

    /// Whether a mod with this side belongs in an instance of `install` side.
    pub fn included_in(self, install: InstallSide) -> bool {
        match self {
            Side::Both | Side::BothJ9 => true,
            Side::Client | Side::ClientJ9 => install == InstallSide::Client,
            Side::Server | Side::ServerJ9 => install == InstallSide::Server,
        }
    }
}

impl InstallSide {
    pub fn parse(s: &str) -> Option<InstallSide> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Some(InstallSide::Client),
            "server" => Some(InstallSide::Server),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallSide::Client => "client",
            InstallSide::Server => "server",
        }
    }
}

impl std::fmt::Display for InstallSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convenience for the wire form: unknown or empty side strings are never
/// included.
pub fn side_included(side: &str, install: InstallSide) -> bool {
    Side::parse(side).is_some_and(|s| s.included_in(install))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_included_everywhere() {
        assert!(side_included("BOTH", InstallSide::Client));
        assert!(side_included("BOTH_J9", InstallSide::Server));
        assert!(side_included("both", InstallSide::Server));
    }

    #[test]
    fn halves_must_match() {
        assert!(side_included("CLIENT", InstallSide::Client));
        assert!(!side_included("CLIENT", InstallSide::Server));
        assert!(side_included("SERVER_J9", InstallSide::Server));
        assert!(!side_included("SERVER_J9", InstallSide::Client));
    }

    #[test]
    fn unknown_side_excluded() {
        assert!(!side_included("", InstallSide::Client));
        assert!(!side_included("UNIVERSAL", InstallSide::Server));
    }

    #[test]
    fn side_serializes_with_j9_names() {
        let json = serde_json::to_string(&Side::ClientJ9).unwrap();
        assert_eq!(json, "\"CLIENT_J9\"");
        let back: Side = serde_json::from_str("\"BOTH_J9\"").unwrap();
        assert_eq!(back, Side::BothJ9);
    }
}
