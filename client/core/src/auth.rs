//! Authorization Header
//!
//! snapd authenticates store-backed operations with macaroons: one root
//! macaroon plus any number of discharge macaroons.

use serde::{Deserialize, Serialize};

/// Credentials attached to every request once set
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthData {
    /// Serialized root macaroon
    pub macaroon: String,
    /// Serialized discharge macaroons
    #[serde(default)]
    pub discharges: Vec<String>,
}

impl AuthData {
    /// Create credentials from a root macaroon and its discharges
    pub fn new(macaroon: impl Into<String>, discharges: Vec<String>) -> Self {
        Self {
            macaroon: macaroon.into(),
            discharges,
        }
    }

    /// Value for the `Authorization` header
    #[must_use]
    pub fn authorization_header(&self) -> String {
        let mut value = format!("Macaroon root=\"{}\"", self.macaroon);
        for discharge in &self.discharges {
            value.push_str(",discharge=\"");
            value.push_str(discharge);
            value.push('"');
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_only() {
        let auth = AuthData::new("ROOT", Vec::new());
        assert_eq!(auth.authorization_header(), "Macaroon root=\"ROOT\"");
    }

    #[test]
    fn test_with_discharges() {
        let auth = AuthData::new("ROOT", vec!["D1".into(), "D2".into()]);
        assert_eq!(
            auth.authorization_header(),
            "Macaroon root=\"ROOT\",discharge=\"D1\",discharge=\"D2\""
        );
    }
}
