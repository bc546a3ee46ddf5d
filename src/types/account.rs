use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier (an AT-Protocol DID such as `did:plc:abc123`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    pub method: String,
    pub identifier: String,
}

impl AccountId {
    /// Parse an account identifier from `did:<method>:<identifier>`
    pub fn parse(did: &str) -> Result<Self, crate::error::Error> {
        let mut parts = did.splitn(3, ':');
        let (scheme, method, identifier) = match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(method), Some(identifier)) => (scheme, method, identifier),
            _ => {
                return Err(crate::error::Error::InvalidAccount(format!(
                    "Invalid DID format: {}",
                    did
                )))
            }
        };

        if scheme != "did" {
            return Err(crate::error::Error::InvalidAccount(format!(
                "Missing did scheme: {}",
                did
            )));
        }

        if method.is_empty() || !method.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(crate::error::Error::InvalidAccount(format!(
                "Invalid DID method in {}",
                did
            )));
        }

        let identifier_ok = !identifier.is_empty()
            && !identifier.ends_with(':')
            && identifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '%' | '-'));
        if !identifier_ok {
            return Err(crate::error::Error::InvalidAccount(format!(
                "Invalid DID identifier in {}",
                did
            )));
        }

        Ok(Self {
            method: method.to_string(),
            identifier: identifier.to_string(),
        })
    }

    /// Check if this is a did:plc identity
    pub fn is_plc(&self) -> bool {
        self.method == "plc"
    }

    /// Check if this is a did:web identity
    pub fn is_web(&self) -> bool {
        self.method == "web"
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}", self.method, self.identifier)
    }
}

impl std::str::FromStr for AccountId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_plc_parsing() {
        let account = AccountId::from_str("did:plc:ewvi7nxzyoun6zhxrhs64oiz").unwrap();
        assert_eq!(account.method, "plc");
        assert_eq!(account.identifier, "ewvi7nxzyoun6zhxrhs64oiz");
        assert!(account.is_plc());
        assert_eq!(account.to_string(), "did:plc:ewvi7nxzyoun6zhxrhs64oiz");
    }

    #[test]
    fn test_web_parsing_keeps_port_colon() {
        let account = AccountId::parse("did:web:example.com%3A8080").unwrap();
        assert!(account.is_web());
        assert_eq!(account.identifier, "example.com%3A8080");
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(AccountId::parse("alice.bsky.social").is_err());
        assert!(AccountId::parse("did:plc").is_err());
        assert!(AccountId::parse("did:PLC:abc").is_err());
        assert!(AccountId::parse("did:plc:abc/def").is_err());
        assert!(AccountId::parse("uri:plc:abc").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let account = AccountId::parse("did:plc:abc").unwrap();
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, "\"did:plc:abc\"");
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }
}
