//! Transaction identifiers
//!
//! A global transaction id has a nil branch qualifier. Every XA resource
//! enlisted in the transaction gets its own branch: same gtrid, fresh
//! bqual, and the node id of the coordinator that created the branch.
//! Recovery uses the node id to tell this node's branches apart from
//! branches created by other coordinators sharing a resource manager.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{XaError, XaErrorCode};

/// Format identifier stamped on every xid
pub const FORMAT_ID: i32 = 131077;

/// Longest node identifier accepted, in bytes
pub const MAX_NODE_ID_LEN: usize = 28;

/// Check a node identifier: non-empty, at most 28 bytes of `[A-Za-z0-9._-]`
pub fn validate_node_id(node_id: &str) -> Result<(), XaError> {
    if node_id.is_empty() {
        return Err(XaError::new(XaErrorCode::Inval, "node identifier is empty"));
    }
    if node_id.len() > MAX_NODE_ID_LEN {
        return Err(XaError::new(
            XaErrorCode::Inval,
            format!(
                "node identifier '{}' is longer than {} bytes",
                node_id, MAX_NODE_ID_LEN
            ),
        ));
    }
    if let Some(c) = node_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(XaError::new(
            XaErrorCode::Inval,
            format!("node identifier '{}' contains '{}'", node_id, c),
        ));
    }
    Ok(())
}

/// XA transaction identifier, `node:gtrid:bqual`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Xid {
    node_id: String,
    gtrid: Uuid,
    bqual: Uuid,
}

impl Xid {
    /// A fresh global transaction id owned by `node_id`
    pub fn new_global(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            gtrid: Uuid::new_v4(),
            bqual: Uuid::nil(),
        }
    }

    /// A fresh branch of this transaction created by `node_id`
    pub fn branch(&self, node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            gtrid: self.gtrid,
            bqual: Uuid::new_v4(),
        }
    }

    /// The global id this branch belongs to
    pub fn global(&self) -> Self {
        Self {
            node_id: self.node_id.clone(),
            gtrid: self.gtrid,
            bqual: Uuid::nil(),
        }
    }

    pub fn is_branch(&self) -> bool {
        !self.bqual.is_nil()
    }

    pub fn format_id(&self) -> i32 {
        FORMAT_ID
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn gtrid(&self) -> Uuid {
        self.gtrid
    }

    pub fn bqual(&self) -> Uuid {
        self.bqual
    }

    /// File name stem for records keyed by this xid
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}",
            self.gtrid.as_simple(),
            self.bqual.as_simple()
        )
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.node_id, self.gtrid, self.bqual)
    }
}

impl FromStr for Xid {
    type Err = XaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || XaError::new(XaErrorCode::Inval, format!("malformed xid '{}'", s));

        let mut parts = s.split(':');
        let (node_id, gtrid, bqual) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(g), Some(b), None) => (n, g, b),
            _ => return Err(invalid()),
        };
        validate_node_id(node_id)?;

        Ok(Self {
            node_id: node_id.to_string(),
            gtrid: Uuid::parse_str(gtrid).map_err(|_| invalid())?,
            bqual: Uuid::parse_str(bqual).map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for Xid {
    type Error = XaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Xid> for String {
    fn from(xid: Xid) -> Self {
        xid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branches_share_gtrid() {
        let global = Xid::new_global("node-a");
        assert!(!global.is_branch());

        let b1 = global.branch("node-a");
        let b2 = global.branch("node-a");
        assert!(b1.is_branch());
        assert_eq!(b1.gtrid(), global.gtrid());
        assert_ne!(b1, b2);
        assert_eq!(b1.global(), global);
    }

    #[test]
    fn test_branch_carries_creating_node() {
        let parent = Xid::new_global("client");
        let branch = parent.branch("server");
        assert_eq!(branch.node_id(), "server");
        assert_eq!(branch.gtrid(), parent.gtrid());
    }

    #[test]
    fn test_display_parse() {
        let xid = Xid::new_global("node.1").branch("node.1");
        let parsed: Xid = xid.to_string().parse().unwrap();
        assert_eq!(parsed, xid);
        assert!("node:not-a-uuid:x".parse::<Xid>().is_err());
        assert!("a:b".parse::<Xid>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let xid = Xid::new_global("n1");
        let json = serde_json::to_string(&xid).unwrap();
        assert_eq!(json, format!("\"{}\"", xid));
        let back: Xid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, xid);
    }

    #[test]
    fn test_node_id_validation() {
        assert!(validate_node_id("node-1.a_b").is_ok());
        assert!(validate_node_id("").is_err());
        assert!(validate_node_id("has space").is_err());
        assert!(validate_node_id("has:colon").is_err());
        assert!(validate_node_id(&"x".repeat(29)).is_err());
        assert!(validate_node_id(&"x".repeat(28)).is_ok());
    }

    #[test]
    fn test_file_stem_is_unique_per_branch() {
        let global = Xid::new_global("n");
        assert_ne!(global.file_stem(), global.branch("n").file_stem());
        assert!(!global.file_stem().contains(':'));
    }
}
