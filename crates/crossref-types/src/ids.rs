//! Stable identifiers.
//!
//! Document ids and node guids are minted once as ULIDs and never derived
//! from positional or display data. A [`Uid`] joins the two and is the only
//! key used across document boundaries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::CrossrefError;

/// Separator between the document id and node guid inside a [`Uid`].
pub const UID_SEPARATOR: char = ':';

/// Separator between the owning document and the local id of a grouping.
pub const GROUP_SEPARATOR: char = '/';

fn validate_id(kind: &str, value: &str) -> Result<(), CrossrefError> {
    if value.is_empty() {
        return Err(CrossrefError::InvalidInput(format!("{} must not be empty", kind)));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(CrossrefError::InvalidInput(format!(
            "{} contains invalid character {:?}: {}",
            kind, c, value
        )));
    }
    Ok(())
}

/// Immutable document identifier, minted once and kept across renames.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Mint a fresh identifier.
    pub fn mint() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Parse and validate an identifier supplied by the host.
    pub fn parse(value: &str) -> Result<Self, CrossrefError> {
        validate_id("document id", value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = CrossrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = CrossrefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_id("document id", &value)?;
        Ok(Self(value))
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// Immutable node identifier, assigned once at node creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeGuid(String);

impl NodeGuid {
    /// Mint a fresh guid for a newly created node.
    pub fn mint() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Derive a guid from a seed.
    ///
    /// Used only for one-time migration of legacy nodes: every instance that
    /// migrates the same legacy node arrives at the same guid.
    pub fn derive(seed: &[u8]) -> Self {
        Self(Ulid(xxh3_128(seed)).to_string())
    }

    pub fn parse(value: &str) -> Result<Self, CrossrefError> {
        validate_id("node guid", value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeGuid {
    type Err = CrossrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeGuid {
    type Error = CrossrefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_id("node guid", &value)?;
        Ok(Self(value))
    }
}

impl From<NodeGuid> for String {
    fn from(guid: NodeGuid) -> Self {
        guid.0
    }
}

/// Composite identifier `DOCUMENT_ID:NODE_GUID`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uid {
    document_id: DocumentId,
    node_guid: NodeGuid,
}

impl Uid {
    pub fn new(document_id: DocumentId, node_guid: NodeGuid) -> Self {
        Self {
            document_id,
            node_guid,
        }
    }

    /// Parse the `DOCUMENT_ID:NODE_GUID` text form.
    pub fn parse(value: &str) -> Result<Self, CrossrefError> {
        let (doc, guid) = value
            .split_once(UID_SEPARATOR)
            .ok_or_else(|| CrossrefError::InvalidInput(format!("not a uid: {}", value)))?;
        Ok(Self {
            document_id: DocumentId::parse(doc)?,
            node_guid: NodeGuid::parse(guid)?,
        })
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn node_guid(&self) -> &NodeGuid {
        &self.node_guid
    }

    /// Check whether this uid belongs to the given document.
    pub fn belongs_to(&self, document_id: &DocumentId) -> bool {
        &self.document_id == document_id
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.document_id, UID_SEPARATOR, self.node_guid)
    }
}

impl FromStr for Uid {
    type Err = CrossrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Uid {
    type Error = CrossrefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> Self {
        uid.to_string()
    }
}

/// Identifier of a membership grouping: `DOCUMENT_ID/LOCAL_ID`.
///
/// Groupings are owned by the document that declares them, so purging a
/// document removes its groupings as a whole.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId {
    owner: DocumentId,
    local_id: String,
}

impl GroupId {
    pub fn new(owner: DocumentId, local_id: &str) -> Result<Self, CrossrefError> {
        validate_id("group id", local_id)?;
        Ok(Self {
            owner,
            local_id: local_id.to_string(),
        })
    }

    pub fn parse(value: &str) -> Result<Self, CrossrefError> {
        let (doc, local) = value
            .split_once(GROUP_SEPARATOR)
            .ok_or_else(|| CrossrefError::InvalidInput(format!("not a group id: {}", value)))?;
        Self::new(DocumentId::parse(doc)?, local)
    }

    pub fn owner(&self) -> &DocumentId {
        &self.owner
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.owner, GROUP_SEPARATOR, self.local_id)
    }
}

impl TryFrom<String> for GroupId {
    type Error = CrossrefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.to_string()
    }
}
