//! Identifiers for bills.
//!
//! A bill is known by its permanent `BillId` once the backend has accepted it. Before that it only
//! has a client-generated `TempId`. `Identity` carries whichever of the two is authoritative so that
//! call sites never have to guess.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const TEMP_PREFIX: &str = "tmp-";

/// The permanent identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillId(String);

impl BillId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BillId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A client-generated identifier for a bill that the backend has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    /// Generates a fresh, unique temporary identifier.
    pub fn generate() -> Self {
        Self(format!("{TEMP_PREFIX}{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TempId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlates the installments that were created together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The key a bill is looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Identity {
    Permanent(BillId),
    Temporary(TempId),
}

impl Identity {
    pub fn is_temporary(&self) -> bool {
        matches!(self, Identity::Temporary(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identity::Permanent(id) => id.as_str(),
            Identity::Temporary(id) => id.as_str(),
        }
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BillId> for Identity {
    fn from(value: BillId) -> Self {
        Identity::Permanent(value)
    }
}

impl From<TempId> for Identity {
    fn from(value: TempId) -> Self {
        Identity::Temporary(value)
    }
}
