//! Row and key types for path-level permissions.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Separator between path segments inside a storage.
pub const PATH_SEPARATOR: char = '/';

/// Identifier of a root data storage.
pub type StorageId = i64;

/// Bitmask of granted capabilities.
///
/// Only READ carries meaning inside this crate; any other bits are stored and
/// combined verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mask(u32);

impl Mask {
    /// No capability.
    pub const NONE: Mask = Mask(0);
    /// Read capability.
    pub const READ: Mask = Mask(1);
    /// Write capability.
    pub const WRITE: Mask = Mask(2);
    /// Execute capability.
    pub const EXECUTE: Mask = Mask(4);

    /// Create from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Mask(bits)
    }

    /// Get raw bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True when no bit is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Check if every bit of `other` is set in this mask.
    pub const fn contains(&self, other: Mask) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mask {
    fn bitor_assign(&mut self, rhs: Mask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Mask {
    type Output = Mask;

    fn bitand(self, rhs: Mask) -> Mask {
        Mask(self.0 & rhs.0)
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a grant targets a single file or a folder subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PathType {
    File,
    Folder,
}

impl PathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::File => "FILE",
            PathType::Folder => "FOLDER",
        }
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILE" => Ok(PathType::File),
            "FOLDER" => Ok(PathType::Folder),
            other => Err(StorageError::InvalidInput {
                message: format!("unknown path type: {other}"),
            }),
        }
    }
}

/// Kind of principal a sid names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SidType {
    User,
    Group,
}

impl SidType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SidType::User => "USER",
            SidType::Group => "GROUP",
        }
    }
}

impl FromStr for SidType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(SidType::User),
            "GROUP" => Ok(SidType::Group),
            other => Err(StorageError::InvalidInput {
                message: format!("unknown sid type: {other}"),
            }),
        }
    }
}

/// Security identifier: a principal name plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sid {
    pub name: String,
    #[serde(rename = "type")]
    pub sid_type: SidType,
}

impl Sid {
    pub fn new(name: impl Into<String>, sid_type: SidType) -> Self {
        Self {
            name: name.into(),
            sid_type,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self::new(name, SidType::User)
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, SidType::Group)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sid_type {
            SidType::User => write!(f, "user:{}", self.name),
            SidType::Group => write!(f, "group:{}", self.name),
        }
    }
}

/// Provider family of a storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageKind {
    #[serde(rename = "S3")]
    S3,
    #[serde(rename = "AZ")]
    Azure,
    #[serde(rename = "GS")]
    Gcs,
    /// Filesystem-backed storage.
    #[serde(rename = "NFS")]
    Nfs,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::S3 => "S3",
            StorageKind::Azure => "AZ",
            StorageKind::Gcs => "GS",
            StorageKind::Nfs => "NFS",
        }
    }

    pub fn is_filesystem(&self) -> bool {
        matches!(self, StorageKind::Nfs)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S3" => Ok(StorageKind::S3),
            "AZ" => Ok(StorageKind::Azure),
            "GS" => Ok(StorageKind::Gcs),
            "NFS" => Ok(StorageKind::Nfs),
            other => Err(StorageError::InvalidInput {
                message: format!("unknown storage kind: {other}"),
            }),
        }
    }
}

/// A storage identified together with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageRef {
    pub id: StorageId,
    pub kind: StorageKind,
}

impl StorageRef {
    pub fn new(id: StorageId, kind: StorageKind) -> Self {
        Self { id, kind }
    }
}

/// A `(path, path type)` pair inside one storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRef {
    pub path: String,
    pub path_type: PathType,
}

impl PathRef {
    pub fn new(path: impl Into<String>, path_type: PathType) -> Self {
        Self {
            path: path.into(),
            path_type,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, PathType::File)
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self::new(path, PathType::Folder)
    }
}

/// Unique key of a permission row inside one storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionKey {
    pub path: String,
    pub path_type: PathType,
    pub sid: Sid,
}

impl PermissionKey {
    pub fn new(path: impl Into<String>, path_type: PathType, sid: Sid) -> Self {
        Self {
            path: path.into(),
            path_type,
            sid,
        }
    }
}

/// A stored permission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPermission {
    pub path: String,
    pub path_type: PathType,
    pub sid: Sid,
    pub mask: Mask,
    pub created: DateTime<Utc>,
}

impl StoredPermission {
    pub fn new(path: impl Into<String>, path_type: PathType, sid: Sid, mask: Mask) -> Self {
        Self {
            path: path.into(),
            path_type,
            sid,
            mask,
            created: Utc::now(),
        }
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.path.clone(), self.path_type, self.sid.clone())
    }
}

/// Lifecycle prolongation recorded for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProlongation {
    pub storage_id: StorageId,
    pub path: String,
    pub user_id: String,
    pub prolonged_until: DateTime<Utc>,
    pub days: u32,
    pub updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_union_and_contains() {
        let mask = Mask::READ | Mask::WRITE;
        assert!(mask.contains(Mask::READ));
        assert!(mask.contains(Mask::WRITE));
        assert!(!mask.contains(Mask::EXECUTE));
        assert_eq!(mask.bits(), 3);
        assert_eq!((mask & Mask::READ), Mask::READ);
    }

    #[test]
    fn test_mask_is_empty() {
        assert!(Mask::NONE.is_empty());
        assert!(Mask::default().is_empty());
        assert!(!Mask::from_bits(0b1000_0000).is_empty());
        assert!((Mask::READ & Mask::WRITE).is_empty());
    }

    #[test]
    fn test_mask_preserves_unknown_bits() {
        let mask = Mask::from_bits(0b1000_0001);
        assert!(mask.contains(Mask::READ));
        assert_eq!(mask.bits(), 129);
    }

    #[test]
    fn test_enum_string_roundtrip_for_database_columns() {
        for t in [PathType::File, PathType::Folder] {
            assert_eq!(t.as_str().parse::<PathType>().unwrap(), t);
        }
        for t in [SidType::User, SidType::Group] {
            assert_eq!(t.as_str().parse::<SidType>().unwrap(), t);
        }
        for k in [
            StorageKind::S3,
            StorageKind::Azure,
            StorageKind::Gcs,
            StorageKind::Nfs,
        ] {
            assert_eq!(k.as_str().parse::<StorageKind>().unwrap(), k);
        }
        assert!("folder".parse::<PathType>().is_err());
    }

    #[test]
    fn test_sid_display() {
        assert_eq!(Sid::user("alice").to_string(), "user:alice");
        assert_eq!(Sid::group("ROLE_ADMIN").to_string(), "group:ROLE_ADMIN");
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let key = PermissionKey::new("proj/a.txt", PathType::File, Sid::group("lab"));
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["pathType"], "FILE");
        assert_eq!(json["sid"]["type"], "GROUP");

        let kind: StorageKind = serde_json::from_str("\"AZ\"").unwrap();
        assert_eq!(kind, StorageKind::Azure);
    }
}
