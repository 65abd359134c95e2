// Copyright 2025 Bucatini Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Oplog entry model, classification, and normalization.
//!
//! The oplog stores one document per committed write. Only inserts, updates,
//! and deletes against ordinary collections are of interest to the relay;
//! commands, no-ops, and writes to `system.*` collections are filtered out
//! before summarization.

use bson::{Bson, Document, Timestamp};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Errors raised while normalizing a raw oplog entry.
///
/// Both variants are per-entry conditions: the offending entry is skipped
/// and the stream continues.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EntryError {
    /// The document id was present but neither a string nor an `ObjectId`.
    #[error("document id was not a string or an ObjectId")]
    UnsupportedIdType,

    /// The operation payload carried no `_id` field at all.
    #[error("oplog entry carries no document id")]
    MissingId,
}

/// One document read off `local.oplog.rs`, as the server stores it.
///
/// Only the fields the relay consumes are mapped; the remaining oplog fields
/// (`h`, `v`, `wall`, session info, ...) are ignored during deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOplogEntry {
    /// Replication timestamp. Doubles as cursor position and resume token.
    #[serde(rename = "ts")]
    pub timestamp: Timestamp,

    /// Single-character operation code (`i`, `u`, `d`, `c`, `n`).
    #[serde(rename = "op")]
    pub operation: String,

    /// Namespace of the form `database.collection`.
    #[serde(rename = "ns")]
    pub namespace: String,

    /// Operation payload: a document, or an update descriptor for updates.
    #[serde(rename = "o", default)]
    pub payload: Document,

    /// For updates, the one-field record holding the target document id.
    #[serde(rename = "o2", default)]
    pub target: Option<Document>,
}

/// The data-bearing oplog operations the relay republishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A document was inserted (`op: "i"`).
    Insert,
    /// A document was updated in place or replaced (`op: "u"`).
    Update,
    /// A document was deleted (`op: "d"`).
    Delete,
}

impl Operation {
    /// Maps an oplog operation code, returning `None` for codes the relay
    /// does not republish (commands, no-ops, and anything unrecognized).
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(Self::Insert),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Returns true for insert operations.
    #[inline]
    #[must_use]
    pub fn is_insert(self) -> bool {
        self == Self::Insert
    }

    /// Returns true for update operations.
    #[inline]
    #[must_use]
    pub fn is_update(self) -> bool {
        self == Self::Update
    }

    /// Returns true for delete operations.
    #[inline]
    #[must_use]
    pub fn is_delete(self) -> bool {
        self == Self::Delete
    }
}

/// Document identifier carried by a change notification.
///
/// The oplog stores ids as arbitrary BSON; the relay supports the two types
/// its consumers understand. Anything else is rejected with
/// [`EntryError::UnsupportedIdType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentId {
    /// A plain string id, forwarded verbatim.
    String(String),
    /// A 12-byte object id, rendered as 24 lowercase hex characters.
    ObjectId(bson::oid::ObjectId),
}

impl DocumentId {
    fn from_bson(value: &Bson) -> Result<Self, EntryError> {
        match value {
            Bson::String(s) => Ok(Self::String(s.clone())),
            Bson::ObjectId(oid) => Ok(Self::ObjectId(*oid)),
            _ => Err(EntryError::UnsupportedIdType),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::ObjectId(oid) => f.write_str(&oid.to_hex()),
        }
    }
}

/// A normalized insert/update/delete, ready for summarization.
#[derive(Debug, Clone)]
pub struct OplogEntry {
    /// The operation kind.
    pub operation: Operation,

    /// Full namespace, exactly as the oplog spells it (`db.collection`).
    pub namespace: String,

    /// Database half of the namespace.
    pub database: String,

    /// Collection half of the namespace.
    pub collection: String,

    /// Identifier of the affected document.
    pub doc_id: DocumentId,

    /// The raw operation payload; shape depends on [`Self::operation`].
    pub data: Document,

    /// Replication timestamp, forwarded verbatim.
    pub timestamp: Timestamp,
}

impl OplogEntry {
    /// Classifies and normalizes a raw oplog entry.
    ///
    /// Returns `Ok(None)` for entries the relay does not republish: commands,
    /// no-ops, unrecognized operation codes, and writes to `system.*`
    /// collections (index builds and other internal-catalog traffic).
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::MissingId`] when the payload carries no `_id`,
    /// and [`EntryError::UnsupportedIdType`] when the id is neither a string
    /// nor an `ObjectId`. Callers skip such entries without stalling the
    /// stream.
    pub fn from_raw(raw: RawOplogEntry) -> Result<Option<OplogEntry>, EntryError> {
        let Some(operation) = Operation::from_code(&raw.operation) else {
            return Ok(None);
        };

        let (database, collection) = split_namespace(&raw.namespace);
        if collection.starts_with("system.") {
            return Ok(None);
        }
        let database = database.to_string();
        let collection = collection.to_string();

        // Updates name their target in `o2`; inserts and deletes carry the
        // id inside the payload itself.
        let id_source = match operation {
            Operation::Update => raw.target.as_ref().and_then(|target| target.get("_id")),
            Operation::Insert | Operation::Delete => raw.payload.get("_id"),
        };
        let doc_id = id_source
            .ok_or(EntryError::MissingId)
            .and_then(DocumentId::from_bson)?;

        Ok(Some(OplogEntry {
            operation,
            database,
            collection,
            namespace: raw.namespace,
            doc_id,
            data: raw.payload,
            timestamp: raw.timestamp,
        }))
    }
}

/// Splits a namespace at the first `.` into database and collection halves.
///
/// A namespace without a dot is treated as a bare database name with an
/// empty collection, matching how the server spells certain internal ops.
fn split_namespace(ns: &str) -> (&str, &str) {
    ns.split_once('.').unwrap_or((ns, ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn raw(op: &str, ns: &str, payload: Document, target: Option<Document>) -> RawOplogEntry {
        RawOplogEntry {
            timestamp: Timestamp {
                time: 100,
                increment: 1,
            },
            operation: op.to_string(),
            namespace: ns.to_string(),
            payload,
            target,
        }
    }

    #[test]
    fn normalizes_insert() {
        let entry = OplogEntry::from_raw(raw(
            "i",
            "foo.bar",
            doc! { "_id": "someid", "some": "field" },
            None,
        ))
        .unwrap()
        .expect("insert should be kept");

        assert_eq!(entry.operation, Operation::Insert);
        assert_eq!(entry.namespace, "foo.bar");
        assert_eq!(entry.database, "foo");
        assert_eq!(entry.collection, "bar");
        assert_eq!(entry.doc_id, DocumentId::String("someid".to_string()));
        assert_eq!(entry.timestamp.time, 100);
    }

    #[test]
    fn update_takes_id_from_target_record() {
        let entry = OplogEntry::from_raw(raw(
            "u",
            "foo.bar",
            doc! { "$v": 2, "$set": { "a": 1 } },
            Some(doc! { "_id": "target-id" }),
        ))
        .unwrap()
        .expect("update should be kept");

        assert_eq!(entry.operation, Operation::Update);
        assert_eq!(entry.doc_id, DocumentId::String("target-id".to_string()));
    }

    #[test]
    fn delete_takes_id_from_payload() {
        let entry = OplogEntry::from_raw(raw("d", "foo.bar", doc! { "_id": "gone" }, None))
            .unwrap()
            .expect("delete should be kept");

        assert_eq!(entry.operation, Operation::Delete);
        assert_eq!(entry.doc_id, DocumentId::String("gone".to_string()));
    }

    #[test]
    fn discards_commands_and_noops() {
        for op in ["c", "n", "xyz", ""] {
            let result = OplogEntry::from_raw(raw(op, "foo.bar", doc! { "_id": "x" }, None));
            assert!(result.unwrap().is_none(), "op {op:?} should be dropped");
        }
    }

    #[test]
    fn discards_system_collections() {
        for ns in ["foo.system.indexes", "foo.system.profile", "admin.system.version"] {
            let result = OplogEntry::from_raw(raw("i", ns, doc! { "_id": "x" }, None));
            assert!(result.unwrap().is_none(), "ns {ns:?} should be dropped");
        }
    }

    #[test]
    fn keeps_collections_merely_containing_system() {
        let entry = OplogEntry::from_raw(raw(
            "i",
            "foo.subsystem.things",
            doc! { "_id": "x" },
            None,
        ))
        .unwrap();
        assert!(entry.is_some());
    }

    #[test]
    fn splits_namespace_at_first_dot_only() {
        let entry = OplogEntry::from_raw(raw("i", "foo.bar.baz", doc! { "_id": "x" }, None))
            .unwrap()
            .expect("kept");
        assert_eq!(entry.database, "foo");
        assert_eq!(entry.collection, "bar.baz");
    }

    #[test]
    fn rejects_unsupported_id_type() {
        let result = OplogEntry::from_raw(raw("i", "foo.bar", doc! { "_id": 1234 }, None));
        assert_eq!(result.unwrap_err(), EntryError::UnsupportedIdType);
    }

    #[test]
    fn rejects_missing_id() {
        let result = OplogEntry::from_raw(raw("i", "foo.bar", doc! { "some": "field" }, None));
        assert_eq!(result.unwrap_err(), EntryError::MissingId);

        let result = OplogEntry::from_raw(raw("u", "foo.bar", doc! { "$set": { "a": 1 } }, None));
        assert_eq!(result.unwrap_err(), EntryError::MissingId);
    }

    #[test]
    fn accepts_object_ids() {
        let oid = bson::oid::ObjectId::parse_str("deadbeefdeadbeefdeadbeef").unwrap();
        let entry = OplogEntry::from_raw(raw("i", "foo.bar", doc! { "_id": oid }, None))
            .unwrap()
            .expect("kept");
        assert_eq!(entry.doc_id, DocumentId::ObjectId(oid));
        assert_eq!(entry.doc_id.to_string(), "deadbeefdeadbeefdeadbeef");
    }

    #[test]
    fn deserializes_from_oplog_document() {
        let ts = Timestamp {
            time: 42,
            increment: 7,
        };
        let doc = doc! {
            "ts": ts,
            "h": 12345_i64,
            "v": 2_i64,
            "op": "i",
            "ns": "foo.bar",
            "o": { "_id": "someid", "some": "field" },
        };

        let raw: RawOplogEntry = bson::from_document(doc).unwrap();
        assert_eq!(raw.operation, "i");
        assert_eq!(raw.namespace, "foo.bar");
        assert_eq!(raw.timestamp.time, 42);
        assert!(raw.target.is_none());
    }
}
