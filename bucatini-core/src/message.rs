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

//! Change summarization: the wire-format notification and its channels.
//!
//! A change notification deliberately carries only the set of affected
//! top-level field names, never values. Downstream livequery consumers
//! already hold document state; the field set lets them decide whether a
//! re-fetch is needed at all, and it bounds the message size regardless of
//! how large the document is.

use crate::entry::{DocumentId, Operation, OplogEntry};
use bson::{Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Separator between the namespace and the stringified document id in the
/// per-document channel name.
pub const CHANNEL_SEPARATOR: &str = "::";

/// Event code on the wire: `"i"`, `"u"`, or `"r"`.
///
/// Deletes are renamed to `r` (remove) for the livequery consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCode {
    /// A document was inserted.
    #[serde(rename = "i")]
    Insert,
    /// A document was updated.
    #[serde(rename = "u")]
    Update,
    /// A document was removed.
    #[serde(rename = "r")]
    Remove,
}

impl From<Operation> for EventCode {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Insert => Self::Insert,
            Operation::Update => Self::Update,
            Operation::Delete => Self::Remove,
        }
    }
}

/// Wire encoding of a document id.
///
/// String ids pass through verbatim. Object ids are wrapped in a tagged
/// mapping so consumers can reconstruct the original type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncodedId {
    /// `"someid"`
    String(String),
    /// `{"$type": "oid", "$value": "<24 lowercase hex chars>"}`
    ObjectId {
        /// Type tag, always `"oid"`.
        #[serde(rename = "$type")]
        kind: String,
        /// The id bytes as lowercase hex.
        #[serde(rename = "$value")]
        hex: String,
    },
}

impl From<&DocumentId> for EncodedId {
    fn from(id: &DocumentId) -> Self {
        match id {
            DocumentId::String(s) => Self::String(s.clone()),
            DocumentId::ObjectId(oid) => Self::ObjectId {
                kind: "oid".to_string(),
                hex: oid.to_hex(),
            },
        }
    }
}

/// Reference to the affected document, serialized as `{"_id": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// The encoded document id.
    #[serde(rename = "_id")]
    pub id: EncodedId,
}

/// The compact change notification published on both Redis channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Event code.
    #[serde(rename = "e")]
    pub event: EventCode,

    /// The affected document's id.
    #[serde(rename = "d")]
    pub doc: DocumentRef,

    /// Affected top-level field names. Set semantics; ordering carries no
    /// meaning and consumers must not rely on it.
    #[serde(rename = "f")]
    pub fields: Vec<String>,
}

impl ChangeMessage {
    /// Builds the change message for a normalized entry.
    #[must_use]
    pub fn from_entry(entry: &OplogEntry) -> ChangeMessage {
        ChangeMessage {
            event: entry.operation.into(),
            doc: DocumentRef {
                id: EncodedId::from(&entry.doc_id),
            },
            fields: affected_fields(entry),
        }
    }
}

/// Computes the set of top-level field names touched by an entry.
///
/// Update payloads come in two shapes. A *replacement* update carries the
/// full new document and no `$`-prefixed top-level keys; its own keys are the
/// affected set. An *operator* update maps update operators (`$set`,
/// `$unset`, `$inc`, ...) to sub-documents; the affected set is the union of
/// the sub-documents' top-level keys, with the `$v` schema-version marker
/// contributing nothing. Inserts report the inserted document's keys and
/// deletes report nothing.
#[must_use]
pub fn affected_fields(entry: &OplogEntry) -> Vec<String> {
    match entry.operation {
        Operation::Delete => Vec::new(),
        Operation::Insert => top_level_keys(&entry.data),
        Operation::Update => {
            if entry.data.keys().any(|key| key.starts_with('$')) {
                operator_update_fields(&entry.data)
            } else {
                top_level_keys(&entry.data)
            }
        }
    }
}

fn top_level_keys(doc: &Document) -> Vec<String> {
    doc.keys()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn operator_update_fields(doc: &Document) -> Vec<String> {
    let mut fields = BTreeSet::new();
    for (key, value) in doc {
        if !key.starts_with('$') || key == "$v" {
            continue;
        }
        if let Bson::Document(touched) = value {
            fields.extend(touched.keys().cloned());
        }
    }
    fields.into_iter().collect()
}

/// One fully-formed publication: the serialized message, the two channel
/// names, and the timestamp used to advance the resume checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Channel shared by every change in the collection: the raw namespace.
    pub collection_channel: String,

    /// Per-document channel: `<namespace>::<stringified id>`.
    pub specific_channel: String,

    /// The serialized [`ChangeMessage`].
    pub msg: String,

    /// Replication timestamp of the source entry.
    pub timestamp: Timestamp,
}

impl Publication {
    /// Summarizes a normalized entry into a publication.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the change message cannot be
    /// serialized.
    pub fn from_entry(entry: &OplogEntry) -> Result<Publication, serde_json::Error> {
        let msg = serde_json::to_string(&ChangeMessage::from_entry(entry))?;
        Ok(Publication {
            collection_channel: entry.namespace.clone(),
            specific_channel: format!(
                "{}{}{}",
                entry.namespace, CHANNEL_SEPARATOR, entry.doc_id
            ),
            msg,
            timestamp: entry.timestamp,
        })
    }
}
