//! Transactions and their mutations
//!
//! A transaction is an ordered list of mutations applied as a unit.
//! It is immutable once submitted. The journal payload for an op is the
//! JSON encoding of its transaction list.

use serde::{Deserialize, Serialize};

/// One mutation against the collection/object hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateCollection {
        cid: String,
    },
    RemoveCollection {
        cid: String,
    },
    CollectionSetAttr {
        cid: String,
        name: String,
        value: Vec<u8>,
    },
    Touch {
        cid: String,
        oid: String,
    },
    Write {
        cid: String,
        oid: String,
        offset: u64,
        data: Vec<u8>,
    },
    Zero {
        cid: String,
        oid: String,
        offset: u64,
        len: u64,
    },
    Truncate {
        cid: String,
        oid: String,
        size: u64,
    },
    Remove {
        cid: String,
        oid: String,
    },
    Clone {
        cid: String,
        oid: String,
        dst: String,
    },
    SetAttr {
        cid: String,
        oid: String,
        name: String,
        value: Vec<u8>,
    },
    RmAttr {
        cid: String,
        oid: String,
        name: String,
    },
    /// Link an existing object from `src_cid` into `cid`
    CollectionAdd {
        cid: String,
        src_cid: String,
        oid: String,
    },
}

impl Mutation {
    /// Payload bytes carried by this mutation
    pub fn payload_bytes(&self) -> u64 {
        match self {
            Mutation::Write { data, .. } => data.len() as u64,
            Mutation::SetAttr { value, .. } | Mutation::CollectionSetAttr { value, .. } => {
                value.len() as u64
            }
            _ => 0,
        }
    }
}

/// An ordered batch of mutations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Number of mutations
    pub fn num_ops(&self) -> u64 {
        self.mutations.len() as u64
    }

    /// Payload bytes (write data plus attribute values)
    pub fn num_bytes(&self) -> u64 {
        self.mutations.iter().map(Mutation::payload_bytes).sum()
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn create_collection(&mut self, cid: impl Into<String>) -> &mut Self {
        self.push(Mutation::CreateCollection { cid: cid.into() })
    }

    pub fn remove_collection(&mut self, cid: impl Into<String>) -> &mut Self {
        self.push(Mutation::RemoveCollection { cid: cid.into() })
    }

    pub fn collection_setattr(
        &mut self,
        cid: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.push(Mutation::CollectionSetAttr {
            cid: cid.into(),
            name: name.into(),
            value: value.into(),
        })
    }

    pub fn touch(&mut self, cid: impl Into<String>, oid: impl Into<String>) -> &mut Self {
        self.push(Mutation::Touch {
            cid: cid.into(),
            oid: oid.into(),
        })
    }

    pub fn write(
        &mut self,
        cid: impl Into<String>,
        oid: impl Into<String>,
        offset: u64,
        data: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.push(Mutation::Write {
            cid: cid.into(),
            oid: oid.into(),
            offset,
            data: data.into(),
        })
    }

    pub fn zero(
        &mut self,
        cid: impl Into<String>,
        oid: impl Into<String>,
        offset: u64,
        len: u64,
    ) -> &mut Self {
        self.push(Mutation::Zero {
            cid: cid.into(),
            oid: oid.into(),
            offset,
            len,
        })
    }

    pub fn truncate(&mut self, cid: impl Into<String>, oid: impl Into<String>, size: u64) -> &mut Self {
        self.push(Mutation::Truncate {
            cid: cid.into(),
            oid: oid.into(),
            size,
        })
    }

    pub fn remove(&mut self, cid: impl Into<String>, oid: impl Into<String>) -> &mut Self {
        self.push(Mutation::Remove {
            cid: cid.into(),
            oid: oid.into(),
        })
    }

    pub fn clone_object(
        &mut self,
        cid: impl Into<String>,
        oid: impl Into<String>,
        dst: impl Into<String>,
    ) -> &mut Self {
        self.push(Mutation::Clone {
            cid: cid.into(),
            oid: oid.into(),
            dst: dst.into(),
        })
    }

    pub fn setattr(
        &mut self,
        cid: impl Into<String>,
        oid: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.push(Mutation::SetAttr {
            cid: cid.into(),
            oid: oid.into(),
            name: name.into(),
            value: value.into(),
        })
    }

    pub fn rmattr(
        &mut self,
        cid: impl Into<String>,
        oid: impl Into<String>,
        name: impl Into<String>,
    ) -> &mut Self {
        self.push(Mutation::RmAttr {
            cid: cid.into(),
            oid: oid.into(),
            name: name.into(),
        })
    }

    pub fn collection_add(
        &mut self,
        cid: impl Into<String>,
        src_cid: impl Into<String>,
        oid: impl Into<String>,
    ) -> &mut Self {
        self.push(Mutation::CollectionAdd {
            cid: cid.into(),
            src_cid: src_cid.into(),
            oid: oid.into(),
        })
    }
}

/// Encode a transaction list as a journal payload
pub fn encode_transactions(transactions: &[Transaction]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(transactions)
}

/// Decode a journal payload back into its transaction list
pub fn decode_transactions(payload: &[u8]) -> serde_json::Result<Vec<Transaction>> {
    serde_json::from_slice(payload)
}
