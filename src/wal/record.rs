//! Log record payloads.
//!
//! ```text
//! insert: [0][xid:8][page:4][offset:2][raw]
//! update: [1][xid:8][uid:8][old raw][new raw]
//! ```
//!
//! Old and new images of an update always have the same length.

use crate::error::{Result, StorageError};
use crate::types::{PageId, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

const OFFSET_XID: usize = 1;
const OFFSET_INSERT_PAGE: usize = OFFSET_XID + 8;
const OFFSET_INSERT_OFFSET: usize = OFFSET_INSERT_PAGE + 4;
const OFFSET_INSERT_RAW: usize = OFFSET_INSERT_OFFSET + 2;
const OFFSET_UPDATE_UID: usize = OFFSET_XID + 8;
const OFFSET_UPDATE_RAW: usize = OFFSET_UPDATE_UID + 8;

/// A decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert {
        xid: Xid,
        page_id: PageId,
        offset: u16,
        raw: Vec<u8>,
    },
    Update {
        xid: Xid,
        uid: Uid,
        old_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },
}

impl LogRecord {
    /// Encode an insert record without building a `LogRecord`
    pub fn encode_insert(xid: Xid, page_id: PageId, offset: u16, raw: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(OFFSET_INSERT_RAW + raw.len());
        buf.push(TYPE_INSERT);
        buf.extend_from_slice(&xid.to_be_bytes());
        buf.extend_from_slice(&page_id.value().to_be_bytes());
        buf.extend_from_slice(&offset.to_be_bytes());
        buf.extend_from_slice(raw);
        buf
    }

    /// Encode an update record without building a `LogRecord`
    pub fn encode_update(xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(OFFSET_UPDATE_RAW + old_raw.len() + new_raw.len());
        buf.push(TYPE_UPDATE);
        buf.extend_from_slice(&xid.to_be_bytes());
        buf.extend_from_slice(&uid.value().to_be_bytes());
        buf.extend_from_slice(old_raw);
        buf.extend_from_slice(new_raw);
        buf
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Insert {
                xid,
                page_id,
                offset,
                raw,
            } => Self::encode_insert(*xid, *page_id, *offset, raw),
            Self::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => Self::encode_update(*xid, *uid, old_raw, new_raw),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        match data.first() {
            Some(&TYPE_INSERT) => {
                if data.len() < OFFSET_INSERT_RAW {
                    return Err(StorageError::bad_log("truncated insert record"));
                }
                Ok(Self::Insert {
                    xid: read_u64(data, OFFSET_XID),
                    page_id: PageId::new(u32::from_be_bytes([
                        data[OFFSET_INSERT_PAGE],
                        data[OFFSET_INSERT_PAGE + 1],
                        data[OFFSET_INSERT_PAGE + 2],
                        data[OFFSET_INSERT_PAGE + 3],
                    ])),
                    offset: u16::from_be_bytes([
                        data[OFFSET_INSERT_OFFSET],
                        data[OFFSET_INSERT_OFFSET + 1],
                    ]),
                    raw: data[OFFSET_INSERT_RAW..].to_vec(),
                })
            }
            Some(&TYPE_UPDATE) => {
                if data.len() < OFFSET_UPDATE_RAW || (data.len() - OFFSET_UPDATE_RAW) % 2 != 0 {
                    return Err(StorageError::bad_log("malformed update record"));
                }
                let half = (data.len() - OFFSET_UPDATE_RAW) / 2;
                let new_start = OFFSET_UPDATE_RAW + half;
                Ok(Self::Update {
                    xid: read_u64(data, OFFSET_XID),
                    uid: Uid(read_u64(data, OFFSET_UPDATE_UID)),
                    old_raw: data[OFFSET_UPDATE_RAW..new_start].to_vec(),
                    new_raw: data[new_start..].to_vec(),
                })
            }
            Some(other) => Err(StorageError::bad_log(format!(
                "unknown record type {}",
                other
            ))),
            None => Err(StorageError::bad_log("empty record")),
        }
    }

    pub fn xid(&self) -> Xid {
        match self {
            Self::Insert { xid, .. } | Self::Update { xid, .. } => *xid,
        }
    }

    /// Page the record touches
    pub fn page_id(&self) -> PageId {
        match self {
            Self::Insert { page_id, .. } => *page_id,
            Self::Update { uid, .. } => uid.page_id(),
        }
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(buf)
}
