//! File and chunk documents, and the index keys computed over them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use regrid_doc_store::{DocumentId, IndexKey, IndexKeyError, Value};
use serde::Serialize;

use crate::path::FilePath;

/// Field names as stored.
pub mod fields {
    pub const ID: &str = "id";
    pub const STATUS: &str = "status";
    pub const FILE_NAME: &str = "file_name";
    pub const STARTED_AT: &str = "started_at";
    pub const FINISHED_AT: &str = "finished_at";
    pub const CHUNK_SIZE_BYTES: &str = "chunk_size_bytes";
    pub const LENGTH: &str = "length";
    pub const FILE_ID: &str = "file_id";
    pub const NUM: &str = "num";
    pub const DATA: &str = "data";
}

/// A stored document did not have the expected shape.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocumentError {
    #[error("missing field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' has an unexpected value")]
    BadField { field: &'static str },
}

/// Upload status of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Incomplete,
    Complete,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Incomplete => "incomplete",
            FileStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incomplete" => Some(FileStatus::Incomplete),
            "complete" => Some(FileStatus::Complete),
            _ => None,
        }
    }
}

/// The metadata record of one upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDocument {
    pub id: DocumentId,
    pub status: FileStatus,
    pub file_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub chunk_size_bytes: u64,
    pub length: Option<u64>,
}

impl FileDocument {
    /// The document inserted when an upload starts.
    pub(crate) fn new_value(file_name: &FilePath, chunk_size: usize) -> Value {
        [
            (fields::STATUS, Value::from(FileStatus::Incomplete.as_str())),
            (fields::FILE_NAME, Value::from(file_name.to_string())),
            (fields::STARTED_AT, Value::ServerTime),
            (fields::CHUNK_SIZE_BYTES, Value::Integer(chunk_size as i64)),
        ]
        .into_iter()
        .collect()
    }

    /// The partial update that marks an upload finished.
    pub(crate) fn completion_value(length: u64) -> Value {
        [
            (fields::STATUS, Value::from(FileStatus::Complete.as_str())),
            (fields::LENGTH, Value::Integer(length as i64)),
            (fields::FINISHED_AT, Value::ServerTime),
        ]
        .into_iter()
        .collect()
    }

    pub fn from_value(id: DocumentId, value: &Value) -> Result<Self, DocumentError> {
        let status = required(value, fields::STATUS)?
            .as_str()
            .and_then(FileStatus::parse)
            .ok_or(DocumentError::BadField {
                field: fields::STATUS,
            })?;
        let file_name = required_str(value, fields::FILE_NAME)?.to_string();
        let started_at = required(value, fields::STARTED_AT)?
            .as_timestamp()
            .ok_or(DocumentError::BadField {
                field: fields::STARTED_AT,
            })?;
        let finished_at = optional(value, fields::FINISHED_AT)
            .map(|v| {
                v.as_timestamp().ok_or(DocumentError::BadField {
                    field: fields::FINISHED_AT,
                })
            })
            .transpose()?;
        let chunk_size_bytes = required_u64(value, fields::CHUNK_SIZE_BYTES)?;
        let length = optional(value, fields::LENGTH)
            .map(|v| as_u64(v, fields::LENGTH))
            .transpose()?;

        Ok(FileDocument {
            id,
            status,
            file_name,
            started_at,
            finished_at,
            chunk_size_bytes,
            length,
        })
    }
}

/// One slice of a file's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDocument {
    pub file_id: DocumentId,
    /// Zero-based position of this chunk in the file.
    pub num: u64,
    pub data: Bytes,
}

impl ChunkDocument {
    pub fn into_value(self) -> Value {
        [
            (fields::FILE_ID, Value::from(self.file_id)),
            (fields::NUM, Value::Integer(self.num as i64)),
            (fields::DATA, Value::Bytes(self.data)),
        ]
        .into_iter()
        .collect()
    }

    pub fn from_value(value: &Value) -> Result<Self, DocumentError> {
        let file_id = DocumentId::new(required_str(value, fields::FILE_ID)?);
        let num = required_u64(value, fields::NUM)?;
        let data = required(value, fields::DATA)?
            .as_bytes()
            .cloned()
            .ok_or(DocumentError::BadField {
                field: fields::DATA,
            })?;
        Ok(ChunkDocument { file_id, num, data })
    }
}

fn optional<'a>(value: &'a Value, field: &'static str) -> Option<&'a Value> {
    value.field(field).filter(|v| !v.is_null())
}

fn required<'a>(value: &'a Value, field: &'static str) -> Result<&'a Value, DocumentError> {
    optional(value, field).ok_or(DocumentError::MissingField { field })
}

fn required_str<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, DocumentError> {
    required(value, field)?
        .as_str()
        .ok_or(DocumentError::BadField { field })
}

fn required_u64(value: &Value, field: &'static str) -> Result<u64, DocumentError> {
    as_u64(required(value, field)?, field)
}

fn as_u64(value: &Value, field: &'static str) -> Result<u64, DocumentError> {
    value
        .as_i64()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or(DocumentError::BadField { field })
}

// Index keys

/// Key of the file index: `[status, file_name, finished_at]`.
///
/// Incomplete files have no `finished_at` yet and are keyed with `null`
/// there, so the index also finds abandoned uploads.
pub fn file_index_key(doc: &Value) -> Result<IndexKey, IndexKeyError> {
    Ok(vec![
        key_field(doc, fields::STATUS)?,
        key_field(doc, fields::FILE_NAME)?,
        doc.field(fields::FINISHED_AT).cloned().unwrap_or(Value::Null),
    ])
}

/// Key of the prefix index: `[directory components, finished_at]`.
///
/// Only complete files have a prefix key. For anything else the computation
/// fails, which keeps partially uploaded files out of directory listings.
pub fn prefix_index_key(doc: &Value) -> Result<IndexKey, IndexKeyError> {
    let status = key_field(doc, fields::STATUS)?;
    if status.as_str() != Some(FileStatus::Complete.as_str()) {
        return Err(IndexKeyError::rejected("File is still uploading."));
    }

    let file_name = key_field(doc, fields::FILE_NAME)?;
    let file_name = file_name.as_str().ok_or(IndexKeyError::WrongType {
        field: fields::FILE_NAME.to_string(),
        expected: "string",
    })?;
    let path = FilePath::parse(file_name).map_err(|e| IndexKeyError::rejected(e.to_string()))?;
    let directory: Vec<Value> = path
        .directory()
        .iter()
        .map(|c| Value::from(c.as_str()))
        .collect();

    Ok(vec![
        Value::Array(directory),
        key_field(doc, fields::FINISHED_AT)?,
    ])
}

/// Key of the chunk index: `[file_id, num]`.
pub fn chunk_index_key(doc: &Value) -> Result<IndexKey, IndexKeyError> {
    Ok(vec![
        key_field(doc, fields::FILE_ID)?,
        key_field(doc, fields::NUM)?,
    ])
}

fn key_field(doc: &Value, field: &str) -> Result<Value, IndexKeyError> {
    doc.field(field)
        .cloned()
        .ok_or_else(|| IndexKeyError::MissingField {
            field: field.to_string(),
        })
}
