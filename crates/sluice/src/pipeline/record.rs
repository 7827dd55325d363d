//! Records flowing through a delivery stream.

use bytes::Bytes;
use uuid::Uuid;

/// One payload accepted onto a delivery stream's intake.
///
/// Ids are fresh per record, even for identical payloads.
#[derive(Debug, Clone)]
pub struct Record {
    id: String,
    payload: Bytes,
}

impl Record {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
