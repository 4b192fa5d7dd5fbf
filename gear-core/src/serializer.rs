//! Pluggable payload serialization.
//!
//! The wire only carries bytes. A [`Serializer`] turns caller payloads into
//! those bytes on the way out (`dumps`) and back on the way in (`loads`).
//! Engines hold one as `Arc<dyn Serializer>`, so anything lacking either
//! operation is rejected when it is set rather than when a job runs.

use std::sync::Arc;

use crate::error::GearError;

pub trait Serializer: Send + Sync {
    fn dumps(&self, value: &[u8]) -> Result<Vec<u8>, GearError>;
    fn loads(&self, bytes: &[u8]) -> Result<Vec<u8>, GearError>;
}

/// Default serializer: bytes pass through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Serializer for Passthrough {
    fn dumps(&self, value: &[u8]) -> Result<Vec<u8>, GearError> {
        Ok(value.to_vec())
    }

    fn loads(&self, bytes: &[u8]) -> Result<Vec<u8>, GearError> {
        Ok(bytes.to_vec())
    }
}

/// Rejects payloads that are not valid UTF-8 in either direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Text;

impl Serializer for Utf8Text {
    fn dumps(&self, value: &[u8]) -> Result<Vec<u8>, GearError> {
        std::str::from_utf8(value).map_err(|e| GearError::Serialization(e.to_string()))?;
        Ok(value.to_vec())
    }

    fn loads(&self, bytes: &[u8]) -> Result<Vec<u8>, GearError> {
        self.dumps(bytes)
    }
}

pub(crate) fn default_serializer() -> Arc<dyn Serializer> {
    Arc::new(Passthrough)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_is_identity() {
        let s = Passthrough;
        let data = b"\0binary\xff".to_vec();
        assert_eq!(s.loads(&s.dumps(&data).unwrap()).unwrap(), data);
    }

    #[test]
    fn utf8_rejects_binary() {
        let s = Utf8Text;
        assert_eq!(s.dumps("héllo".as_bytes()).unwrap(), "héllo".as_bytes());
        assert!(matches!(
            s.loads(b"\xff\xfe"),
            Err(GearError::Serialization(_))
        ));
    }
}
