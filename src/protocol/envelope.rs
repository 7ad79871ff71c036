//! Envelope carrying a correlated inner value

use serde::{Deserialize, Serialize};

use super::TypeCode;

/// Correlation identifier chosen by the requester and echoed by the responder.
///
/// 16 bits wide on the wire; allocation wraps silently.
pub type CorrelationId = u16;

/// Wire wrapper (type code 0) pairing a correlation id with an already
/// encoded inner value.
///
/// The inner value is kept in its encoded form; it is resolved against the
/// registry only when the envelope is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "RequestID")]
    correlation_id: CorrelationId,
    #[serde(rename = "Type")]
    inner_type_code: TypeCode,
    #[serde(rename = "Data")]
    inner_data: String,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(
        correlation_id: CorrelationId,
        inner_type_code: TypeCode,
        inner_data: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            inner_type_code,
            inner_data: inner_data.into(),
        }
    }

    /// Get correlation ID
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Get the type code of the wrapped value
    #[must_use]
    pub const fn inner_type_code(&self) -> TypeCode {
        self.inner_type_code
    }

    /// Get the encoded wrapped value
    #[must_use]
    pub fn inner_data(&self) -> &str {
        &self.inner_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_keys() {
        let envelope = Envelope::new(7, 3, r#"{"id":1}"#);
        let json = serde_json::to_string(&envelope).unwrap();

        assert_eq!(json, r#"{"RequestID":7,"Type":3,"Data":"{\"id\":1}"}"#);
    }

    #[test]
    fn test_envelope_rejects_wide_correlation_id() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"RequestID":70000,"Type":1,"Data":""}"#);
        assert!(result.is_err());
    }
}
