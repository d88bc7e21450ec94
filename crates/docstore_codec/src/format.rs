//! Byte encodings for values and serializable records.

use crate::error::{CodecError, CodecResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported byte encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    /// Compact binary encoding (CBOR).
    #[default]
    Cbor,
    /// Human readable JSON.
    Json,
}

impl Encoding {
    /// Encodes a serializable record with this encoding.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::EncodingFailed`] if serialization fails.
    pub fn encode<T: Serialize>(self, value: &T) -> CodecResult<Vec<u8>> {
        match self {
            Encoding::Cbor => to_cbor(value),
            Encoding::Json => {
                serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
            }
        }
    }

    /// Decodes a record previously written with this encoding.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DecodingFailed`] if the bytes are malformed.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> CodecResult<T> {
        match self {
            Encoding::Cbor => from_cbor(bytes),
            Encoding::Json => serde_json::from_slice(bytes)
                .map_err(|e| CodecError::decoding_failed(e.to_string())),
        }
    }

    /// Conventional file extension for this encoding.
    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Cbor => "cbor",
            Encoding::Json => "json",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cbor" => Ok(Encoding::Cbor),
            "json" => Ok(Encoding::Json),
            other => Err(CodecError::decoding_failed(format!(
                "unknown encoding '{other}'"
            ))),
        }
    }
}

/// Encodes a serializable value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR
/// for the target type.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Content, Value};

    #[test]
    fn cbor_preserves_content() {
        let mut content = Content::new();
        content.insert("orderId".into(), Value::from("A1"));
        content.insert("qty".into(), Value::Integer(-3));
        content.insert("raw".into(), Value::Bytes(vec![0, 255]));

        let bytes = to_cbor(&content).unwrap();
        let back: Content = from_cbor(&bytes).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut a = Content::new();
        a.insert("b".into(), Value::Integer(2));
        a.insert("a".into(), Value::Integer(1));
        let mut b = Content::new();
        b.insert("a".into(), Value::Integer(1));
        b.insert("b".into(), Value::Integer(2));

        assert_eq!(to_cbor(&a).unwrap(), to_cbor(&b).unwrap());
        assert_eq!(
            Encoding::Json.encode(&a).unwrap(),
            Encoding::Json.encode(&b).unwrap()
        );
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result: CodecResult<Content> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
        let result: CodecResult<Content> = Encoding::Json.decode(b"{not json");
        assert!(result.is_err());
    }

    #[test]
    fn parse_encoding_names() {
        assert_eq!("CBOR".parse::<Encoding>().unwrap(), Encoding::Cbor);
        assert_eq!("json".parse::<Encoding>().unwrap(), Encoding::Json);
        assert!("xml".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Json.to_string(), "json");
    }
}
