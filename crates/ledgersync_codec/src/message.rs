//! Field mutation messages and their binary codec.
//!
//! Wire layout (all integers big-endian):
//!
//! ```text
//! [version:1][timestamp:12][dataset][row][column][tag:1][value]
//!
//! identifier := [len:u16][utf-8 bytes]
//! value      := null: ()  bool: [0|1]  integer: i64  float: f64 bits
//!               string: [len:u32][utf-8]  bytes: [len:u32][raw]
//! ```
//!
//! Decoding is strict: an unknown version fails with
//! [`CodecError::UnsupportedVersion`], and truncation, an unknown tag, invalid
//! UTF-8, a bool byte other than 0/1, or trailing bytes fail with
//! [`CodecError::MalformedMessage`].

use crate::error::{CodecError, CodecResult};
use crate::reader::Reader;
use crate::timestamp::{Timestamp, TIMESTAMP_LEN};
use crate::value::{tag, Value};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Version byte written at the front of every encoded message.
pub const MESSAGE_FORMAT_VERSION: u8 = 1;

/// One field mutation: `dataset.row.column = value` as of `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Causal timestamp; also the identity of the message.
    pub timestamp: Timestamp,
    /// Logical table, e.g. `categories`.
    pub dataset: String,
    /// Record identifier.
    pub row: String,
    /// Field identifier.
    pub column: String,
    /// New value of the field.
    pub value: Value,
}

impl Message {
    /// Creates a message.
    pub fn new(
        timestamp: Timestamp,
        dataset: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            timestamp,
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    /// Returns true if both messages write the same field.
    #[must_use]
    pub fn same_field(&self, other: &Self) -> bool {
        self.dataset == other.dataset && self.row == other.row && self.column == other.column
    }

    /// Encodes the message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FieldTooLong`] if an identifier exceeds 65 535
    /// bytes or a string/bytes value exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(
            1 + TIMESTAMP_LEN
                + 6
                + self.dataset.len()
                + self.row.len()
                + self.column.len()
                + 1
                + 8,
        );
        out.put_u8(MESSAGE_FORMAT_VERSION);
        self.timestamp.write(&mut out);
        put_ident(&mut out, "dataset", &self.dataset)?;
        put_ident(&mut out, "row", &self.row)?;
        put_ident(&mut out, "column", &self.column)?;

        out.put_u8(self.value.tag());
        match &self.value {
            Value::Null => {}
            Value::Bool(b) => out.put_u8(u8::from(*b)),
            Value::Integer(i) => out.put_i64(*i),
            Value::Float(x) => out.put_f64(*x),
            Value::String(s) => put_blob(&mut out, "string value", s.as_bytes())?,
            Value::Bytes(b) => put_blob(&mut out, "bytes value", b)?,
        }
        Ok(out)
    }

    /// Decodes a message.
    ///
    /// # Errors
    ///
    /// See the module docs for the failure modes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8("format version")?;
        if version != MESSAGE_FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                expected: MESSAGE_FORMAT_VERSION,
            });
        }

        let timestamp = Timestamp::read(&mut reader)?;
        let dataset = read_ident(&mut reader, "dataset")?;
        let row = read_ident(&mut reader, "row")?;
        let column = read_ident(&mut reader, "column")?;

        let value = match reader.u8("value tag")? {
            tag::NULL => Value::Null,
            tag::BOOL => match reader.u8("bool value")? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(CodecError::malformed(format!(
                        "bool value byte {other:#04x}"
                    )))
                }
            },
            tag::INTEGER => Value::Integer(reader.i64("integer value")?),
            tag::FLOAT => Value::Float(reader.f64("float value")?),
            tag::STRING => {
                let raw = read_blob(&mut reader, "string value")?;
                Value::String(utf8(raw, "string value")?)
            }
            tag::BYTES => Value::Bytes(read_blob(&mut reader, "bytes value")?.to_vec()),
            other => {
                return Err(CodecError::malformed(format!(
                    "unknown value tag {other:#04x}"
                )))
            }
        };

        reader.finish("message")?;
        Ok(Self {
            timestamp,
            dataset,
            row,
            column,
            value,
        })
    }
}

fn put_ident(out: &mut Vec<u8>, field: &'static str, ident: &str) -> CodecResult<()> {
    let len = u16::try_from(ident.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: ident.len(),
    })?;
    out.put_u16(len);
    out.put_slice(ident.as_bytes());
    Ok(())
}

fn put_blob(out: &mut Vec<u8>, field: &'static str, blob: &[u8]) -> CodecResult<()> {
    let len = u32::try_from(blob.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: blob.len(),
    })?;
    out.put_u32(len);
    out.put_slice(blob);
    Ok(())
}

fn read_ident(reader: &mut Reader<'_>, what: &str) -> CodecResult<String> {
    let len = reader.u16(what)?;
    let raw = reader.bytes(usize::from(len), what)?;
    utf8(raw, what)
}

fn read_blob<'a>(reader: &mut Reader<'a>, what: &str) -> CodecResult<&'a [u8]> {
    let len = reader.u32(what)?;
    let len = usize::try_from(len).map_err(|_| CodecError::malformed(format!("{what} length")))?;
    reader.bytes(len, what)
}

fn utf8(raw: &[u8], what: &str) -> CodecResult<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| CodecError::malformed(format!("{what} is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::NodeId;
    use proptest::prelude::*;

    fn ts(millis: u64) -> Timestamp {
        Timestamp::new(millis, NodeId::new(0x1234), 0)
    }

    fn sample() -> Message {
        Message::new(ts(1_704_067_200_000), "categories", "cat1", "name", "Groceries")
    }

    #[test]
    fn encodes_documented_layout() {
        let msg = Message::new(ts(1), "a", "b", "c", Value::Bool(true));
        let bytes = msg.encode().unwrap();

        let mut expected = vec![MESSAGE_FORMAT_VERSION];
        expected.extend_from_slice(&ts(1).to_bytes());
        expected.extend_from_slice(&[0, 1, b'a', 0, 1, b'b', 0, 1, b'c']);
        expected.extend_from_slice(&[tag::BOOL, 1]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn every_value_kind_decodes() {
        for value in [
            Value::Null,
            Value::Bool(false),
            Value::Integer(-4_250),
            Value::Float(12.5),
            Value::from("Food"),
            Value::Bytes(vec![0, 255, 7]),
            Value::from(""),
        ] {
            let msg = Message::new(ts(42), "transactions", "t-1", "amount", value);
            assert_eq!(Message::decode(&msg.encode().unwrap()).unwrap(), msg);
        }
    }

    #[test]
    fn every_truncation_is_malformed() {
        let bytes = sample().encode().unwrap();
        for cut in 0..bytes.len() {
            let err = Message::decode(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, CodecError::MalformedMessage { .. }),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            Message::decode(&bytes),
            Err(CodecError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let mut bytes = Message::new(ts(1), "a", "b", "c", Value::Null).encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 9;
        let err = Message::decode(&bytes).unwrap_err();
        assert_eq!(err, CodecError::malformed("unknown value tag 0x09"));
    }

    #[test]
    fn bad_bool_byte_is_malformed() {
        let mut bytes = Message::new(ts(1), "a", "b", "c", true).encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 2;
        assert!(Message::decode(&bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut bytes = Message::new(ts(1), "a", "b", "c", Value::Null).encode().unwrap();
        // dataset byte sits right after version + timestamp + u16 length
        bytes[1 + TIMESTAMP_LEN + 2] = 0xff;
        assert!(matches!(
            Message::decode(&bytes),
            Err(CodecError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn version_mismatch_fails_closed() {
        let mut bytes = sample().encode().unwrap();
        bytes[0] = 2;
        assert_eq!(
            Message::decode(&bytes).unwrap_err(),
            CodecError::UnsupportedVersion {
                found: 2,
                expected: 1
            }
        );
    }

    #[test]
    fn oversized_identifier_is_rejected() {
        let msg = Message::new(ts(1), "d".repeat(70_000), "r", "c", Value::Null);
        assert!(matches!(
            msg.encode(),
            Err(CodecError::FieldTooLong { field: "dataset", .. })
        ));
    }

    #[test]
    fn same_field() {
        let a = sample();
        let mut b = sample();
        b.value = Value::from("Food");
        assert!(a.same_field(&b));
        b.column = "group".into();
        assert!(!a.same_field(&b));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>()
                .prop_filter("NaN never equals itself", |x| !x.is_nan())
                .prop_map(Value::Float),
            ".{0,40}".prop_map(Value::String),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
        ]
    }

    prop_compose! {
        fn arb_message()(
            millis in any::<u64>(),
            node in any::<u16>(),
            counter in any::<u16>(),
            dataset in "[a-z_]{1,16}",
            row in "[A-Za-z0-9-]{0,36}",
            column in ".{0,12}",
            value in arb_value(),
        ) -> Message {
            Message::new(Timestamp::new(millis, NodeId::new(node), counter), dataset, row, column, value)
        }
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(msg in arb_message()) {
            let bytes = msg.encode().unwrap();
            prop_assert_eq!(Message::decode(&bytes).unwrap(), msg);
        }

        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = Message::decode(&bytes);
        }
    }
}
