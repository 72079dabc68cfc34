//! Binary envelope exchanged with the sync server.
//!
//! # Layout
//!
//! ```text
//! magic     4 bytes  "TLY1"
//! length    u32 BE   number of body bytes that follow
//! body      postcard-encoded `{file_id, group_id, since, messages}`
//! ```
//!
//! Inside the body, timestamps travel in their canonical text form and
//! values in their tagged text encoding. The outer length makes the frame
//! self-delimiting: a truncated frame or trailing bytes are both rejected.

use crate::{error::Result, Error, Message, Timestamp, Value};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Frame magic and format version.
pub const MAGIC: &[u8; 4] = b"TLY1";

/// Content type used on the HTTP boundary.
pub const CONTENT_TYPE: &str = "application/actual-sync";

const HEADER_LEN: usize = MAGIC.len() + 4;

/// A batch of messages plus the scope it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub file_id: String,
    pub group_id: String,
    /// Watermark; [`Timestamp::zero`] asks for all history.
    pub since: Timestamp,
    pub messages: Vec<Message>,
}

impl Envelope {
    /// Create a request envelope.
    pub fn new(
        file_id: impl Into<String>,
        group_id: impl Into<String>,
        since: Timestamp,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            group_id: group_id.into(),
            since,
            messages,
        }
    }

    /// Create a response envelope, which carries only messages.
    pub fn response(messages: Vec<Message>) -> Self {
        Self::new("", "", Timestamp::zero(), messages)
    }

    /// Greatest timestamp among the messages, if any.
    pub fn max_timestamp(&self) -> Option<&Timestamp> {
        self.messages.iter().map(|m| &m.timestamp).max()
    }
}

#[derive(Serialize, Deserialize)]
struct Body {
    file_id: String,
    group_id: String,
    since: String,
    messages: Vec<WireMessage>,
}

// Field order is the wire order; the value comes last.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    timestamp: String,
    dataset: String,
    row: String,
    column: String,
    value: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            timestamp: message.timestamp.to_string(),
            dataset: message.dataset.clone(),
            row: message.row.clone(),
            column: message.column.clone(),
            value: message.value.encode(),
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        Ok(Message {
            timestamp: parse_timestamp(&wire.timestamp, "message timestamp")?,
            dataset: wire.dataset,
            row: wire.row,
            column: wire.column,
            value: Value::decode(&wire.value)?,
        })
    }
}

fn parse_timestamp(text: &str, field: &str) -> Result<Timestamp> {
    text.parse()
        .map_err(|e: Error| Error::Decode(format!("{field}: {e}")))
}

/// Encode an envelope into a single frame.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let body = Body {
        file_id: envelope.file_id.clone(),
        group_id: envelope.group_id.clone(),
        since: envelope.since.to_string(),
        messages: envelope.messages.iter().map(WireMessage::from).collect(),
    };
    let body = postcard::to_stdvec(&body).map_err(|e| Error::Decode(e.to_string()))?;

    let body_len = u32::try_from(body.len())
        .map_err(|_| Error::Decode("frame exceeds 4 GiB".into()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.put_slice(MAGIC);
    frame.put_u32(body_len);
    frame.put_slice(&body);
    Ok(frame)
}

/// Decode exactly one frame.
///
/// Nothing is returned unless the whole frame parses.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let mut buf = bytes;
    if buf.len() < HEADER_LEN {
        return Err(Error::Decode(format!(
            "truncated header: {} of {HEADER_LEN} bytes",
            buf.len()
        )));
    }
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(Error::Decode("bad magic".into()));
    }
    buf.advance(MAGIC.len());

    let body_len = buf.get_u32() as usize;
    if buf.len() < body_len {
        return Err(Error::Decode(format!(
            "truncated body: expected {body_len} bytes, got {}",
            buf.len()
        )));
    }
    if buf.len() > body_len {
        return Err(Error::Decode(format!(
            "{} trailing bytes after frame",
            buf.len() - body_len
        )));
    }

    let (body, rest) = postcard::take_from_bytes::<Body>(buf)
        .map_err(|e| Error::Decode(format!("body: {e}")))?;
    if !rest.is_empty() {
        return Err(Error::Decode(format!(
            "{} unread bytes inside frame",
            rest.len()
        )));
    }

    let messages = body
        .messages
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(Envelope {
        file_id: body.file_id,
        group_id: body.group_id,
        since: parse_timestamp(&body.since, "since")?,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64, counter: u16) -> Timestamp {
        Timestamp::new(millis, counter, "7B3F00C1D2E4A9F0").unwrap()
    }

    fn sample() -> Envelope {
        Envelope::new(
            "file-1",
            "group-1",
            ts(500, 0),
            vec![
                Message::new("accounts", "a-1", "name", "Checking", ts(1000, 0)),
                Message::new("accounts", "a-1", "closed", Value::Null, ts(1000, 1)),
                Message::new("transactions", "t-1", "amount", -4200i64, ts(1001, 0)),
                Message::new("payees", "p-1", "name", "S:looks:tagged", ts(1002, 0)),
            ],
        )
    }

    #[test]
    fn roundtrip() {
        let envelope = sample();
        let bytes = encode(&envelope).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn roundtrip_empty() {
        let envelope = Envelope::new("f", "g", Timestamp::zero(), vec![]);
        assert_eq!(decode(&encode(&envelope).unwrap()).unwrap(), envelope);

        let response = Envelope::response(vec![]);
        assert_eq!(decode(&encode(&response).unwrap()).unwrap(), response);
    }

    #[test]
    fn every_truncation_is_rejected() {
        let bytes = encode(&sample()).unwrap();
        for len in 0..bytes.len() {
            assert!(
                matches!(decode(&bytes[..len]), Err(Error::Decode(_))),
                "accepted truncation at {len}"
            );
        }
    }

    #[test]
    fn concatenation_is_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        let again = bytes.clone();
        bytes.extend_from_slice(&again);
        assert!(matches!(decode(&bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn malformed_value_is_reported() {
        let mut envelope = sample();
        envelope.messages.truncate(1);
        let mut bytes = encode(&envelope).unwrap();
        // Flip the value tag "S:" of the only message to "X:".
        let tag_at = bytes.len() - "Checking".len() - 2;
        assert_eq!(&bytes[tag_at..tag_at + 2], b"S:");
        bytes[tag_at] = b'X';
        assert!(matches!(decode(&bytes), Err(Error::MalformedValue(_))));
    }

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut frame = MAGIC.to_vec();
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn inflated_count_is_rejected() {
        let envelope = Envelope::new("f", "g", Timestamp::zero(), vec![]);
        let bytes = encode(&envelope).unwrap();
        // The empty message list is the final varint 0; claim u32::MAX entries.
        let mut body = bytes[HEADER_LEN..bytes.len() - 1].to_vec();
        body.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert!(matches!(decode(&framed(&body)), Err(Error::Decode(_))));
    }

    #[test]
    fn invalid_since_is_rejected() {
        let mut bytes = encode(&Envelope::new("f", "g", ts(1, 0), vec![])).unwrap();
        // since is the last string before the empty message list.
        let at = bytes.len() - 2;
        bytes[at] = b'#';
        assert!(matches!(decode(&bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn body_that_is_not_an_envelope_is_rejected() {
        assert!(matches!(decode(&framed(b"")), Err(Error::Decode(_))));
        assert!(matches!(
            decode(&framed(b"\x03abc\x01")),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn max_timestamp() {
        assert_eq!(sample().max_timestamp(), Some(&ts(1002, 0)));
        assert_eq!(Envelope::response(vec![]).max_timestamp(), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<f64>()
                    .prop_filter("no NaN", |n| !n.is_nan())
                    .prop_map(Value::Number),
                ".*".prop_map(Value::Text),
            ]
        }

        fn arb_message() -> impl Strategy<Value = Message> {
            (
                "[a-z_]{1,12}",
                "[a-z0-9-]{1,36}",
                "[a-z_]{1,16}",
                arb_value(),
                0u64..4_000_000_000_000,
                any::<u16>(),
                "[0-9A-F]{16}",
            )
                .prop_map(|(dataset, row, column, value, millis, counter, node)| {
                    Message::new(
                        dataset,
                        row,
                        column,
                        value,
                        Timestamp::new(millis, counter, node).unwrap(),
                    )
                })
        }

        proptest! {
            #[test]
            fn prop_envelope_roundtrip(
                file_id in ".{0,40}",
                group_id in ".{0,40}",
                messages in prop::collection::vec(arb_message(), 0..20),
            ) {
                let envelope = Envelope::new(file_id, group_id, Timestamp::zero(), messages);
                let decoded = decode(&encode(&envelope).unwrap()).unwrap();
                prop_assert_eq!(decoded.messages.len(), envelope.messages.len());
                for (a, b) in decoded.messages.iter().zip(&envelope.messages) {
                    prop_assert_eq!(&a.timestamp, &b.timestamp);
                    prop_assert_eq!(&a.row, &b.row);
                    match (&a.value, &b.value) {
                        (Value::Number(x), Value::Number(y)) => prop_assert_eq!(x.to_bits(), y.to_bits()),
                        (x, y) => prop_assert_eq!(x, y),
                    }
                }
                prop_assert_eq!(decoded.file_id, envelope.file_id);
            }
        }
    }
}
