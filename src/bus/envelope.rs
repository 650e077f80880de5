//! Count notification wire format.
//!
//! Every count change is published as a two-level JSON document:
//!
//! ```text
//! {"channel": "<user_id>", "data": "{\"unread_count\": 3, \"unseen_count\": 3}"}
//! ```
//!
//! The inner message is itself a JSON string. Consumers route on `channel`
//! and decode `data` separately. Encoding uses `", "` and `": "` separators
//! and escapes non-ASCII characters, matching the payloads existing
//! consumers already parse.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;

use super::Result;

/// Count payload carried in the envelope's `data` field.
///
/// Both fields always carry the same value; `unread_count` is kept for
/// consumers that predate the seen/read split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMessage {
    pub unread_count: u64,
    pub unseen_count: u64,
}

impl CountMessage {
    pub fn new(count: u64) -> Self {
        Self {
            unread_count: count,
            unseen_count: count,
        }
    }

    pub fn encode(&self) -> Result<String> {
        encode_spaced(self)
    }

    pub fn decode(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Outer envelope published on the shared main channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEnvelope {
    /// Per-user routing key.
    pub channel: String,
    /// Encoded [`CountMessage`].
    pub data: String,
}

impl CountEnvelope {
    /// Build the envelope announcing `count` on `channel`.
    pub fn for_count(channel: impl Into<String>, count: u64) -> Result<Self> {
        Ok(Self {
            channel: channel.into(),
            data: CountMessage::new(count).encode()?,
        })
    }

    pub fn encode(&self) -> Result<String> {
        encode_spaced(self)
    }

    /// Parse an envelope. Accepts both the spaced and the compact encoding.
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Decode the inner count message.
    pub fn message(&self) -> Result<CountMessage> {
        CountMessage::decode(&self.data)
    }
}

fn encode_spaced<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::with_capacity(64);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut serializer)?;
    // Output is ASCII-only
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Single-line JSON with a space after `,` and `:`, non-ASCII escaped as `\uXXXX`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}
