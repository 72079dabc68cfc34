//! Hybrid logical timestamps.
//!
//! A timestamp is `(millis, counter, node)`. The derived ordering compares the
//! fields in that order, which gives a total order across all clients.
//!
//! The canonical text form is fixed width, so comparing two encoded
//! timestamps as strings agrees with comparing them as values:
//!
//! ```text
//! 2024-03-01T09:30:00.000Z-002A-7B3F00C1D2E4A9F0
//! ```

use crate::{error::Result, Error, NodeId};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a node identifier in hex characters.
pub const NODE_LEN: usize = 16;

/// Largest representable millis (9999-12-31T23:59:59.999Z). Keeps the text form fixed width.
pub const MAX_MILLIS: u64 = 253_402_300_799_999;

const TEXT_LEN: usize = 24 + 1 + 4 + 1 + NODE_LEN;

/// A point in hybrid logical time, owned by one client node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp {
    millis: u64,
    counter: u16,
    node: NodeId,
}

impl Timestamp {
    /// Create a timestamp, validating the node id and millis range.
    pub fn new(millis: u64, counter: u16, node: impl Into<NodeId>) -> Result<Self> {
        let node = node.into();
        if millis > MAX_MILLIS {
            return Err(Error::InvalidTimestamp(format!(
                "millis {millis} out of range"
            )));
        }
        validate_node(&node)?;
        Ok(Self {
            millis,
            counter,
            node,
        })
    }

    /// The epoch-zero sentinel, ordered before every real timestamp.
    pub fn zero() -> Self {
        Self {
            millis: 0,
            counter: 0,
            node: "0".repeat(NODE_LEN),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

fn validate_node(node: &str) -> Result<()> {
    if node.len() != NODE_LEN || !node.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidTimestamp(format!(
            "node id must be {NODE_LEN} hex characters, got '{node}'"
        )));
    }
    Ok(())
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Constructors cap millis at MAX_MILLIS, which chrono can always represent.
        let time = DateTime::from_timestamp_millis(self.millis as i64).unwrap_or_default();
        write!(
            f,
            "{}-{:04X}-{}",
            time.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.counter,
            self.node
        )
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTimestamp(s.to_string());
        if s.len() != TEXT_LEN || !s.is_ascii() {
            return Err(invalid());
        }

        let (time, rest) = s.split_at(24);
        let rest = rest.strip_prefix('-').ok_or_else(invalid)?;
        let (counter, rest) = rest.split_at(4);
        let node = rest.strip_prefix('-').ok_or_else(invalid)?;

        let time = time.strip_suffix('Z').ok_or_else(invalid)?;
        let parsed =
            NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M:%S%.3f").map_err(|_| invalid())?;
        let millis = u64::try_from(parsed.and_utc().timestamp_millis()).map_err(|_| invalid())?;

        if !counter.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let counter = u16::from_str_radix(counter, 16).map_err(|_| invalid())?;

        Timestamp::new(millis, counter, node)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}
