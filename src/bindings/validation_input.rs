//! Parser for the textual message description used by validation corpora.
//!
//! An input is a whitespace separated list of `[type]value` items. `//`
//! starts a comment that runs to the end of the line.
//!
//! | item            | output                                          |
//! |-----------------|-------------------------------------------------|
//! | `[u1]`..`[u8]`  | unsigned little-endian integer of 1..8 bytes    |
//! | `[s1]`..`[s8]`  | signed little-endian integer of 1..8 bytes      |
//! | `[f]` / `[d]`   | `f32` / `f64`                                   |
//! | `[b]00000101`   | one byte written in binary, most significant bit first |
//! | `[dist4]id`     | `u32` distance from here to the matching anchor |
//! | `[dist8]id`     | `u64` distance from here to the matching anchor |
//! | `[anchr]id`     | marks the target of `[distN]id`                 |
//! | `[handles]n`    | the message carries `n` handles                 |

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputParseError {
    #[error("malformed item: {0}")]
    MalformedItem(String),

    #[error("unknown item type: [{0}]")]
    UnknownType(String),

    #[error("invalid value for [{kind}]: {value}")]
    InvalidValue { kind: String, value: String },

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("anchor without a distance: {0}")]
    UnmatchedAnchor(String),

    #[error("distance without an anchor: {0}")]
    UnmatchedDistance(String),

    #[error("distance {0} points backwards or overflows its width")]
    BadDistance(String),

    #[error("[handles] given more than once")]
    DuplicateHandles,
}

/// Bytes and handle count described by one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationInput {
    pub data: Vec<u8>,
    pub num_handles: usize,
}

struct PendingDistance {
    at: usize,
    width: usize,
}

/// Parses `text` into the bytes and handle count it describes.
pub fn parse_validation_input(text: &str) -> Result<ValidationInput, InputParseError> {
    let mut data = Vec::new();
    let mut num_handles = None;
    let mut distances: HashMap<String, PendingDistance> = HashMap::new();
    let mut anchors: HashSet<String> = HashSet::new();

    let items = text
        .lines()
        .map(|line| line.split("//").next().unwrap_or(""))
        .flat_map(str::split_whitespace);

    for item in items {
        let (kind, value) = split_item(item)?;
        let bad_value = || InputParseError::InvalidValue {
            kind: kind.to_string(),
            value: value.to_string(),
        };

        match kind {
            "u1" => push_unsigned::<u8>(&mut data, value).ok_or_else(bad_value)?,
            "u2" => push_unsigned::<u16>(&mut data, value).ok_or_else(bad_value)?,
            "u4" => push_unsigned::<u32>(&mut data, value).ok_or_else(bad_value)?,
            "u8" => push_unsigned::<u64>(&mut data, value).ok_or_else(bad_value)?,
            "s1" => push_signed::<i8>(&mut data, value).ok_or_else(bad_value)?,
            "s2" => push_signed::<i16>(&mut data, value).ok_or_else(bad_value)?,
            "s4" => push_signed::<i32>(&mut data, value).ok_or_else(bad_value)?,
            "s8" => push_signed::<i64>(&mut data, value).ok_or_else(bad_value)?,
            "f" => data.extend_from_slice(&value.parse::<f32>().map_err(|_| bad_value())?.to_le_bytes()),
            "d" => data.extend_from_slice(&value.parse::<f64>().map_err(|_| bad_value())?.to_le_bytes()),
            "b" => {
                if value.len() != 8 {
                    return Err(bad_value());
                }
                data.push(u8::from_str_radix(value, 2).map_err(|_| bad_value())?);
            }
            "dist4" | "dist8" => {
                let width = if kind == "dist4" { 4 } else { 8 };
                if distances.contains_key(value) {
                    return Err(InputParseError::DuplicateId(value.to_string()));
                }
                distances.insert(value.to_string(), PendingDistance { at: data.len(), width });
                data.resize(data.len() + width, 0);
            }
            "anchr" => {
                if !anchors.insert(value.to_string()) {
                    return Err(InputParseError::DuplicateId(value.to_string()));
                }
                let pending = distances
                    .remove(value)
                    .ok_or_else(|| InputParseError::UnmatchedAnchor(value.to_string()))?;
                let distance = (data.len() - pending.at) as u64;
                let out = &mut data[pending.at..pending.at + pending.width];
                if pending.width == 4 {
                    let distance = u32::try_from(distance)
                        .map_err(|_| InputParseError::BadDistance(value.to_string()))?;
                    out.copy_from_slice(&distance.to_le_bytes());
                } else {
                    out.copy_from_slice(&distance.to_le_bytes());
                }
            }
            "handles" => {
                if num_handles.is_some() {
                    return Err(InputParseError::DuplicateHandles);
                }
                num_handles = Some(value.parse::<usize>().map_err(|_| bad_value())?);
            }
            other => return Err(InputParseError::UnknownType(other.to_string())),
        }
    }

    if let Some(id) = distances.into_keys().next() {
        return Err(InputParseError::UnmatchedDistance(id));
    }

    Ok(ValidationInput {
        data,
        num_handles: num_handles.unwrap_or(0),
    })
}

/// Integer types the parser can emit.
trait LeBytes: Sized {
    fn extend_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_le_bytes {
    ($($ty:ty),*) => {$(
        impl LeBytes for $ty {
            fn extend_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    )*};
}

impl_le_bytes!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Decimal or `0x` hexadecimal.
fn parse_u64(value: &str) -> Option<u64> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn push_unsigned<T: LeBytes + TryFrom<u64>>(out: &mut Vec<u8>, value: &str) -> Option<()> {
    let n = T::try_from(parse_u64(value)?).ok()?;
    n.extend_le(out);
    Some(())
}

fn push_signed<T: LeBytes + TryFrom<i64>>(out: &mut Vec<u8>, value: &str) -> Option<()> {
    let n = match value.strip_prefix('-') {
        Some(magnitude) => 0i64.checked_sub_unsigned(parse_u64(magnitude)?)?,
        None => i64::try_from(parse_u64(value)?).ok()?,
    };
    T::try_from(n).ok()?.extend_le(out);
    Some(())
}

fn split_item(item: &str) -> Result<(&str, &str), InputParseError> {
    item.strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .filter(|(kind, _)| !kind.is_empty())
        .ok_or_else(|| InputParseError::MalformedItem(item.to_string()))
}
