//! # lodestone-wire: The binary operation codec
//!
//! Operations cross the client/substrate boundary as framed binary records
//! with stable numeric codes. The layout is fixed by the protocol — it is
//! written out explicitly rather than derived, because foreign
//! implementations must be able to produce and parse it byte-for-byte.
//!
//! ## Frame layout
//!
//! All integers are little-endian. A frame is a `u16` operation code
//! followed by the operation body. Query bodies are prefixed by one byte:
//! the consistency ordinal. Byte-string fields are a `u32` length followed
//! by the raw bytes; options are a `0`/`1` tag byte. TTL commands append a
//! persistence ordinal byte and an `i64` ttl in milliseconds after the
//! key/value pair.
//!
//! ## Operation codes
//!
//! Map: `ContainsKey` 440, `Put` 441, `PutIfAbsent` 442, `Get` 443,
//! `GetOrDefault` 444, `Remove` 445, `IsEmpty` 446, `Size` 447,
//! `Clear` 448. Group: `Join` 460, `Leave` 461, `Listen` 462,
//! `Submit` 463, `Ack` 464.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use lodestone_group::{DeliveryPolicy, Dispatch, GroupCommand, SubmitRequest};
use lodestone_map::{MapCommand, MapOperation, MapQuery};
use lodestone_types::{ConsistencyLevel, LogIndex, MemberId, Persistence, Ttl};

// ============================================================================
// Operation codes
// ============================================================================

pub const OP_CONTAINS_KEY: u16 = 440;
pub const OP_PUT: u16 = 441;
pub const OP_PUT_IF_ABSENT: u16 = 442;
pub const OP_GET: u16 = 443;
pub const OP_GET_OR_DEFAULT: u16 = 444;
pub const OP_REMOVE: u16 = 445;
pub const OP_IS_EMPTY: u16 = 446;
pub const OP_SIZE: u16 = 447;
pub const OP_CLEAR: u16 = 448;

pub const OP_JOIN: u16 = 460;
pub const OP_LEAVE: u16 = 461;
pub const OP_LISTEN: u16 = 462;
pub const OP_SUBMIT: u16 = 463;
pub const OP_ACK: u16 = 464;

// ============================================================================
// Errors
// ============================================================================

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown operation code {0}")]
    UnknownOperation(u16),

    #[error("truncated frame")]
    Truncated,

    #[error("invalid {field} ordinal {value}")]
    InvalidOrdinal { field: &'static str, value: u8 },

    #[error("negative ttl {0}")]
    NegativeTtl(i64),

    #[error("{field} is not valid utf-8")]
    InvalidText { field: &'static str },

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

// ============================================================================
// Primitive readers / writers
// ============================================================================

fn need(buf: &impl Buf, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Truncated);
    }
    Ok(())
}

fn get_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> Result<u16, WireError> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn get_u64(buf: &mut Bytes) -> Result<u64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_i64(buf: &mut Bytes) -> Result<i64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_i64_le())
}

fn put_blob(out: &mut BytesMut, blob: &[u8]) {
    out.put_u32_le(blob.len() as u32);
    out.put_slice(blob);
}

fn get_blob(buf: &mut Bytes) -> Result<Bytes, WireError> {
    let len = {
        need(buf, 4)?;
        buf.get_u32_le() as usize
    };
    need(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

fn get_text(buf: &mut Bytes, field: &'static str) -> Result<String, WireError> {
    let blob = get_blob(buf)?;
    String::from_utf8(blob.to_vec()).map_err(|_| WireError::InvalidText { field })
}

fn get_bool(buf: &mut Bytes, field: &'static str) -> Result<bool, WireError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(WireError::InvalidOrdinal { field, value }),
    }
}

fn get_consistency(buf: &mut Bytes) -> Result<ConsistencyLevel, WireError> {
    let value = get_u8(buf)?;
    ConsistencyLevel::from_ordinal(value).ok_or(WireError::InvalidOrdinal {
        field: "consistency",
        value,
    })
}

fn get_persistence(buf: &mut Bytes) -> Result<Persistence, WireError> {
    let value = get_u8(buf)?;
    Persistence::from_ordinal(value).ok_or(WireError::InvalidOrdinal {
        field: "persistence",
        value,
    })
}

fn get_ttl(buf: &mut Bytes) -> Result<Ttl, WireError> {
    let millis = get_i64(buf)?;
    if millis < 0 {
        return Err(WireError::NegativeTtl(millis));
    }
    Ok(Ttl::from_millis(millis as u64))
}

fn finish<T>(buf: &Bytes, value: T) -> Result<T, WireError> {
    if buf.has_remaining() {
        return Err(WireError::TrailingBytes(buf.remaining()));
    }
    Ok(value)
}

// ============================================================================
// Map operations
// ============================================================================

/// Encodes a map operation into its wire frame.
pub fn encode_map_operation(operation: &MapOperation) -> Bytes {
    let mut out = BytesMut::new();
    match operation {
        MapOperation::Command(command) => match command {
            MapCommand::Put {
                key,
                value,
                persistence,
                ttl,
            } => {
                out.put_u16_le(OP_PUT);
                put_blob(&mut out, key);
                put_blob(&mut out, value);
                out.put_u8(persistence.ordinal());
                out.put_i64_le(ttl.as_millis() as i64);
            }
            MapCommand::PutIfAbsent {
                key,
                value,
                persistence,
                ttl,
            } => {
                out.put_u16_le(OP_PUT_IF_ABSENT);
                put_blob(&mut out, key);
                put_blob(&mut out, value);
                out.put_u8(persistence.ordinal());
                out.put_i64_le(ttl.as_millis() as i64);
            }
            MapCommand::Remove { key, expected } => {
                out.put_u16_le(OP_REMOVE);
                put_blob(&mut out, key);
                match expected {
                    None => out.put_u8(0),
                    Some(value) => {
                        out.put_u8(1);
                        put_blob(&mut out, value);
                    }
                }
            }
            MapCommand::Clear => out.put_u16_le(OP_CLEAR),
        },
        MapOperation::Query { consistency, query } => match query {
            MapQuery::Get { key } => {
                out.put_u16_le(OP_GET);
                out.put_u8(consistency.ordinal());
                put_blob(&mut out, key);
            }
            MapQuery::GetOrDefault { key, default } => {
                out.put_u16_le(OP_GET_OR_DEFAULT);
                out.put_u8(consistency.ordinal());
                put_blob(&mut out, key);
                put_blob(&mut out, default);
            }
            MapQuery::ContainsKey { key } => {
                out.put_u16_le(OP_CONTAINS_KEY);
                out.put_u8(consistency.ordinal());
                put_blob(&mut out, key);
            }
            MapQuery::Size => {
                out.put_u16_le(OP_SIZE);
                out.put_u8(consistency.ordinal());
            }
            MapQuery::IsEmpty => {
                out.put_u16_le(OP_IS_EMPTY);
                out.put_u8(consistency.ordinal());
            }
        },
    }
    out.freeze()
}

/// Decodes one map operation frame, rejecting malformed or trailing input.
pub fn decode_map_operation(mut frame: Bytes) -> Result<MapOperation, WireError> {
    let code = get_u16(&mut frame)?;
    let operation = match code {
        OP_PUT | OP_PUT_IF_ABSENT => {
            let key = get_blob(&mut frame)?;
            let value = get_blob(&mut frame)?;
            let persistence = get_persistence(&mut frame)?;
            let ttl = get_ttl(&mut frame)?;
            let command = if code == OP_PUT {
                MapCommand::Put {
                    key,
                    value,
                    persistence,
                    ttl,
                }
            } else {
                MapCommand::PutIfAbsent {
                    key,
                    value,
                    persistence,
                    ttl,
                }
            };
            MapOperation::Command(command)
        }
        OP_REMOVE => {
            let key = get_blob(&mut frame)?;
            let expected = if get_bool(&mut frame, "expected")? {
                Some(get_blob(&mut frame)?)
            } else {
                None
            };
            MapOperation::Command(MapCommand::Remove { key, expected })
        }
        OP_CLEAR => MapOperation::Command(MapCommand::Clear),
        OP_GET => {
            let consistency = get_consistency(&mut frame)?;
            let key = get_blob(&mut frame)?;
            MapOperation::Query {
                consistency,
                query: MapQuery::Get { key },
            }
        }
        OP_GET_OR_DEFAULT => {
            let consistency = get_consistency(&mut frame)?;
            let key = get_blob(&mut frame)?;
            let default = get_blob(&mut frame)?;
            MapOperation::Query {
                consistency,
                query: MapQuery::GetOrDefault { key, default },
            }
        }
        OP_CONTAINS_KEY => {
            let consistency = get_consistency(&mut frame)?;
            let key = get_blob(&mut frame)?;
            MapOperation::Query {
                consistency,
                query: MapQuery::ContainsKey { key },
            }
        }
        OP_SIZE => MapOperation::Query {
            consistency: get_consistency(&mut frame)?,
            query: MapQuery::Size,
        },
        OP_IS_EMPTY => MapOperation::Query {
            consistency: get_consistency(&mut frame)?,
            query: MapQuery::IsEmpty,
        },
        other => return Err(WireError::UnknownOperation(other)),
    };
    finish(&frame, operation)
}

// ============================================================================
// Group operations
// ============================================================================

/// Encodes a group command into its wire frame.
pub fn encode_group_command(command: &GroupCommand) -> Bytes {
    let mut out = BytesMut::new();
    match command {
        GroupCommand::Join {
            member_id,
            persistence,
        } => {
            out.put_u16_le(OP_JOIN);
            put_blob(&mut out, member_id.as_str().as_bytes());
            out.put_u8(persistence.ordinal());
        }
        GroupCommand::Leave { member_id } => {
            out.put_u16_le(OP_LEAVE);
            put_blob(&mut out, member_id.as_str().as_bytes());
        }
        GroupCommand::Listen => out.put_u16_le(OP_LISTEN),
        GroupCommand::Submit(request) => {
            out.put_u16_le(OP_SUBMIT);
            match &request.target {
                None => out.put_u8(0),
                Some(target) => {
                    out.put_u8(1);
                    put_blob(&mut out, target.as_str().as_bytes());
                }
            }
            out.put_u8(request.dispatch.ordinal());
            out.put_u8(request.delivery.ordinal());
            out.put_u64_le(request.message_id);
            put_blob(&mut out, request.kind.as_bytes());
            put_blob(&mut out, &request.payload);
        }
        GroupCommand::Ack {
            member_id,
            id,
            succeeded,
        } => {
            out.put_u16_le(OP_ACK);
            put_blob(&mut out, member_id.as_str().as_bytes());
            out.put_u64_le(id.as_u64());
            out.put_u8(u8::from(*succeeded));
        }
    }
    out.freeze()
}

/// Decodes one group command frame, rejecting malformed or trailing input.
pub fn decode_group_command(mut frame: Bytes) -> Result<GroupCommand, WireError> {
    let code = get_u16(&mut frame)?;
    let command = match code {
        OP_JOIN => GroupCommand::Join {
            member_id: MemberId::new(get_text(&mut frame, "member_id")?),
            persistence: get_persistence(&mut frame)?,
        },
        OP_LEAVE => GroupCommand::Leave {
            member_id: MemberId::new(get_text(&mut frame, "member_id")?),
        },
        OP_LISTEN => GroupCommand::Listen,
        OP_SUBMIT => {
            let target = if get_bool(&mut frame, "target")? {
                Some(MemberId::new(get_text(&mut frame, "target")?))
            } else {
                None
            };
            let dispatch = {
                let value = get_u8(&mut frame)?;
                Dispatch::from_ordinal(value).ok_or(WireError::InvalidOrdinal {
                    field: "dispatch",
                    value,
                })?
            };
            let delivery = {
                let value = get_u8(&mut frame)?;
                DeliveryPolicy::from_ordinal(value).ok_or(WireError::InvalidOrdinal {
                    field: "delivery",
                    value,
                })?
            };
            let message_id = get_u64(&mut frame)?;
            let kind = get_text(&mut frame, "kind")?;
            let payload = get_blob(&mut frame)?;
            GroupCommand::Submit(SubmitRequest {
                target,
                dispatch,
                delivery,
                message_id,
                kind,
                payload,
            })
        }
        OP_ACK => GroupCommand::Ack {
            member_id: MemberId::new(get_text(&mut frame, "member_id")?),
            id: LogIndex::new(get_u64(&mut frame)?),
            succeeded: get_bool(&mut frame, "succeeded")?,
        },
        other => return Err(WireError::UnknownOperation(other)),
    };
    finish(&frame, command)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_frame_layout_is_pinned() {
        let op = MapOperation::Command(MapCommand::Put {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
            persistence: Persistence::Ephemeral,
            ttl: Ttl::from_millis(250),
        });
        let frame = encode_map_operation(&op);

        // code 441, key blob, value blob, persistence ordinal, ttl i64.
        let expected: &[u8] = &[
            0xB9, 0x01, // 441
            1, 0, 0, 0, b'k', // key
            1, 0, 0, 0, b'v', // value
            1, // ephemeral
            0xFA, 0, 0, 0, 0, 0, 0, 0, // 250ms
        ];
        assert_eq!(&frame[..], expected);
        assert_eq!(decode_map_operation(frame).expect("decode"), op);
    }

    #[test]
    fn query_frames_carry_the_consistency_prefix() {
        let op = MapOperation::Query {
            consistency: ConsistencyLevel::Linearizable,
            query: MapQuery::Get {
                key: Bytes::from_static(b"k"),
            },
        };
        let frame = encode_map_operation(&op);

        assert_eq!(&frame[..2], &[0xBB, 0x01]); // 443
        assert_eq!(frame[2], 4); // Linearizable ordinal
        assert_eq!(decode_map_operation(frame).expect("decode"), op);
    }

    #[test]
    fn remove_encodes_the_compare_value_optionally() {
        let unconditional = MapOperation::Command(MapCommand::Remove {
            key: Bytes::from_static(b"k"),
            expected: None,
        });
        let cas = MapOperation::Command(MapCommand::Remove {
            key: Bytes::from_static(b"k"),
            expected: Some(Bytes::from_static(b"v")),
        });

        let frame = encode_map_operation(&unconditional);
        assert_eq!(frame[frame.len() - 1], 0);
        assert_eq!(decode_map_operation(frame).expect("decode"), unconditional);

        let frame = encode_map_operation(&cas);
        assert_eq!(decode_map_operation(frame).expect("decode"), cas);
    }

    #[test]
    fn submit_round_trips() {
        let command = GroupCommand::Submit(SubmitRequest {
            target: Some(MemberId::new("worker-3")),
            dispatch: Dispatch::Direct,
            delivery: DeliveryPolicy::Retry,
            message_id: 99,
            kind: "task".into(),
            payload: Bytes::from_static(b"payload"),
        });
        let frame = encode_group_command(&command);
        assert_eq!(&frame[..2], &[0xCF, 0x01]); // 463
        assert_eq!(decode_group_command(frame).expect("decode"), command);
    }

    #[test]
    fn ack_round_trips() {
        let command = GroupCommand::Ack {
            member_id: MemberId::new("a"),
            id: LogIndex::new(512),
            succeeded: false,
        };
        let frame = encode_group_command(&command);
        assert_eq!(decode_group_command(frame).expect("decode"), command);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let frame = Bytes::from_static(&[0xFF, 0xFF]);
        assert_eq!(
            decode_map_operation(frame.clone()),
            Err(WireError::UnknownOperation(0xFFFF))
        );
        assert_eq!(
            decode_group_command(frame),
            Err(WireError::UnknownOperation(0xFFFF))
        );
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let op = MapOperation::Command(MapCommand::Put {
            key: Bytes::from_static(b"key"),
            value: Bytes::from_static(b"value"),
            persistence: Persistence::Persistent,
            ttl: Ttl::NONE,
        });
        let frame = encode_map_operation(&op);
        for cut in 1..frame.len() {
            let truncated = frame.slice(..cut);
            assert_eq!(
                decode_map_operation(truncated),
                Err(WireError::Truncated),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut frame = encode_map_operation(&MapOperation::Command(MapCommand::Clear)).to_vec();
        frame.push(0);
        assert_eq!(
            decode_map_operation(Bytes::from(frame)),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn bad_ordinals_are_rejected() {
        // Size query with consistency ordinal 9.
        let frame = Bytes::from_static(&[0xBF, 0x01, 9]);
        assert_eq!(
            decode_map_operation(frame),
            Err(WireError::InvalidOrdinal {
                field: "consistency",
                value: 9
            })
        );
    }

    #[test]
    fn negative_ttl_is_rejected() {
        let op = MapOperation::Command(MapCommand::Put {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
            persistence: Persistence::Persistent,
            ttl: Ttl::NONE,
        });
        let mut frame = encode_map_operation(&op).to_vec();
        let len = frame.len();
        frame[len - 1] = 0x80; // force the ttl sign bit
        assert!(matches!(
            decode_map_operation(Bytes::from(frame)),
            Err(WireError::NegativeTtl(_))
        ));
    }
}
