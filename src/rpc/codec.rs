// src/rpc/codec.rs

//! Frames `Request`/`Response` values as length-delimited, `serde_json`-
//! encoded messages, grounded in the teacher's `RespFrameCodec`
//! (`core/protocol/resp_frame.rs`) — same `Encoder`/`Decoder` shape, a
//! simpler wire format since there is no need for RESP's text protocol
//! here (§10.4).

use crate::error::PgAutoFailoverError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A `tokio_util::codec` implementation framing any `Serialize +
/// DeserializeOwned` type behind a 4-byte big-endian length prefix.
pub struct JsonCodec<T> {
    _marker: PhantomData<T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = PgAutoFailoverError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(PgAutoFailoverError::Serialization(format!(
                "message of {} bytes exceeds max size {MAX_MESSAGE_SIZE}",
                payload.len()
            )));
        }
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = PgAutoFailoverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(PgAutoFailoverError::Serialization(format!(
                "incoming message of {len} bytes exceeds max size {MAX_MESSAGE_SIZE}"
            )));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let payload: Bytes = src.split_to(len).freeze();
        let item = serde_json::from_slice(&payload)?;
        Ok(Some(item))
    }
}
