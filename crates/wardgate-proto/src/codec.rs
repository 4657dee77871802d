//! Length-prefixed bincode framing for RPC traffic
//!
//! Format: `[length: u32 big-endian][payload: bincode]`

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Request, Response};
use crate::MAX_FRAME_SIZE;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame codec decoding `D` and encoding `E`
pub struct MessageCodec<D, E> {
    _marker: PhantomData<fn(E) -> D>,
}

/// Server side: reads requests, writes responses
pub type ServerCodec = MessageCodec<Request, Response>;

/// Client side: reads responses, writes requests
pub type ClientCodec = MessageCodec<Response, Request>;

impl<D, E> MessageCodec<D, E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<D, E> Default for MessageCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned, E> Decoder for MessageCodec<D, E> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<D>, CodecError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&buf[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(length));
        }

        if buf.len() < 4 + length {
            buf.reserve(4 + length - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let payload = buf.split_to(length);
        Ok(Some(bincode::deserialize(&payload)?))
    }
}

impl<D, E: Serialize> Encoder<E> for MessageCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, buf: &mut BytesMut) -> Result<(), CodecError> {
        let payload = bincode::serialize(&item)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(payload.len()));
        }

        buf.reserve(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceConfiguration, DeviceConfigurationStatus, Gateway};

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();

        let mut buf = BytesMut::new();
        client
            .encode(
                Request::GetDeviceConfiguration {
                    session_key: "abc".to_string(),
                },
                &mut buf,
            )
            .unwrap();

        let mut partial = buf.split_to(6);
        assert!(server.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let decoded = server.decode(&mut partial).unwrap();
        assert_eq!(
            decoded,
            Some(Request::GetDeviceConfiguration {
                session_key: "abc".to_string()
            })
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut server = ServerCodec::new();
        let mut client = ClientCodec::new();

        let first = Response::DeviceConfiguration(DeviceConfiguration {
            status: DeviceConfigurationStatus::DeviceHealthy,
            issues: vec![],
            gateways: vec![Gateway {
                name: "gw-1".to_string(),
                routes_ipv4: vec!["10.0.0.0/24".to_string()],
                ..Default::default()
            }],
        });

        let mut buf = BytesMut::new();
        server.encode(first.clone(), &mut buf).unwrap();
        server.encode(Response::Revoked(true), &mut buf).unwrap();

        assert_eq!(client.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(client.decode(&mut buf).unwrap(), Some(Response::Revoked(true)));
        assert_eq!(client.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        assert!(matches!(
            server.decode(&mut buf),
            Err(CodecError::FrameTooLarge(_))
        ));
    }
}
