// src/keeper/client.rs

//! The keeper-side monitor RPC client, grounded in the teacher's
//! `core/warden/client.rs` (`WardenClient`): a connect-with-timeout plus
//! `send_and_receive` shape, swapped from RESP frames to this crate's
//! length-delimited JSON codec (§10.4).

use crate::error::{PgAutoFailoverError, Result};
use crate::rpc::{JsonCodec, Request, Response};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MonitorClient {
    stream: TcpStream,
    encoder: JsonCodec<Request>,
    decoder: JsonCodec<Response>,
}

impl MonitorClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PgAutoFailoverError::Transient(format!("connect to monitor {addr} timed out")))?
            .map_err(|e| PgAutoFailoverError::Transient(format!("connect to monitor {addr}: {e}")))?;
        Ok(Self {
            stream,
            encoder: JsonCodec::new(),
            decoder: JsonCodec::new(),
        })
    }

    pub async fn call(&mut self, request: Request) -> Result<Response> {
        let mut write_buf = BytesMut::new();
        self.encoder.encode(request, &mut write_buf)?;
        self.stream.write_all(&write_buf).await.map_err(|e| {
            PgAutoFailoverError::Transient(format!("writing to monitor: {e}"))
        })?;

        let mut read_buf = BytesMut::with_capacity(4096);
        loop {
            let read_fut = self.stream.read_buf(&mut read_buf);
            match tokio::time::timeout(READ_TIMEOUT, read_fut).await {
                Ok(Ok(0)) => return Err(PgAutoFailoverError::Transient("monitor closed the connection".into())),
                Ok(Ok(_)) => {
                    if let Some(response) = self.decoder.decode(&mut read_buf)? {
                        return Ok(response);
                    }
                }
                Ok(Err(e)) => return Err(PgAutoFailoverError::Transient(format!("reading from monitor: {e}"))),
                Err(_) => return Err(PgAutoFailoverError::Transient("timed out waiting for monitor reply".into())),
            }
        }
    }
}
