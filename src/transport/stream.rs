// Copyright 2024 the palisade developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Stream (TCP and TLS) connections to upstream name servers.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tokio_rustls::TlsConnector;

use super::{Error, Target};
use crate::message::Message;

/// Byte streams a DNS stream session can run over.
trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionStream for T {}

/// A long-lived stream connection to one upstream name server.
///
/// Messages are framed with a 2-octet big-endian length prefix in both
/// directions, and the framed reader yields whole messages. The
/// connection is shared between queries, but a query holds the stream
/// exclusively for its whole write-then-read exchange, since frames on
/// a stream are sequential.
pub(super) struct StreamConn {
    io: Mutex<Box<dyn SessionStream>>,
    closed: AtomicBool,
}

impl StreamConn {
    /// Dials a new stream connection to `target`, performing the TLS
    /// handshake when the target calls for it.
    pub(super) async fn dial(target: &Target) -> Result<Self, Error> {
        let io: Box<dyn SessionStream> = match target {
            Target::Tcp(addr) => Box::new(
                TcpStream::connect(addr)
                    .await
                    .map_err(|e| Error::Dial(Arc::new(e)))?,
            ),
            Target::Tls(tls) => {
                let tcp = TcpStream::connect(tls.addr)
                    .await
                    .map_err(|e| Error::Dial(Arc::new(e)))?;
                let server_name = tls
                    .server_name
                    .as_str()
                    .try_into()
                    .map_err(|_| Error::Dial(Arc::new(invalid_name_error(&tls.server_name))))?;
                let session = TlsConnector::from(tls.config.clone())
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Dial(Arc::new(e)))?;
                Box::new(session)
            }
            Target::Udp(_) => unreachable!("datagram target dialed as a stream"),
        };
        Ok(Self {
            io: Mutex::new(io),
            closed: AtomicBool::new(false),
        })
    }

    /// Sends `msg` as one frame and reads the next frame as the
    /// response, up to `deadline`.
    pub(super) async fn exchange(&self, msg: &Message, deadline: Duration) -> Result<Message, Error> {
        let mut query = msg.clone();
        query.id = rand::random();
        let packed = query.pack(true)?;
        if packed.len() > u16::MAX as usize {
            return Err(crate::message::PackError::FieldOverflow.into());
        }

        let start = Instant::now();
        // Waiting for another query to release the stream does not
        // poison the connection, so it is not covered by the
        // fail-the-connection timeout below.
        let mut io = timeout(deadline, self.io.lock())
            .await
            .map_err(|_| Error::Cancelled)?;
        let remaining = deadline
            .checked_sub(start.elapsed())
            .unwrap_or(Duration::ZERO);

        match timeout(remaining, Self::roundtrip_frames(&mut io, &packed)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.closed.store(true, Ordering::Release);
                Err(e)
            }
            // The stream is mid-frame; it cannot be reused.
            Err(_) => {
                self.closed.store(true, Ordering::Release);
                Err(Error::Cancelled)
            }
        }
    }

    async fn roundtrip_frames(
        io: &mut Box<dyn SessionStream>,
        packed: &[u8],
    ) -> Result<Message, Error> {
        io.write_all(&(packed.len() as u16).to_be_bytes())
            .await
            .map_err(|e| Error::Write(Arc::new(e)))?;
        io.write_all(packed)
            .await
            .map_err(|e| Error::Write(Arc::new(e)))?;

        let mut len_buf = [0u8; 2];
        io.read_exact(&mut len_buf)
            .await
            .map_err(|e| Error::Read(Arc::new(e)))?;
        let mut body = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        io.read_exact(&mut body)
            .await
            .map_err(|e| Error::Read(Arc::new(e)))?;
        Ok(Message::unpack(&body)?)
    }

    /// Returns whether the connection has failed and should be evicted
    /// from the pool.
    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns whether the stream is currently held by an in-flight
    /// exchange. Used as a load hint when picking a pooled connection.
    pub(super) fn is_busy(&self) -> bool {
        self.io.try_lock().is_err()
    }
}

fn invalid_name_error(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid TLS server name {name:?}"),
    )
}
