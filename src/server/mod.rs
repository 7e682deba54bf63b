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

//! The DNS server: accepts datagram and stream listeners, decodes each
//! inbound message, drives the handler, and writes the encoded reply.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

pub mod writer;

use writer::ReplyWriter;

use crate::client::{Client, Query};
use crate::handler::Handler;
use crate::message::{Message, Rcode, Reader, MAX_DATAGRAM_LEN};
use crate::transport::Target;

/// The receive buffer size for inbound queries.
const RECV_BUF_LEN: usize = 4096;

////////////////////////////////////////////////////////////////////////
// SERVER                                                             //
////////////////////////////////////////////////////////////////////////

/// A DNS server.
///
/// A `Server` listens for queries over UDP and TCP on one address.
/// Each received message is parsed, a [`ReplyWriter`] is pre-populated
/// as a response to it, the configured [`Handler`] is driven, and the
/// finished reply is encoded and sent back. Datagram replies larger
/// than the classic 512-octet maximum are truncated at a record
/// boundary with the TC bit set.
///
/// A server with a forwarder client advertises recursion and lets
/// handlers forward unanswered questions upstream through
/// [`MessageWriter::recur`](writer::MessageWriter::recur).
pub struct Server {
    addr: SocketAddr,
    handler: Arc<dyn Handler>,
    forwarder: Option<Arc<Client>>,
}

impl Server {
    /// Creates a server that will listen on `addr` and answer with
    /// `handler`.
    pub fn new(addr: SocketAddr, handler: Arc<dyn Handler>) -> Self {
        Self {
            addr,
            handler,
            forwarder: None,
        }
    }

    /// Attaches the client used to forward recursed questions
    /// upstream.
    pub fn with_forwarder(mut self, forwarder: Client) -> Self {
        self.forwarder = Some(Arc::new(forwarder));
        self
    }

    /// Binds UDP and TCP listeners on the configured address and
    /// serves until an I/O error stops one of the listeners.
    pub async fn listen_and_serve(self) -> io::Result<()> {
        let udp = UdpSocket::bind(self.addr).await?;
        let tcp = TcpListener::bind(self.addr).await?;
        self.serve(udp, tcp).await
    }

    /// Serves on listeners the caller has already bound.
    pub async fn serve(self, udp: UdpSocket, tcp: TcpListener) -> io::Result<()> {
        info!(
            "serving on {} (udp) and {} (tcp)",
            udp.local_addr()?,
            tcp.local_addr()?
        );
        let server = Arc::new(self);
        let udp_task = tokio::spawn(run_udp_receiver(server.clone(), Arc::new(udp)));
        let tcp_task = tokio::spawn(run_tcp_listener(server, tcp));
        tokio::select! {
            result = udp_task => result.unwrap_or_else(join_failure),
            result = tcp_task => result.unwrap_or_else(join_failure),
        }
    }

    /// Processes one received message and returns the encoded reply to
    /// send, if any.
    async fn handle_packet(
        &self,
        packet: &[u8],
        remote: Target,
        datagram: bool,
    ) -> Option<Vec<u8>> {
        let request = match Message::unpack(packet) {
            Ok(request) => request,
            Err(e) => {
                warn!("undecodable message from {remote}: {e}");
                return formerr_reply(packet);
            }
        };

        // Responses are not ours to answer.
        if request.response {
            return None;
        }

        let query = Query {
            remote_addr: Some(remote),
            message: request,
        };
        let mut w = ReplyWriter::new(&query.message, self.forwarder.clone());
        self.handler.serve_dns(&query, &mut w).await;
        let reply = w.into_message();

        let packed = match reply.pack(true) {
            Ok(packed) => packed,
            Err(e) => {
                error!("failed to pack reply: {e}");
                return None;
            }
        };
        if datagram && packed.len() > MAX_DATAGRAM_LEN {
            return truncate_reply(&reply);
        }
        Some(packed)
    }
}

/// The UDP receiver loop. Each datagram is handled in its own task.
async fn run_udp_receiver(server: Arc<Server>, socket: Arc<UdpSocket>) -> io::Result<()> {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let packet = buf[..len].to_vec();
        let server = server.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            if let Some(reply) = server.handle_packet(&packet, Target::Udp(peer), true).await {
                if let Err(e) = socket.send_to(&reply, peer).await {
                    error!("udp send to {peer}: {e}");
                }
            }
        });
    }
}

/// The TCP accept loop. Each connection is handled in its own task.
async fn run_tcp_listener(server: Arc<Server>, listener: TcpListener) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(&server, stream, peer).await {
                debug!("tcp connection from {peer}: {e}");
            }
        });
    }
}

/// Reads length-prefixed messages off one TCP connection and writes
/// the length-prefixed replies, until the peer closes or a message is
/// beyond repair.
async fn handle_tcp_connection(
    server: &Server,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let mut body = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await?;

        match server.handle_packet(&body, Target::Tcp(peer), false).await {
            Some(reply) => {
                if reply.len() > u16::MAX as usize {
                    error!("reply to {peer} does not fit a stream frame");
                    return Ok(());
                }
                stream
                    .write_all(&(reply.len() as u16).to_be_bytes())
                    .await?;
                stream.write_all(&reply).await?;
            }
            // Something was too malformed to answer; drop the
            // connection.
            None => return Ok(()),
        }
    }
}

/// Builds the FORMERR reply for a message that could not be decoded,
/// when at least its header was readable.
fn formerr_reply(packet: &[u8]) -> Option<Vec<u8>> {
    let reader = Reader::new(packet).ok()?;
    if reader.response() {
        return None;
    }
    let reply = Message {
        id: reader.id(),
        response: true,
        opcode: reader.opcode(),
        recursion_desired: reader.recursion_desired(),
        rcode: Rcode::FORM_ERR,
        ..Default::default()
    };
    reply.pack(false).ok()
}

/// Re-encodes a datagram reply to fit the classic 512-octet maximum,
/// dropping whole records from the back and setting the TC bit.
fn truncate_reply(reply: &Message) -> Option<Vec<u8>> {
    let mut truncated = reply.clone();
    truncated.truncated = true;
    loop {
        let dropped = truncated.additionals.pop().is_some()
            || truncated.authorities.pop().is_some()
            || truncated.answers.pop().is_some();
        let packed = truncated.pack(true).ok()?;
        if packed.len() <= MAX_DATAGRAM_LEN || !dropped {
            return Some(packed);
        }
    }
}

fn join_failure(e: tokio::task::JoinError) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Other, e))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::Cache;
    use crate::class::Class;
    use crate::handler::Recursor;
    use crate::message::{Question, Record, Resource, Soa, Type};
    use crate::transport::{NameServers, Transport};
    use crate::zone::{record_map, record_set, Zone};

    fn test_zone() -> Zone {
        let zone = Zone::new("tld.".parse().unwrap(), Duration::from_secs(3600)).with_soa(Soa {
            ns: "dns.tld.".parse().unwrap(),
            mbox: "hostmaster.tld.".parse().unwrap(),
            serial: 1234,
            refresh: Duration::from_secs(3600),
            retry: Duration::from_secs(600),
            expire: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(60),
        });
        zone.records().replace_all(record_map([(
            "app",
            record_set([
                Record::A("10.42.0.1".parse().unwrap()),
                Record::A("10.42.0.2".parse().unwrap()),
                Record::A("10.42.0.3".parse().unwrap()),
            ]),
        )]));
        zone
    }

    async fn spawn_server(server: Server) -> (SocketAddr, SocketAddr) {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let udp_addr = udp.local_addr().unwrap();
        let tcp_addr = tcp.local_addr().unwrap();
        tokio::spawn(server.serve(udp, tcp));
        (udp_addr, tcp_addr)
    }

    fn query_for(name: &str, rr_type: Type) -> Query {
        Query::new(Message {
            recursion_desired: true,
            questions: vec![Question {
                name: name.parse().unwrap(),
                rr_type,
                class: Class::IN,
            }],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn serves_a_zone_over_udp_and_tcp() {
        let server = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(test_zone()));
        let (udp_addr, tcp_addr) = spawn_server(server).await;

        for target in [Target::Udp(udp_addr), Target::Tcp(tcp_addr)] {
            let client = Client::new(Transport::new(
                NameServers(vec![target]).round_robin(),
            ));
            let response = client.send(&query_for("app.tld.", Type::A)).await.unwrap();
            assert!(response.response);
            assert!(response.authoritative);
            assert_eq!(response.rcode, Rcode::NO_ERROR);
            let answers: Vec<Record> =
                response.answers.iter().map(|r| r.record.clone()).collect();
            assert_eq!(
                answers,
                vec![
                    Record::A("10.42.0.1".parse().unwrap()),
                    Record::A("10.42.0.2".parse().unwrap()),
                    Record::A("10.42.0.3".parse().unwrap()),
                ]
            );
        }
    }

    #[tokio::test]
    async fn missing_names_get_nxdomain_with_soa() {
        let server = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(test_zone()));
        let (udp_addr, _) = spawn_server(server).await;

        let client = Client::new(Transport::new(
            NameServers(vec![Target::Udp(udp_addr)]).round_robin(),
        ));
        let response = client
            .send(&query_for("missing.tld.", Type::A))
            .await
            .unwrap();
        assert_eq!(response.rcode, Rcode::NX_DOMAIN);
        assert!(response.answers.is_empty());
        assert_eq!(response.authorities.len(), 1);
    }

    #[tokio::test]
    async fn recursor_forwards_to_upstream_and_caches() {
        // The upstream: an authoritative zone server.
        let upstream = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(test_zone()));
        let (upstream_udp, _) = spawn_server(upstream).await;

        // The front: a pure forwarder with a cache.
        let cache = Arc::new(Cache::new());
        let forwarder = Client::new(Transport::new(
            NameServers(vec![Target::Udp(upstream_udp)]).round_robin(),
        ))
        .with_resolver(cache.clone());
        let front = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(Recursor))
            .with_forwarder(forwarder);
        let (front_udp, _) = spawn_server(front).await;

        let client = Client::new(Transport::new(
            NameServers(vec![Target::Udp(front_udp)]).round_robin(),
        ));
        let response = client.send(&query_for("app.tld.", Type::A)).await.unwrap();
        assert_eq!(response.rcode, Rcode::NO_ERROR);
        assert_eq!(response.answers.len(), 3);
        // The upstream's authoritative bit is copied through.
        assert!(response.authoritative);

        // The forwarded answers were retained for next time.
        assert_eq!(cache.len(), 1);
        let again = client.send(&query_for("app.tld.", Type::A)).await.unwrap();
        assert_eq!(again.answers.len(), 3);
    }

    #[tokio::test]
    async fn responses_are_ignored() {
        let server = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(test_zone()));
        let mut response = Message::default();
        response.response = true;
        let packet = response.pack(false).unwrap();
        let reply = server
            .handle_packet(&packet, Target::Udp("127.0.0.1:9".parse().unwrap()), true)
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn undecodable_queries_get_formerr() {
        let server = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(test_zone()));

        // A header claiming one question, with no question present.
        let packet = b"\x12\x34\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00";
        let reply = server
            .handle_packet(packet, Target::Udp("127.0.0.1:9".parse().unwrap()), true)
            .await
            .unwrap();
        let reply = Message::unpack(&reply).unwrap();
        assert_eq!(reply.id, 0x1234);
        assert!(reply.response);
        assert_eq!(reply.rcode, Rcode::FORM_ERR);

        // Too short for even a header: nothing to reply to.
        assert!(server
            .handle_packet(b"\x00", Target::Udp("127.0.0.1:9".parse().unwrap()), true)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn oversized_datagram_replies_are_truncated() {
        let zone = Zone::new("tld.".parse().unwrap(), Duration::from_secs(3600));
        let many: Vec<Record> = (0..60)
            .map(|i| Record::Txt(vec![format!("record number {i} padding padding").into_bytes()]))
            .collect();
        zone.records().replace_all(record_map([("big", record_set(many))]));
        let server = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(zone));

        let query = query_for("big.tld.", Type::TXT);
        let packet = query.message.pack(true).unwrap();
        let reply = server
            .handle_packet(&packet, Target::Udp("127.0.0.1:9".parse().unwrap()), true)
            .await
            .unwrap();
        assert!(reply.len() <= MAX_DATAGRAM_LEN);
        let reply = Message::unpack(&reply).unwrap();
        assert!(reply.truncated);
        assert!(!reply.answers.is_empty());
        assert!(reply.answers.len() < 60);

        // The same reply over a stream is not truncated.
        let reply = server
            .handle_packet(&packet, Target::Tcp("127.0.0.1:9".parse().unwrap()), false)
            .await
            .unwrap();
        let reply = Message::unpack(&reply).unwrap();
        assert!(!reply.truncated);
        assert_eq!(reply.answers.len(), 60);
    }

    #[tokio::test]
    async fn zone_behind_mux_answers_locally_and_forwards_the_rest() {
        // An upstream answering anything with a fixed A record.
        let upstream_zone = Zone::new("example.com.".parse().unwrap(), Duration::from_secs(60));
        upstream_zone.records().replace_all(record_map([(
            "x",
            record_set([Record::A("10.9.8.7".parse().unwrap())]),
        )]));
        let upstream = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(upstream_zone));
        let (upstream_udp, _) = spawn_server(upstream).await;

        let mut mux = crate::mux::ResolveMux::new();
        mux.handle(Type::ANY, "tld.", Arc::new(test_zone()));
        let forwarder = Client::new(Transport::new(
            NameServers(vec![Target::Udp(upstream_udp)]).round_robin(),
        ));
        let front = Server::new("127.0.0.1:0".parse().unwrap(), Arc::new(mux))
            .with_forwarder(forwarder);
        let (front_udp, _) = spawn_server(front).await;

        let client = Client::new(Transport::new(
            NameServers(vec![Target::Udp(front_udp)]).round_robin(),
        ));
        let query = Query::new(Message {
            recursion_desired: true,
            questions: vec![
                Question {
                    name: "app.tld.".parse().unwrap(),
                    rr_type: Type::A,
                    class: Class::IN,
                },
                Question {
                    name: "x.example.com.".parse().unwrap(),
                    rr_type: Type::A,
                    class: Class::IN,
                },
            ],
            ..Default::default()
        });
        let response = client.send(&query).await.unwrap();
        assert_eq!(response.rcode, Rcode::NO_ERROR);
        assert_eq!(response.answers.len(), 4);
        let x_answers: Vec<&Resource> = response
            .answers
            .iter()
            .filter(|r| r.name.as_str() == "x.example.com.")
            .collect();
        assert_eq!(x_answers.len(), 1);
        assert_eq!(
            x_answers[0].record,
            Record::A("10.9.8.7".parse().unwrap())
        );
    }
}
