// Copyright 2022 Matthew Ingwersen.
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

//! Query dispatch.
//!
//! The [`Dispatcher`] handles one received query at a time, in a
//! buffer it is given:
//!
//! 1. Only the header and question are parsed.
//! 2. If the cache has an answer, it is copied into the buffer with the
//!    query's ID patched in.
//! 3. Otherwise, if proxying is enabled, the query is sent verbatim to
//!    an upstream from the [`DialerPool`] and the reply is relayed
//!    verbatim.
//! 4. Otherwise a denial (REFUSED or NXDOMAIN, per the
//!    [`MissPolicy`]) is built.
//!
//! Malformed queries and failed upstream exchanges produce no response
//! at all; the client will retry.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::cache::{Answer, Cache};
use crate::class::Class;
use crate::message::constants::MAX_UDP_MESSAGE_SIZE;
use crate::message::{parse_question, writer, Header, Opcode, Question, Rcode, Reader, Writer};
use crate::pool::DialerPool;
use crate::rr::Type;

/// The largest UDP response a client without EDNS accepts.
pub const MIN_UDP_PAYLOAD_SIZE: usize = 512;

/// The default deadline of an upstream exchange.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(3);

////////////////////////////////////////////////////////////////////////
// CONFIGURATION                                                      //
////////////////////////////////////////////////////////////////////////

/// How a query that misses the cache is answered when proxying is
/// disabled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MissPolicy {
    #[default]
    Refused,
    NxDomain,
}

impl MissPolicy {
    fn rcode(self) -> Rcode {
        match self {
            Self::Refused => Rcode::Refused,
            Self::NxDomain => Rcode::NxDomain,
        }
    }
}

/// Upstream proxying settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyConfig {
    pub upstreams: Vec<SocketAddr>,
    pub timeout: Duration,
}

impl ProxyConfig {
    /// The number of upstream picks the dialer pool keeps queued. Picks
    /// are made ahead of time, so a short queue lets circuit breaker
    /// changes take effect sooner.
    fn upstreams_capacity(&self) -> usize {
        self.upstreams.len().min(4)
    }
}

////////////////////////////////////////////////////////////////////////
// RECEIVED MESSAGE INFORMATION                                       //
////////////////////////////////////////////////////////////////////////

/// Provides network-related information about a received query to
/// [`Dispatcher::handle_message`].
#[derive(Clone, Copy, Debug)]
pub struct ReceivedInfo {
    source: SocketAddr,
    transport: Transport,
}

impl ReceivedInfo {
    /// Creates a new [`ReceivedInfo`]. IPv4-mapped IPv6 source
    /// addresses of the kind dual-stack sockets produce (e.g.
    /// `::ffff:127.0.0.1`) are converted to plain IPv4.
    pub fn new(source: SocketAddr, transport: Transport) -> Self {
        let ip = match source.ip() {
            IpAddr::V6(ipv6) => match ipv6.to_ipv4_mapped() {
                Some(ipv4) => IpAddr::V4(ipv4),
                None => IpAddr::V6(ipv6),
            },
            ipv4 => ipv4,
        };
        Self {
            source: SocketAddr::new(ip, source.port()),
            transport,
        }
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }
}

/// Indicates the transport through which a query was received.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

/// Indicates to the caller of [`Dispatcher::handle_message`] what kind
/// of response needs to be sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Response {
    /// A response of this length has been written into the buffer.
    Single(usize),

    /// No response is to be sent.
    None,
}

////////////////////////////////////////////////////////////////////////
// STATISTICS                                                         //
////////////////////////////////////////////////////////////////////////

/// Counts of how queries were answered.
#[derive(Debug, Default)]
pub struct Stats {
    hits: AtomicU64,
    proxied: AtomicU64,
    upstream_failures: AtomicU64,
    denied: AtomicU64,
    dropped: AtomicU64,
}

/// A point-in-time copy of [`Stats`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub proxied: u64,
    pub upstream_failures: u64,
    pub denied: u64,
    pub dropped: u64,
}

impl Stats {
    fn count(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            proxied: self.proxied.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} cache hits, {} proxied, {} upstream failures, {} denied, {} dropped",
            self.hits, self.proxied, self.upstream_failures, self.denied, self.dropped
        )
    }
}

////////////////////////////////////////////////////////////////////////
// DISPATCHER                                                         //
////////////////////////////////////////////////////////////////////////

/// Answers queries from the cache, an upstream, or with a denial.
pub struct Dispatcher {
    cache: Arc<Cache>,
    proxy: Option<Proxy>,
    miss_policy: MissPolicy,
    stats: Stats,
}

struct Proxy {
    dialer: DialerPool,
    timeout: Duration,
}

impl Dispatcher {
    /// Creates a `Dispatcher`. With a `proxy` configuration (which
    /// needs at least one upstream), this starts a [`DialerPool`] and
    /// so must be called within a Tokio runtime.
    pub fn new(cache: Arc<Cache>, proxy: Option<ProxyConfig>, miss_policy: MissPolicy) -> Self {
        let proxy = proxy
            .filter(|config| !config.upstreams.is_empty())
            .map(|config| {
                let capacity = config.upstreams_capacity();
                Proxy {
                    dialer: DialerPool::start(config.upstreams, capacity),
                    timeout: config.timeout,
                }
            });
        Self {
            cache,
            proxy,
            miss_policy,
            stats: Stats::default(),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn is_proxying(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Handles the query in `buf[..received_len]`, writing any response
    /// into `buf`. The buffer must be able to hold a UDP message of
    /// [`MAX_UDP_MESSAGE_SIZE`] octets.
    pub async fn handle_message(
        &self,
        buf: &mut [u8],
        received_len: usize,
        info: ReceivedInfo,
    ) -> Response {
        let (header, question) = match parse_question(&buf[..received_len]) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("dropping malformed query from {}: {}", info.source, e);
                Stats::count(&self.stats.dropped);
                return Response::None;
            }
        };
        if header.qr {
            Stats::count(&self.stats.dropped);
            return Response::None;
        }

        if header.opcode == Opcode::Query && question.qclass == Class::IN {
            if let Some(answer) = self.cache.get(question.qtype, &question.qname) {
                return self.send_answer(&answer, &header, &question, buf, received_len, info);
            }
        }

        match self.proxy {
            Some(ref proxy) => self.relay(proxy, &header, buf, received_len, info).await,
            None => {
                let rcode = if header.opcode == Opcode::Query {
                    self.miss_policy.rcode()
                } else {
                    Rcode::NotImp
                };
                debug!(
                    "{} {} from {} missed; answering {}",
                    question, info.transport, info.source, rcode
                );
                Stats::count(&self.stats.denied);
                self.respond_without_answer(&header, &question, buf, rcode, false)
            }
        }
    }

    /// Copies a cached answer into `buf`. A UDP answer larger than the
    /// client accepts is replaced by a truncated response.
    fn send_answer(
        &self,
        answer: &Answer,
        header: &Header,
        question: &Question,
        buf: &mut [u8],
        received_len: usize,
        info: ReceivedInfo,
    ) -> Response {
        Stats::count(&self.stats.hits);
        if info.transport == Transport::Udp
            && answer.len() > MIN_UDP_PAYLOAD_SIZE
            && answer.len() > client_payload_limit(&buf[..received_len])
        {
            debug!("{} from {} needs TCP", question, info.source);
            return self.respond_without_answer(header, question, buf, answer.rcode(), true);
        }
        match answer.write_response(header.id, buf) {
            Some(len) => Response::Single(len),
            None => Response::None,
        }
    }

    /// Writes a response carrying only the question into `buf`.
    fn respond_without_answer(
        &self,
        header: &Header,
        question: &Question,
        buf: &mut [u8],
        rcode: Rcode,
        truncated: bool,
    ) -> Response {
        match write_bare_response(header, question, buf, rcode, truncated) {
            Ok(len) => Response::Single(len),
            Err(e) => {
                warn!("failed to write a response to {}: {}", question, e);
                Response::None
            }
        }
    }

    /// Relays the query to an upstream and its reply back into `buf`.
    async fn relay(
        &self,
        proxy: &Proxy,
        header: &Header,
        buf: &mut [u8],
        received_len: usize,
        info: ReceivedInfo,
    ) -> Response {
        let upstream = proxy.dialer.get().await;
        let result = timeout(
            proxy.timeout,
            exchange(upstream, header.id, buf, received_len),
        )
        .await
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "upstream timed out")));

        match result {
            Ok(len) => {
                proxy.dialer.report(upstream, true);
                Stats::count(&self.stats.proxied);
                debug!(
                    "relayed {} octets from {} to {} over {}",
                    len, upstream, info.source, info.transport
                );
                Response::Single(len)
            }
            Err(e) => {
                proxy.dialer.report(upstream, false);
                Stats::count(&self.stats.upstream_failures);
                debug!("exchange with upstream {} failed: {}", upstream, e);
                Response::None
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("proxying", &self.is_proxying())
            .field("miss_policy", &self.miss_policy)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// HELPERS                                                            //
////////////////////////////////////////////////////////////////////////

/// Sends `buf[..len]` to `upstream` over UDP and reads the reply into
/// `buf`. A reply that is too short, is not a response, or does not
/// carry `id` is an error.
async fn exchange(upstream: SocketAddr, id: u16, buf: &mut [u8], len: usize) -> io::Result<usize> {
    let local: SocketAddr = match upstream {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(upstream).await?;
    socket.send(&buf[..len]).await?;

    let limit = buf.len().min(MAX_UDP_MESSAGE_SIZE);
    let reply_len = socket.recv(&mut buf[..limit]).await?;
    let reply = Reader::try_from(&buf[..reply_len])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if !reply.qr() || reply.id() != id {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "reply does not match the query",
        ));
    }
    Ok(reply_len)
}

/// Returns the largest UDP response the client of `query` accepts: the
/// payload size of its OPT record, if any, and otherwise 512 octets.
fn client_payload_limit(query: &[u8]) -> usize {
    let mut reader = match Reader::try_from(query) {
        Ok(reader) => reader,
        Err(_) => return MIN_UDP_PAYLOAD_SIZE,
    };
    for _ in 0..reader.qdcount() {
        if reader.read_question().is_err() {
            return MIN_UDP_PAYLOAD_SIZE;
        }
    }
    for _ in 0..(reader.ancount() as usize + reader.nscount() as usize) {
        if reader.skip_rr().is_err() {
            return MIN_UDP_PAYLOAD_SIZE;
        }
    }
    for _ in 0..reader.arcount() {
        match reader.read_rr() {
            Ok(rr) if rr.rr_type == Type::OPT => {
                let size = u16::from(rr.class) as usize;
                return size.clamp(MIN_UDP_PAYLOAD_SIZE, MAX_UDP_MESSAGE_SIZE);
            }
            Ok(_) => (),
            Err(_) => break,
        }
    }
    MIN_UDP_PAYLOAD_SIZE
}

/// Writes a response to `header`/`question` with no records.
fn write_bare_response(
    header: &Header,
    question: &Question,
    buf: &mut [u8],
    rcode: Rcode,
    truncated: bool,
) -> writer::Result<usize> {
    let mut writer = Writer::new(buf, MIN_UDP_PAYLOAD_SIZE)?;
    writer.set_id(header.id);
    writer.set_qr(true);
    writer.set_opcode(header.opcode);
    writer.set_rd(header.rd);
    writer.set_cd(header.cd);
    writer.set_tc(truncated);
    writer.set_rcode(rcode);
    if rcode != Rcode::Refused && rcode != Rcode::NotImp {
        writer.set_aa(true);
        writer.set_ra(true);
    }
    writer.add_question(question)?;
    Ok(writer.finish())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{decode, Reader};
    use crate::name::Name;
    use crate::rr::Ttl;
    use crate::zone::{compile, parse_entries, CompileSettings};

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn cache_of(text: &str) -> Arc<Cache> {
        let entries = parse_entries(text, &name("example.test")).unwrap();
        let settings = CompileSettings {
            serial: 1,
            default_ttl: Ttl::DEFAULT,
        };
        Arc::new(Cache::new(compile(&entries, settings).unwrap()))
    }

    /// Builds a query into a fresh buffer, returning it and its length.
    fn query(id: u16, qname: &str, qtype: Type, edns: Option<u16>) -> (Vec<u8>, usize) {
        let mut buf = vec![0; MAX_UDP_MESSAGE_SIZE];
        let mut writer = Writer::new(&mut buf, MAX_UDP_MESSAGE_SIZE).unwrap();
        writer.set_id(id);
        writer.set_rd(true);
        if let Some(size) = edns {
            writer.set_edns(size).unwrap();
        }
        writer
            .add_question(&Question::new(name(qname), qtype))
            .unwrap();
        let len = writer.finish();
        (buf, len)
    }

    fn udp_info() -> ReceivedInfo {
        ReceivedInfo::new("127.0.0.1:5353".parse().unwrap(), Transport::Udp)
    }

    async fn dispatch(dispatcher: &Dispatcher, id: u16, qname: &str, qtype: Type) -> Vec<u8> {
        let (mut buf, len) = query(id, qname, qtype, None);
        match dispatcher.handle_message(&mut buf, len, udp_info()).await {
            Response::Single(len) => buf[..len].to_vec(),
            Response::None => panic!("no response"),
        }
    }

    #[tokio::test]
    async fn answers_from_cache_with_patched_id() {
        let cache = cache_of("host 192.0.2.1\n");
        let dispatcher = Dispatcher::new(cache.clone(), None, MissPolicy::Refused);
        let response = dispatch(&dispatcher, 0xabcd, "host.example.test", Type::A).await;
        let answer = cache.get(Type::A, &name("host.example.test")).unwrap();
        assert_eq!(response, answer.to_response(0xabcd));
        assert_eq!(dispatcher.stats().snapshot().hits, 1);
    }

    #[tokio::test]
    async fn a_queries_follow_aliases() {
        let cache = cache_of("host 192.0.2.1\nwww host cname\n");
        let dispatcher = Dispatcher::new(cache, None, MissPolicy::Refused);
        let response = dispatch(&dispatcher, 7, "www.example.test", Type::A).await;
        let decoded = decode(&response).unwrap();
        assert_eq!(decoded.header.id, 7);
        assert_eq!(decoded.header.ancount, 2);
        assert_eq!(decoded.question.unwrap().qtype, Type::A);
    }

    #[tokio::test]
    async fn cname_queries_get_a_cname_question() {
        let cache = cache_of("host 192.0.2.1\nwww host cname\n");
        let dispatcher = Dispatcher::new(cache, None, MissPolicy::Refused);
        let response = dispatch(&dispatcher, 8, "www.example.test", Type::CNAME).await;
        let decoded = decode(&response).unwrap();
        assert_eq!(decoded.header.id, 8);
        assert_eq!(decoded.header.rcode, Rcode::NoError);
        assert_eq!(decoded.header.ancount, 2);
        let question = decoded.question.unwrap();
        assert_eq!(question.qname, name("www.example.test"));
        assert_eq!(question.qtype, Type::CNAME);
    }

    #[tokio::test]
    async fn misses_are_refused_without_proxy() {
        let dispatcher = Dispatcher::new(cache_of(""), None, MissPolicy::Refused);
        let response = dispatch(&dispatcher, 9, "elsewhere.test", Type::A).await;
        let decoded = decode(&response).unwrap();
        assert_eq!(decoded.header.id, 9);
        assert!(decoded.header.qr);
        assert!(decoded.header.rd);
        assert_eq!(decoded.header.rcode, Rcode::Refused);
        assert_eq!(decoded.header.ancount, 0);
        assert_eq!(decoded.question.unwrap().qname, name("elsewhere.test"));
    }

    #[tokio::test]
    async fn misses_can_be_nxdomain() {
        let dispatcher = Dispatcher::new(cache_of(""), None, MissPolicy::NxDomain);
        let response = dispatch(&dispatcher, 9, "elsewhere.test", Type::MX).await;
        assert_eq!(decode(&response).unwrap().header.rcode, Rcode::NxDomain);
    }

    #[tokio::test]
    async fn drops_malformed_queries_and_responses() {
        let dispatcher = Dispatcher::new(cache_of(""), None, MissPolicy::Refused);
        let mut buf = vec![0; MAX_UDP_MESSAGE_SIZE];
        assert_eq!(
            dispatcher.handle_message(&mut buf, 5, udp_info()).await,
            Response::None
        );

        let (mut buf, len) = query(1, "host.example.test", Type::A, None);
        buf[2] |= 0x80;
        assert_eq!(
            dispatcher.handle_message(&mut buf, len, udp_info()).await,
            Response::None
        );
        assert_eq!(dispatcher.stats().snapshot().dropped, 2);
    }

    #[tokio::test]
    async fn large_answers_are_truncated_for_small_udp_clients() {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("big 10.0.0.{}\n", i));
        }
        let dispatcher = Dispatcher::new(cache_of(&text), None, MissPolicy::Refused);

        let response = dispatch(&dispatcher, 3, "big.example.test", Type::A).await;
        let decoded = decode(&response).unwrap();
        assert!(Reader::try_from(&response[..]).unwrap().header().tc);
        assert_eq!(decoded.header.ancount, 0);

        let (buf, len) = query(3, "big.example.test", Type::A, Some(1232));
        let tcp = ReceivedInfo::new("127.0.0.1:5353".parse().unwrap(), Transport::Tcp);
        for info in [udp_info(), tcp] {
            let mut copy = buf.clone();
            match dispatcher.handle_message(&mut copy, len, info).await {
                Response::Single(n) => assert_eq!(decode(&copy[..n]).unwrap().header.ancount, 40),
                Response::None => panic!("no response"),
            }
        }
    }

    #[tokio::test]
    async fn relays_upstream_replies() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0; 512];
            let (len, client) = upstream.recv_from(&mut buf).await.unwrap();
            buf[2] |= 0x80;
            upstream.send_to(&buf[..len], client).await.unwrap();
        });

        let proxy = ProxyConfig {
            upstreams: vec![upstream_addr],
            timeout: Duration::from_secs(2),
        };
        let dispatcher = Dispatcher::new(cache_of(""), Some(proxy), MissPolicy::Refused);
        let (mut buf, len) = query(0x4242, "elsewhere.test", Type::A, None);
        let sent = buf[..len].to_vec();
        match dispatcher.handle_message(&mut buf, len, udp_info()).await {
            Response::Single(n) => {
                assert_eq!(n, len);
                assert_eq!(buf[2] & 0x80, 0x80);
                assert_eq!(&buf[3..n], &sent[3..]);
            }
            Response::None => panic!("no response"),
        }
        assert_eq!(dispatcher.stats().snapshot().proxied, 1);
    }

    #[tokio::test]
    async fn upstream_timeouts_count_as_failures() {
        // Bound but never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let proxy = ProxyConfig {
            upstreams: vec![silent.local_addr().unwrap()],
            timeout: Duration::from_millis(100),
        };
        let dispatcher = Dispatcher::new(cache_of(""), Some(proxy), MissPolicy::Refused);
        let (mut buf, len) = query(1, "elsewhere.test", Type::A, None);
        assert_eq!(
            dispatcher.handle_message(&mut buf, len, udp_info()).await,
            Response::None
        );
        assert_eq!(dispatcher.stats().snapshot().upstream_failures, 1);
    }

    #[test]
    fn received_info_canonicalizes_ipv4_mapped_addrs() {
        let info = ReceivedInfo::new("[::ffff:127.0.0.1]:53".parse().unwrap(), Transport::Udp);
        assert_eq!(info.source(), "127.0.0.1:53".parse().unwrap());
    }
}
