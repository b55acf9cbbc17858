// Copyright 2023 Matthew Ingwersen.
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

//! The TCP worker.
//!
//! Each connection carries a single query: the worker reads one
//! length-prefixed message, writes one length-prefixed response, and
//! closes the connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::shutdown::ShutdownHandle;
use super::{WorkerState, WorkerStatus, ACCEPT_ERROR_DELAY, READ_MESSAGE_TIMEOUT};
use crate::pool::PacketPool;
use crate::server::{Dispatcher, ReceivedInfo, Response, Transport};

/// Spawns a TCP worker on the active Tokio runtime. Several workers
/// may accept on one listener. The worker runs until shutdown is
/// requested through `shutdown`, and holds up shutdown until it has
/// drained.
pub fn spawn_tcp_worker(
    listener: Arc<TcpListener>,
    dispatcher: Arc<Dispatcher>,
    packets: Arc<PacketPool>,
    shutdown: ShutdownHandle,
) -> io::Result<Arc<WorkerStatus>> {
    let status = WorkerStatus::new(Transport::Tcp, listener.local_addr()?);
    tokio::spawn(run_tcp_worker(
        listener,
        dispatcher,
        packets,
        shutdown,
        status.clone(),
    ));
    Ok(status)
}

/// The TCP accept loop.
async fn run_tcp_worker(
    listener: Arc<TcpListener>,
    dispatcher: Arc<Dispatcher>,
    packets: Arc<PacketPool>,
    mut shutdown: ShutdownHandle,
    status: Arc<WorkerStatus>,
) {
    status.set_state(WorkerState::Serving);

    loop {
        let (stream, source) = tokio::select! {
            _ = shutdown.requested() => break,
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("TCP accept error on {}: {}", status.local_addr, e);
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                    continue;
                }
            },
        };

        let in_flight = status.begin_request();
        let shutdown = shutdown.clone();
        let dispatcher = dispatcher.clone();
        let packets = packets.clone();
        tokio::spawn(async move {
            let buf = packets.get().await;
            if let Err(e) = handle_tcp_connection(stream, source, &dispatcher, buf, shutdown).await {
                debug!("TCP connection from {} failed: {}", source, e);
            }
            drop(in_flight);
        });
    }

    status.drain().await;
}

/// Serves the single query of a TCP connection.
async fn handle_tcp_connection(
    mut stream: TcpStream,
    source: SocketAddr,
    dispatcher: &Dispatcher,
    mut buf: Vec<u8>,
    mut shutdown: ShutdownHandle,
) -> io::Result<()> {
    // The message is read in after a two-octet gap, so that the
    // response can be written in front of its length prefix in place.
    let received_len = tokio::select! {
        _ = shutdown.requested() => return Ok(()),
        res = timeout(READ_MESSAGE_TIMEOUT, read_message(&mut stream, &mut buf[2..])) => match res {
            Ok(res) => res?,
            Err(_) => return Ok(()), // The client was too slow.
        },
    };

    let info = ReceivedInfo::new(source, Transport::Tcp);
    match dispatcher
        .handle_message(&mut buf[2..], received_len, info)
        .await
    {
        Response::Single(response_len) => {
            buf[0..2].copy_from_slice(&(response_len as u16).to_be_bytes());
            stream.write_all(&buf[..2 + response_len]).await?;
            stream.shutdown().await
        }
        Response::None => Ok(()),
    }
}

/// Reads one length-prefixed DNS message into `buf`, returning its
/// length. A message that does not fit is an error.
async fn read_message(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    let len = stream.read_u16().await? as usize;
    if len > buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{len}-octet message is too large"),
        ));
    }
    stream.read_exact(&mut buf[..len]).await?;
    Ok(len)
}
