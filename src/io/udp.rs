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

//! The UDP worker.

use std::io;
use std::sync::Arc;

use log::{debug, error};
use tokio::net::UdpSocket;

use super::shutdown::ShutdownHandle;
use super::{WorkerState, WorkerStatus};
use crate::pool::PacketPool;
use crate::server::{Dispatcher, ReceivedInfo, Response, Transport};

/// Spawns a UDP worker on the active Tokio runtime. Several workers
/// may share one socket. The worker runs until shutdown is requested
/// through `shutdown`, and holds up shutdown until it has drained.
pub fn spawn_udp_worker(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    packets: Arc<PacketPool>,
    shutdown: ShutdownHandle,
) -> io::Result<Arc<WorkerStatus>> {
    let status = WorkerStatus::new(Transport::Udp, socket.local_addr()?);
    tokio::spawn(run_udp_worker(
        socket,
        dispatcher,
        packets,
        shutdown,
        status.clone(),
    ));
    Ok(status)
}

/// The UDP receive loop.
async fn run_udp_worker(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    packets: Arc<PacketPool>,
    mut shutdown: ShutdownHandle,
    status: Arc<WorkerStatus>,
) {
    status.set_state(WorkerState::Serving);
    let mut buf = packets.get().await;

    loop {
        let (received_len, source) = tokio::select! {
            _ = shutdown.requested() => break,
            res = socket.recv_from(&mut buf) => match res {
                Ok(received) => received,
                Err(e) => {
                    // Errors such as ICMP port unreachable reports
                    // concern one peer, not the socket.
                    error!("UDP receive error on {}: {}", status.local_addr, e);
                    continue;
                }
            },
        };

        // The received buffer moves into the request task, which owns
        // it until the response is sent.
        let mut request_buf = std::mem::replace(&mut buf, packets.get().await);
        let in_flight = status.begin_request();
        let wait_token = shutdown.wait_token();
        let socket = socket.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let info = ReceivedInfo::new(source, Transport::Udp);
            match dispatcher
                .handle_message(&mut request_buf, received_len, info)
                .await
            {
                Response::Single(response_len) => {
                    if let Err(e) = socket.send_to(&request_buf[..response_len], source).await {
                        debug!("failed to send a UDP response to {}: {}", source, e);
                    }
                }
                Response::None => (),
            }
            drop(in_flight);
            drop(wait_token);
        });
    }

    status.drain().await;
}
