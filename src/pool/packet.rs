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

//! Implementation of the [`PacketPool`].

use log::trace;
use tokio::sync::{mpsc, Mutex};

/// A bounded supply of zero-filled message buffers.
///
/// [`PacketPool::start`] spawns a producer task on the active Tokio
/// runtime that allocates buffers and queues them until `capacity` are
/// waiting. Consumers take buffers with [`PacketPool::get`].
#[derive(Debug)]
pub struct PacketPool {
    receiver: Mutex<mpsc::Receiver<Vec<u8>>>,
    buffer_size: usize,
}

impl PacketPool {
    /// Starts a pool of `buffer_size`-octet buffers. This must be
    /// called within a Tokio runtime.
    pub fn start(capacity: usize, buffer_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            while sender.send(vec![0; buffer_size]).await.is_ok() {}
            trace!("packet pool producer exiting");
        });
        Self {
            receiver: Mutex::new(receiver),
            buffer_size,
        }
    }

    /// The size of the buffers handed out.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Takes a buffer from the pool. If the producer has fallen behind,
    /// this waits for it; if it has gone away, the buffer is allocated
    /// here.
    pub async fn get(&self) -> Vec<u8> {
        let buffer = self.receiver.lock().await.recv().await;
        buffer.unwrap_or_else(|| vec![0; self.buffer_size])
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
