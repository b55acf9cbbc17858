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

//! The graceful shutdown mechanism shared by workers and their tasks.

use tokio::sync::{broadcast, mpsc};

/// Controls the shutdown of a set of Tokio tasks.
///
/// Use [`ShutdownController::shut_down`] to initiate shutdown and wait
/// for its completion. Dropping the controller also triggers
/// shutdown (but does not wait for it to complete).
#[must_use]
#[derive(Debug)]
pub struct ShutdownController {
    request_sender: broadcast::Sender<()>,
    wait_receiver: mpsc::Receiver<()>,
}

impl ShutdownController {
    /// Requests that the tasks shut down, and then waits for every
    /// [`ShutdownHandle`] to be dropped.
    pub async fn shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.recv().await;
    }
}

/// A handle held by tasks to interact with the graceful shutdown
/// mechanism.
///
/// This type has two roles:
///
/// 1. It lets tasks listen for a shutdown request, through
///    [`ShutdownHandle::requested`]. The request is not a value being
///    sent, but rather the controller's sender being dropped.
/// 2. It prevents shutdown from completing until it is dropped. Every
///    task that must finish before shutdown completes therefore owns a
///    `ShutdownHandle` (or at least a [`WaitToken`]).
#[derive(Debug)]
pub struct ShutdownHandle {
    request_receiver: broadcast::Receiver<()>,
    wait_sender: mpsc::Sender<()>,
}

/// The part of a [`ShutdownHandle`] that holds up shutdown.
#[derive(Clone, Debug)]
pub struct WaitToken {
    _sender: mpsc::Sender<()>,
}

impl ShutdownHandle {
    /// Resolves once shutdown has been requested.
    pub async fn requested(&mut self) {
        while self.request_receiver.recv().await.is_ok() {}
    }

    /// Returns a token that holds up shutdown until dropped.
    pub fn wait_token(&self) -> WaitToken {
        WaitToken {
            _sender: self.wait_sender.clone(),
        }
    }
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        // A resubscribed receiver misses values already queued, but no
        // values are ever sent; only the closing of the channel matters.
        ShutdownHandle {
            request_receiver: self.request_receiver.resubscribe(),
            wait_sender: self.wait_sender.clone(),
        }
    }
}

/// Produces a [`ShutdownController`] and an initial [`ShutdownHandle`]
/// connected to it.
pub fn make_shutdown_channels() -> (ShutdownController, ShutdownHandle) {
    let (request_sender, request_receiver) = broadcast::channel(1);
    let (wait_sender, wait_receiver) = mpsc::channel(1);
    let controller = ShutdownController {
        request_sender,
        wait_receiver,
    };
    let handle = ShutdownHandle {
        request_receiver,
        wait_sender,
    };
    (controller, handle)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn shut_down_waits_for_tokens() {
        let (controller, mut handle) = make_shutdown_channels();
        let finished = Arc::new(AtomicBool::new(false));

        let token = handle.wait_token();
        let task_finished = finished.clone();
        tokio::spawn(async move {
            handle.requested().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            task_finished.store(true, Ordering::SeqCst);
            drop(token);
        });

        controller.shut_down().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
