//! One-shot retransmission of a DTLS handshake flight
//!
//! Each handshake flight gets a [`Resender`] that sends the same bytes once
//! more after a delay unless an inbound DTLS record cancels it first. Longer
//! outages are handled by restarting the handshake when connectivity
//! recovers, so a resender never retries more than once.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::component::Component;
use crate::ice::IceConnection;
use crate::lock;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default delay before a flight is resent
pub const DEFAULT_RESEND_DELAY: Duration = Duration::from_secs(3);

/// Outcome of the most recent arming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendStatus {
    /// Armed, delay not yet elapsed
    Pending,
    /// Cancelled before the delay elapsed
    Cancelled,
    /// The flight was sent a second time
    Resent,
    /// The resend could not be written to the connection
    Failed,
}

impl ResendStatus {
    /// Numeric status code (0 pending, 1 cancelled, 2 resent, -1 failed)
    pub fn code(self) -> i32 {
        match self {
            ResendStatus::Pending => 0,
            ResendStatus::Cancelled => 1,
            ResendStatus::Resent => 2,
            ResendStatus::Failed => -1,
        }
    }
}

struct ResendState {
    status: ResendStatus,
    /// Bumped by every `start`; a worker only acts for its own arming
    generation: u64,
}

struct Worker {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Delayed single resend of one flight on one component
pub struct Resender {
    ice: Arc<dyn IceConnection>,
    component: Component,
    data: Bytes,
    delay: Duration,
    runtime: Handle,
    state: Arc<Mutex<ResendState>>,
    worker: Option<Worker>,
}

impl Resender {
    /// Create an unarmed resender for `data`
    pub fn new(
        ice: Arc<dyn IceConnection>,
        component: Component,
        data: Bytes,
        delay: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            ice,
            component,
            data,
            delay,
            runtime,
            state: Arc::new(Mutex::new(ResendState {
                status: ResendStatus::Pending,
                generation: 0,
            })),
            worker: None,
        }
    }

    /// Arm the delay, retiring any previous arming first
    pub fn start(&mut self) {
        self.retire();

        let generation = {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.status = ResendStatus::Pending;
            state.generation
        };

        let token = CancellationToken::new();
        let task = self.runtime.spawn(resend_after_delay(
            self.ice.clone(),
            self.component,
            self.data.clone(),
            self.delay,
            self.state.clone(),
            token.clone(),
            generation,
        ));

        trace!(component = %self.component, delay_ms = self.delay.as_millis() as u64, "Resend armed");
        self.worker = Some(Worker { token, task });
    }

    /// Disarm a pending resend. No effect once the resend has fired.
    pub fn cancel(&self) {
        {
            let mut state = lock(&self.state);
            if state.status == ResendStatus::Pending {
                state.status = ResendStatus::Cancelled;
            }
        }
        if let Some(worker) = &self.worker {
            worker.token.cancel();
        }
    }

    /// Current status
    pub fn status(&self) -> ResendStatus {
        lock(&self.state).status
    }

    /// Cancel and wait for the worker to finish
    pub async fn stop(&mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            worker.token.cancel();
            let _ = worker.task.await;
        }
    }

    fn retire(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.token.cancel();
            worker.task.abort();
        }
    }
}

impl Drop for Resender {
    fn drop(&mut self) {
        self.cancel();
        self.retire();
    }
}

async fn resend_after_delay(
    ice: Arc<dyn IceConnection>,
    component: Component,
    data: Bytes,
    delay: Duration,
    state: Arc<Mutex<ResendState>>,
    token: CancellationToken,
    generation: u64,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    // Decide under the status lock so a cancel that already returned wins
    let mut guard = lock(&state);
    if guard.generation != generation || guard.status != ResendStatus::Pending {
        return;
    }

    match ice.send_data(component, &data) {
        Ok(written) => {
            debug!(component = %component, len = written, "Resent handshake flight");
            guard.status = ResendStatus::Resent;
        }
        Err(e) => {
            warn!(component = %component, error = %e, "Failed to resend handshake flight");
            guard.status = ResendStatus::Failed;
        }
    }
}
