//! Forwarding batches to the designated writer when it is another node.

use crate::config::RemotePolicy;
use crate::coordinator::{CoordinatorResolver, Transport};
use crate::engine::IndexEngine;
use crate::error::{IndexerError, Result};
use crate::index::dispatch::LocalDispatcher;
use crate::types::OperationBatch;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;

/// Where a retrying delivery stands. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// About to make attempt `n` (1-based).
    Attempting(u32),
    Succeeded,
    /// This node became the designated writer mid-retry; the batch went to
    /// the local executor instead.
    SwitchedLocal,
    GaveUp,
}

/// The retry bookkeeping, without any timers.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    state: RetryState,
    max_attempts: u32,
}

impl RetryMachine {
    pub fn new(max_attempts: u32) -> Self {
        RetryMachine {
            state: RetryState::Attempting(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.state, RetryState::Attempting(_))
    }

    pub fn on_local_coordinator(&mut self) -> RetryState {
        if let RetryState::Attempting(_) = self.state {
            self.state = RetryState::SwitchedLocal;
        }
        self.state
    }

    pub fn on_success(&mut self) -> RetryState {
        if let RetryState::Attempting(_) = self.state {
            self.state = RetryState::Succeeded;
        }
        self.state
    }

    pub fn on_failure(&mut self) -> RetryState {
        if let RetryState::Attempting(n) = self.state {
            self.state = if n >= self.max_attempts {
                RetryState::GaveUp
            } else {
                RetryState::Attempting(n + 1)
            };
        }
        self.state
    }
}

/// How [`RemoteDispatcher::dispatch`] handled a batch.
#[derive(Debug)]
pub enum RemoteDelivery {
    /// Queued on this node's executor.
    Local,
    /// Accepted by the designated writer.
    Sent,
    /// Handed to a background retry task; the handle yields its final state.
    Scheduled(JoinHandle<RetryState>),
}

pub struct RemoteDispatcher<E: IndexEngine> {
    local: Arc<LocalDispatcher<E>>,
    resolver: Arc<dyn CoordinatorResolver>,
    transport: Arc<dyn Transport>,
    policy: RemotePolicy,
    /// Background retries still running. `None` once aborted for shutdown.
    retries: Mutex<Option<Vec<AbortHandle>>>,
}

impl<E: IndexEngine> RemoteDispatcher<E> {
    pub fn new(
        local: Arc<LocalDispatcher<E>>,
        resolver: Arc<dyn CoordinatorResolver>,
        transport: Arc<dyn Transport>,
        policy: RemotePolicy,
    ) -> Self {
        RemoteDispatcher {
            local,
            resolver,
            transport,
            policy,
            retries: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn policy(&self) -> RemotePolicy {
        self.policy
    }

    pub async fn dispatch(&self, batch: OperationBatch) -> Result<RemoteDelivery> {
        if self.addressed_to_self(&batch) {
            self.local.dispatch(batch).await?;
            return Ok(RemoteDelivery::Local);
        }
        self.forward(batch).await
    }

    /// Like [`dispatch`](Self::dispatch), but when the designated writer is
    /// this node a full queue fails with `RejectedOverload`.
    pub async fn try_dispatch(&self, batch: OperationBatch) -> Result<RemoteDelivery> {
        if self.addressed_to_self(&batch) {
            self.local.try_dispatch(batch)?;
            return Ok(RemoteDelivery::Local);
        }
        self.forward(batch).await
    }

    /// Number of background retries that have not finished yet.
    pub fn pending_retries(&self) -> usize {
        self.retries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handles| handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Cancels every background retry; their batches are dropped. Retries
    /// scheduled afterwards are refused with `ShuttingDown`.
    pub fn abort_retries(&self) {
        let handles = self
            .retries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        let running: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
        if !running.is_empty() {
            tracing::warn!(
                "[REMOTE] aborting {} pending retries, their batches are dropped",
                running.len()
            );
        }
        for handle in running {
            handle.abort();
        }
    }

    fn addressed_to_self(&self, batch: &OperationBatch) -> bool {
        let destination = self.resolver.designated_writer_address();
        let local = destination == self.resolver.local_address();
        if local {
            tracing::debug!(
                "[REMOTE {}] designated writer {} is this node, dispatching locally",
                batch.index_id(),
                destination
            );
        }
        local
    }

    async fn forward(&self, batch: OperationBatch) -> Result<RemoteDelivery> {
        match self.policy {
            RemotePolicy::FireAndForget => {
                let destination = self.resolver.designated_writer_address();
                tracing::debug!("[REMOTE {}] sending {} to {}", batch.index_id(), batch, destination);
                self.transport.send(&destination, &batch).await?;
                Ok(RemoteDelivery::Sent)
            }
            RemotePolicy::RetryFixedDelay { max_attempts, delay } => {
                self.schedule(batch, max_attempts, delay)
            }
        }
    }

    fn schedule(
        &self,
        batch: OperationBatch,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<RemoteDelivery> {
        let mut guard = self.retries.lock().unwrap_or_else(PoisonError::into_inner);
        let retries = guard.as_mut().ok_or(IndexerError::ShuttingDown)?;
        retries.retain(|h| !h.is_finished());
        let handle = tokio::spawn(deliver_with_retries(
            Arc::clone(&self.local),
            Arc::clone(&self.resolver),
            Arc::clone(&self.transport),
            batch,
            RetryMachine::new(max_attempts),
            delay,
        ));
        retries.push(handle.abort_handle());
        Ok(RemoteDelivery::Scheduled(handle))
    }
}

async fn deliver_with_retries<E: IndexEngine>(
    local: Arc<LocalDispatcher<E>>,
    resolver: Arc<dyn CoordinatorResolver>,
    transport: Arc<dyn Transport>,
    batch: OperationBatch,
    mut machine: RetryMachine,
    delay: Duration,
) -> RetryState {
    let index_id = batch.index_id().to_string();
    // tokio intervals reject a zero period.
    let mut ticker = tokio::time::interval(delay.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_error: Option<IndexerError> = None;

    while let RetryState::Attempting(attempt) = machine.state() {
        ticker.tick().await;

        if resolver.is_local_coordinator() {
            machine.on_local_coordinator();
            tracing::info!(
                "[REMOTE {}] this node became the designated writer, dispatching locally",
                index_id
            );
            if let Err(e) = local.dispatch(batch.clone()).await {
                tracing::error!("[REMOTE {}] local dispatch failed: {}", index_id, e);
            }
            break;
        }

        let destination = resolver.designated_writer_address();
        match transport.send(&destination, &batch).await {
            Ok(()) => {
                machine.on_success();
                tracing::debug!(
                    "[REMOTE {}] delivered {} to {} on attempt {}",
                    index_id,
                    batch,
                    destination,
                    attempt
                );
            }
            Err(e) => {
                tracing::warn!(
                    "[REMOTE {}] attempt {}/{} to {} failed: {}",
                    index_id,
                    attempt,
                    machine.max_attempts(),
                    destination,
                    e
                );
                last_error = Some(e);
                machine.on_failure();
            }
        }
    }

    if machine.state() == RetryState::GaveUp {
        let cause = last_error.unwrap_or_else(|| IndexerError::TransportFailure {
            destination: resolver.designated_writer_address().to_string(),
            message: "no attempt succeeded".to_string(),
        });
        tracing::error!(
            "[REMOTE {}] giving up on {} after {} attempts, batch dropped: {}",
            index_id,
            batch,
            machine.max_attempts(),
            cause
        );
    }
    machine.state()
}
