//! Caller-side protocol handle.
//!
//! [`InferenceClient`] pairs the worker channels with a [`RequestTracker`]
//! and enforces the protocol's caller-side rules:
//!
//! - at most one request is outstanding; dispatching again supersedes the
//!   previous one and its eventual reply is dropped by identifier,
//! - a request that misses its deadline yields [`Error::Timeout`] and a
//!   best-effort cancel message to the worker,
//! - replies carrying a non-current identifier are discarded silently.

use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::tracker::{RequestId, RequestTracker};
use super::worker::{WorkerChannels, WorkerRequest, WorkerResponse};
use crate::backend::{ExecutionMode, RunResult};
use crate::config::{BackendConfig, SamplingParams};
use crate::error::{Error, Result};
use crate::tokenizer::TokenWithOffset;

/// What a successful backend load reports back.
#[derive(Debug, Clone, Copy)]
pub struct InitReport {
    /// Execution mode the loader selected.
    pub execution_mode: ExecutionMode,
    /// Load wall time in milliseconds.
    pub load_time_ms: u64,
}

/// Handle to a spawned worker, enforcing single-outstanding-request
/// semantics.
#[derive(Debug)]
pub struct InferenceClient {
    channels: WorkerChannels,
    tracker: RequestTracker,
    timeout: Duration,
}

impl InferenceClient {
    /// Wrap worker channels with the given per-request timeout.
    pub fn new(channels: WorkerChannels, timeout: Duration) -> Self {
        Self {
            channels,
            tracker: RequestTracker::new(),
            timeout,
        }
    }

    /// Ask the worker to load a backend and wait for the outcome.
    ///
    /// Replies for superseded runs that are still in flight are drained and
    /// discarded while waiting.
    pub async fn init(&mut self, config: BackendConfig) -> Result<InitReport> {
        self.channels
            .requests
            .send(WorkerRequest::Init { config })
            .map_err(|_| Error::WorkerClosed)?;

        loop {
            match self.channels.responses.recv().await {
                None => return Err(Error::WorkerClosed),
                Some(WorkerResponse::InitDone {
                    execution_mode,
                    load_time_ms,
                }) => {
                    return Ok(InitReport {
                        execution_mode,
                        load_time_ms,
                    })
                }
                Some(WorkerResponse::InitFailed { error }) => return Err(error),
                Some(stale) => {
                    debug!(?stale, "discarding stale run reply during init");
                }
            }
        }
    }

    /// Dispatch a run, superseding any outstanding one.
    ///
    /// Returns the fresh request identifier; the superseded request, if any,
    /// will have its reply dropped when it arrives.
    pub fn dispatch(
        &mut self,
        input_ids: Vec<u32>,
        tokens: Vec<TokenWithOffset>,
        params: SamplingParams,
    ) -> Result<RequestId> {
        let deadline = Instant::now() + self.timeout;
        let (request_id, superseded) = self.tracker.begin(deadline);
        if let Some(old) = superseded {
            debug!(superseded = old, request_id, "request superseded");
        }
        self.channels
            .requests
            .send(WorkerRequest::Run {
                request_id,
                input_ids,
                tokens,
                params,
            })
            .map_err(|_| Error::WorkerClosed)?;
        Ok(request_id)
    }

    /// Wait for the current outstanding request to finish.
    ///
    /// On deadline expiry a cancel message is sent to the worker and
    /// [`Error::Timeout`] is returned; the worker drops the result whenever
    /// the cancel lands.
    pub async fn wait_current(&mut self) -> Result<RunResult> {
        let (current, deadline) = match (self.tracker.current(), self.tracker.deadline()) {
            (Some(id), Some(deadline)) => (id, deadline),
            _ => return Err(Error::Execution("no request outstanding".to_string())),
        };

        loop {
            let received = match timeout_at(deadline, self.channels.responses.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(request_id = current, "request timed out, cancelling");
                    let _ = self
                        .channels
                        .requests
                        .send(WorkerRequest::Cancel {
                            request_id: current,
                        });
                    self.tracker.finish(current);
                    return Err(Error::Timeout);
                }
            };

            match received {
                None => return Err(Error::WorkerClosed),
                Some(WorkerResponse::RunDone { request_id, result })
                    if request_id == current && self.tracker.is_current(request_id) =>
                {
                    self.tracker.finish(request_id);
                    return Ok(result);
                }
                Some(WorkerResponse::RunFailed { request_id, error })
                    if request_id == current && self.tracker.is_current(request_id) =>
                {
                    self.tracker.finish(request_id);
                    return Err(error);
                }
                Some(stale) => {
                    debug!(?stale, "discarding stale reply");
                }
            }
        }
    }

    /// Dispatch a run and wait for its result.
    pub async fn run(
        &mut self,
        input_ids: Vec<u32>,
        tokens: Vec<TokenWithOffset>,
        params: SamplingParams,
    ) -> Result<RunResult> {
        self.dispatch(input_ids, tokens, params)?;
        self.wait_current().await
    }
}
