//! Backend worker task.
//!
//! A single spawned task owns the inference backend and every piece of
//! mutable protocol state on the far side of the execution boundary. The
//! caller side communicates with it only through one-way, ordered,
//! asynchronous messages:
//!
//! ```text
//! init   {config}                          → InitDone | InitFailed
//! run    {request_id, ids, tokens, params} → RunDone  | RunFailed
//! cancel {request_id}                      → (no reply)
//! ```
//!
//! Cancellation is cooperative: a cancel message asks the worker to drop the
//! work and suppress its reply. The caller's own timeout tracking stays
//! authoritative regardless of whether the cancel lands in time.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::tracker::RequestId;
use crate::backend::{
    extract_last_logits, input_tensors, unpack_activations, BackendLoader, ExecutionMode,
    InferenceBackend, RunResult, LOGITS,
};
use crate::config::{BackendConfig, SamplingParams};
use crate::error::{Error, Result};
use crate::sampling::filter_scores;
use crate::tokenizer::TokenWithOffset;

/// Messages sent to the worker.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Load a backend.
    Init {
        /// Backend configuration.
        config: BackendConfig,
    },
    /// Run one forward pass and filter its logits.
    Run {
        /// Identifier correlating the eventual response.
        request_id: RequestId,
        /// Token ids to run over.
        input_ids: Vec<u32>,
        /// Display tokens echoed back in the result.
        tokens: Vec<TokenWithOffset>,
        /// Sampling parameters for the filtering stage.
        params: SamplingParams,
    },
    /// Drop a request and suppress its reply.
    Cancel {
        /// Identifier of the request to drop.
        request_id: RequestId,
    },
}

/// Messages sent back by the worker.
#[derive(Debug)]
pub enum WorkerResponse {
    /// Backend loaded.
    InitDone {
        /// Execution mode the loader selected.
        execution_mode: ExecutionMode,
        /// Load wall time in milliseconds.
        load_time_ms: u64,
    },
    /// Backend load failed.
    InitFailed {
        /// What went wrong.
        error: Error,
    },
    /// A run finished.
    RunDone {
        /// Identifier of the finished request.
        request_id: RequestId,
        /// The sampling-ready result.
        result: RunResult,
    },
    /// A run failed.
    RunFailed {
        /// Identifier of the failed request.
        request_id: RequestId,
        /// What went wrong.
        error: Error,
    },
}

/// Channel pair connecting a caller to a spawned worker.
#[derive(Debug)]
pub struct WorkerChannels {
    /// Caller to worker.
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    /// Worker to caller.
    pub responses: mpsc::UnboundedReceiver<WorkerResponse>,
}

/// Cancelled-id sets larger than this are stale and get dropped wholesale.
const CANCELLED_SET_BOUND: usize = 16;

/// Spawn the worker task on the current tokio runtime.
pub fn spawn(loader: Box<dyn BackendLoader>) -> WorkerChannels {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    tokio::spawn(worker_loop(loader, request_rx, response_tx));

    WorkerChannels {
        requests: request_tx,
        responses: response_rx,
    }
}

struct WorkerState {
    loader: Box<dyn BackendLoader>,
    backend: Option<Box<dyn InferenceBackend>>,
    model_version: String,
    cancelled: HashSet<RequestId>,
}

async fn worker_loop(
    loader: Box<dyn BackendLoader>,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
) {
    let mut state = WorkerState {
        loader,
        backend: None,
        model_version: String::new(),
        cancelled: HashSet::new(),
    };

    while let Some(request) = requests.recv().await {
        let reply = match request {
            WorkerRequest::Init { config } => Some(state.handle_init(config)),
            WorkerRequest::Run {
                request_id,
                input_ids,
                tokens,
                params,
            } => state.handle_run(request_id, input_ids, tokens, params),
            WorkerRequest::Cancel { request_id } => {
                debug!(request_id, "cancel received");
                state.cancelled.insert(request_id);
                None
            }
        };
        if let Some(reply) = reply {
            // A closed response channel means the caller is gone; keep
            // draining so queued cancels do not pile up.
            let _ = responses.send(reply);
        }
    }
}

impl WorkerState {
    fn handle_init(&mut self, config: BackendConfig) -> WorkerResponse {
        let started = Instant::now();
        match self.loader.load(&config) {
            Ok(backend) => {
                let execution_mode = backend.execution_mode();
                let load_time_ms = started.elapsed().as_millis() as u64;
                info!(
                    mode = execution_mode.as_str(),
                    load_time_ms, "backend loaded"
                );
                self.backend = Some(backend);
                self.model_version = config.model_version;
                WorkerResponse::InitDone {
                    execution_mode,
                    load_time_ms,
                }
            }
            Err(error) => {
                warn!(%error, "backend load failed");
                WorkerResponse::InitFailed { error }
            }
        }
    }

    fn handle_run(
        &mut self,
        request_id: RequestId,
        input_ids: Vec<u32>,
        tokens: Vec<TokenWithOffset>,
        params: SamplingParams,
    ) -> Option<WorkerResponse> {
        if self.cancelled.len() > CANCELLED_SET_BOUND {
            self.cancelled.clear();
        }
        if self.cancelled.remove(&request_id) {
            debug!(request_id, "run already cancelled, dropping");
            return None;
        }

        let Some(backend) = self.backend.as_mut() else {
            return Some(WorkerResponse::RunFailed {
                request_id,
                error: Error::BackendUnavailable,
            });
        };

        let started = Instant::now();
        let outcome = run_once(backend.as_mut(), &input_ids, &params);
        let infer_ms = started.elapsed().as_millis() as u64;

        // The request may have been cancelled while the backend was busy.
        if self.cancelled.remove(&request_id) {
            debug!(request_id, "run cancelled mid-flight, dropping result");
            return None;
        }

        Some(match outcome {
            Ok((logits, probs, activations)) => {
                debug!(request_id, infer_ms, "run finished");
                WorkerResponse::RunDone {
                    request_id,
                    result: RunResult {
                        input_ids,
                        tokens,
                        logits,
                        probs,
                        activations,
                        execution_mode: backend.execution_mode(),
                        model_version: self.model_version.clone(),
                        infer_ms,
                    },
                }
            }
            Err(error) => {
                warn!(request_id, %error, "run failed");
                WorkerResponse::RunFailed { request_id, error }
            }
        })
    }
}

type RunPieces = (Vec<f32>, Vec<f32>, crate::backend::ActivationTensors);

fn run_once(
    backend: &mut dyn InferenceBackend,
    input_ids: &[u32],
    params: &SamplingParams,
) -> Result<RunPieces> {
    let inputs = input_tensors(input_ids)?;
    let outputs = backend.run(&inputs)?;
    let logits_tensor = outputs
        .get(LOGITS)
        .ok_or_else(|| Error::Execution(format!("backend returned no {LOGITS:?} tensor")))?;
    let logits = extract_last_logits(logits_tensor)?;
    let probs = filter_scores(&logits, params)?;
    let activations = unpack_activations(&outputs);
    Ok((logits, probs, activations))
}
