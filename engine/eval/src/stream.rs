//! Streaming fan-out backend.
//!
//! Merges single-sample requests coming from many concurrent computations
//! (different search workers, or different controllers sharing one process)
//! into larger batches for an inner backend. A dedicated worker thread drains
//! a channel, waits for at least `min_batch_size` requests (up to a short
//! collection timeout), caps batches at `max_batch_size`, and answers each
//! request on its own reply channel. `compute_blocking` on the outer
//! computation returns only when all of its slots are answered, in order.

use crate::network::{EvalError, Network, NetworkComputation};
use cinder_position::encode::InputPlanes;
use cinder_position::policy::POLICY_SIZE;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct StreamingOptions {
    /// Preferred lower bound on internal batch size; the worker waits up to
    /// `collect_timeout` to reach it.
    pub min_batch_size: usize,
    /// Hard upper bound on internal batch size.
    pub max_batch_size: usize,
    pub collect_timeout: Duration,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_batch_size: 256,
            collect_timeout: Duration::from_millis(1),
        }
    }
}

struct Request {
    planes: InputPlanes,
    reply: Sender<Result<Answer, String>>,
}

#[derive(Clone)]
struct Answer {
    q: f32,
    policy: Arc<Vec<f32>>,
}

pub struct StreamingNetwork {
    tx: Option<Sender<Request>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingNetwork {
    pub fn new(inner: Arc<dyn Network>, options: StreamingOptions) -> Self {
        let (tx, rx) = unbounded();
        let worker = std::thread::Builder::new()
            .name("cinder-nn-stream".into())
            .spawn(move || serve(inner, rx, options))
            .expect("spawn streaming evaluator thread");
        Self {
            tx: Some(tx),
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl Drop for StreamingNetwork {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.tx.take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Network for StreamingNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation> {
        Box::new(StreamingComputation {
            tx: self.tx.as_ref().expect("sender lives as long as self").clone(),
            inputs: Vec::new(),
            answers: Vec::new(),
        })
    }
}

fn serve(inner: Arc<dyn Network>, rx: Receiver<Request>, options: StreamingOptions) {
    let max = options.max_batch_size.max(1);
    let min = options.min_batch_size.clamp(1, max);
    loop {
        let first = match rx.recv() {
            Ok(req) => req,
            Err(_) => return,
        };
        let mut pending = vec![first];
        while pending.len() < max {
            let next = if pending.len() < min {
                rx.recv_timeout(options.collect_timeout).ok()
            } else {
                rx.try_recv().ok()
            };
            match next {
                Some(req) => pending.push(req),
                None => break,
            }
        }

        let mut computation = inner.new_computation();
        for req in &pending {
            computation.add_input(req.planes.clone());
        }
        match computation.compute_blocking() {
            Ok(()) => {
                for (i, req) in pending.into_iter().enumerate() {
                    let policy = (0..POLICY_SIZE as u16).map(|m| computation.p(i, m)).collect();
                    let answer = Answer {
                        q: computation.q(i),
                        policy: Arc::new(policy),
                    };
                    let _ = req.reply.send(Ok(answer));
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "streaming evaluator batch failed");
                let msg = err.to_string();
                for req in pending {
                    let _ = req.reply.send(Err(msg.clone()));
                }
            }
        }
    }
}

struct StreamingComputation {
    tx: Sender<Request>,
    inputs: Vec<InputPlanes>,
    answers: Vec<Answer>,
}

impl NetworkComputation for StreamingComputation {
    fn add_input(&mut self, planes: InputPlanes) {
        self.inputs.push(planes);
    }

    fn batch_size(&self) -> usize {
        self.inputs.len()
    }

    fn compute_blocking(&mut self) -> Result<(), EvalError> {
        let mut replies = Vec::with_capacity(self.inputs.len());
        for planes in self.inputs.drain(..) {
            let (reply_tx, reply_rx) = bounded(1);
            self.tx
                .send(Request {
                    planes,
                    reply: reply_tx,
                })
                .map_err(|_| EvalError::BackendUnavailable("streaming worker gone".into()))?;
            replies.push(reply_rx);
        }
        for reply in replies {
            let answer = reply
                .recv()
                .map_err(|_| EvalError::BackendUnavailable("streaming worker gone".into()))?
                .map_err(EvalError::ComputeFailed)?;
            self.answers.push(answer);
        }
        Ok(())
    }

    fn q(&self, idx: usize) -> f32 {
        self.answers[idx].q
    }

    fn p(&self, idx: usize, move_index: u16) -> f32 {
        self.answers[idx].policy[move_index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniform::UniformNetwork;
    use cinder_position::encode::encode_position;
    use cinder_position::History;

    fn planes() -> InputPlanes {
        encode_position(&History::starting())
    }

    #[test]
    fn answers_arrive_in_slot_order() {
        let net = StreamingNetwork::new(Arc::new(UniformNetwork::new()), StreamingOptions::default());
        let mut comp = net.new_computation();
        for _ in 0..5 {
            comp.add_input(planes());
        }
        comp.compute_blocking().unwrap();
        for i in 0..5 {
            assert_eq!(comp.q(i), 0.0);
            assert!(comp.p(i, 100) > 0.0);
        }
    }

    #[test]
    fn merges_requests_from_concurrent_computations() {
        let net = Arc::new(StreamingNetwork::new(
            Arc::new(UniformNetwork::new()),
            StreamingOptions {
                min_batch_size: 4,
                max_batch_size: 64,
                collect_timeout: Duration::from_millis(5),
            },
        ));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let net = Arc::clone(&net);
            handles.push(std::thread::spawn(move || {
                let mut comp = net.new_computation();
                comp.add_input(planes());
                comp.compute_blocking().unwrap();
                comp.q(0)
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0.0);
        }
    }
}
