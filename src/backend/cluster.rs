//! Long-lived cluster workers coordinated by message passing
//!
//! Socket and MPI clusters share one implementation: a named worker thread
//! per node, started with the session, each reading [`NodeMessage`]s from
//! its own channel and replying on a per-call result channel. Nodes stay
//! alive across mapping calls until the session stops.

use super::{into_ordered, ExecutionBackend, Workload};
use crate::config::Mode;
use crate::dispatch::{JobResult, WorkUnit, WorkWrapper};
use crate::error::{ErrorCode, ParmapError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Mutex;
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Transport family of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Socket,
    Mpi,
}

impl ClusterKind {
    pub fn mode(&self) -> Mode {
        match self {
            ClusterKind::Socket => Mode::Socket,
            ClusterKind::Mpi => Mode::Mpi,
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode().as_str())
    }
}

type Reply = (usize, usize, JobResult);

enum NodeMessage {
    Run {
        batch: Vec<WorkUnit>,
        wrapper: WorkWrapper,
        reply: mpsc::UnboundedSender<Reply>,
    },
    Shutdown,
}

struct Node {
    name: String,
    sender: mpsc::UnboundedSender<NodeMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

fn node_loop(id: usize, mut inbox: mpsc::UnboundedReceiver<NodeMessage>, runtime: Handle) {
    let _runtime = runtime.enter();
    while let Some(message) = inbox.blocking_recv() {
        match message {
            NodeMessage::Run {
                batch,
                wrapper,
                reply,
            } => {
                for unit in batch {
                    let result = wrapper.call(&unit);
                    if reply.send((id, unit.index, result)).is_err() {
                        break;
                    }
                }
            }
            NodeMessage::Shutdown => break,
        }
    }
}

/// A running socket or MPI cluster
pub struct ClusterBackend {
    kind: ClusterKind,
    nodes: Vec<Node>,
    load_balancing: bool,
}

impl fmt::Debug for ClusterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        f.debug_struct("ClusterBackend")
            .field("kind", &self.kind)
            .field("nodes", &names)
            .field("load_balancing", &self.load_balancing)
            .finish()
    }
}

impl ClusterBackend {
    /// Start one worker per node name. Must be called inside a tokio runtime.
    pub fn start(kind: ClusterKind, node_names: &[String], load_balancing: bool) -> Result<Self> {
        if node_names.is_empty() {
            return Err(ParmapError::config_with_code(
                ErrorCode::CONFIG_INVALID_CPUS,
                format!("A {} cluster needs at least one node", kind),
            ));
        }

        let runtime = Handle::try_current().map_err(|e| {
            ParmapError::backend_with_code(
                ErrorCode::BACKEND_GENERIC,
                "Cluster workers require a running tokio runtime",
                kind.mode().as_str(),
            )
            .with_source(e)
        })?;

        let mut nodes = Vec::with_capacity(node_names.len());
        for (id, name) in node_names.iter().enumerate() {
            let (sender, inbox) = mpsc::unbounded_channel();
            let handle = runtime.clone();
            let thread = std::thread::Builder::new()
                .name(format!("parmap-{}-{}-{}", kind, id, name))
                .spawn(move || node_loop(id, inbox, handle))
                .map_err(|e| {
                    ParmapError::backend_with_code(
                        ErrorCode::BACKEND_GENERIC,
                        format!("Failed to start {} node '{}'", kind, name),
                        kind.mode().as_str(),
                    )
                    .with_source(e)
                })?;
            debug!("Started {} node {} ({})", kind, id, name);
            nodes.push(Node {
                name: name.clone(),
                sender,
                thread: Mutex::new(Some(thread)),
            });
        }

        Ok(Self {
            kind,
            nodes,
            load_balancing,
        })
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn send(&self, node: usize, message: NodeMessage) -> Result<()> {
        self.nodes[node]
            .sender
            .send(message)
            .map_err(|_| self.node_lost(node))
    }

    fn node_lost(&self, node: usize) -> ParmapError {
        ParmapError::backend_with_code(
            ErrorCode::BACKEND_WORKER_LOST,
            format!("Lost connection to {} node '{}'", self.kind, self.nodes[node].name),
            self.kind.mode().as_str(),
        )
    }

    fn lost_reply(&self, received: usize, expected: usize) -> ParmapError {
        ParmapError::backend_with_code(
            ErrorCode::BACKEND_WORKER_LOST,
            format!(
                "{} cluster stopped replying after {} of {} units",
                self.kind, received, expected
            ),
            self.kind.mode().as_str(),
        )
    }

    async fn run_static(&self, workload: Workload) -> Result<Vec<JobResult>> {
        let n = workload.len();
        let nodes = self.nodes.len();
        let (reply, mut replies) = mpsc::unbounded_channel();

        let mut batches: Vec<Vec<WorkUnit>> = vec![Vec::new(); nodes];
        for unit in workload.units {
            batches[unit.index % nodes].push(unit);
        }
        for (node, batch) in batches.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            debug!("Sending {} units to {} node {}", batch.len(), self.kind, node);
            self.send(
                node,
                NodeMessage::Run {
                    batch,
                    wrapper: workload.wrapper.clone(),
                    reply: reply.clone(),
                },
            )?;
        }
        drop(reply);

        let mut received = Vec::with_capacity(n);
        while received.len() < n {
            match replies.recv().await {
                Some((_, index, result)) => received.push((index, result)),
                None => return Err(self.lost_reply(received.len(), n)),
            }
        }
        into_ordered(n, received, self.kind.mode().as_str())
    }

    async fn run_balanced(&self, workload: Workload) -> Result<Vec<JobResult>> {
        let n = workload.len();
        let (reply, mut replies) = mpsc::unbounded_channel();
        let mut pending = workload.units.into_iter();
        let wrapper = workload.wrapper;

        let dispatch_one = |node: usize, unit: WorkUnit| {
            debug!("Sending unit {} to {} node {}", unit.number(), self.kind, node);
            self.send(
                node,
                NodeMessage::Run {
                    batch: vec![unit],
                    wrapper: wrapper.clone(),
                    reply: reply.clone(),
                },
            )
        };

        for node in 0..self.nodes.len() {
            match pending.next() {
                Some(unit) => dispatch_one(node, unit)?,
                None => break,
            }
        }

        let mut received = Vec::with_capacity(n);
        while received.len() < n {
            match replies.recv().await {
                Some((node, index, result)) => {
                    received.push((index, result));
                    if let Some(unit) = pending.next() {
                        dispatch_one(node, unit)?;
                    }
                }
                None => return Err(self.lost_reply(received.len(), n)),
            }
        }
        into_ordered(n, received, self.kind.mode().as_str())
    }
}

#[async_trait]
impl ExecutionBackend for ClusterBackend {
    fn mode(&self) -> Mode {
        self.kind.mode()
    }

    fn cpus(&self) -> usize {
        self.nodes.len()
    }

    async fn run_all(&self, workload: Workload) -> Result<Vec<JobResult>> {
        if workload.is_empty() {
            return Ok(Vec::new());
        }
        if self.load_balancing {
            self.run_balanced(workload).await
        } else {
            self.run_static(workload).await
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let mut threads = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if node.sender.send(NodeMessage::Shutdown).is_err() {
                debug!("{} node '{}' already stopped", self.kind, node.name);
            }
            if let Ok(mut slot) = node.thread.lock() {
                if let Some(thread) = slot.take() {
                    threads.push((node.name.clone(), thread));
                }
            }
        }

        let kind = self.kind;
        tokio::task::spawn_blocking(move || {
            for (name, thread) in threads {
                if thread.join().is_err() {
                    warn!("{} node '{}' terminated abnormally", kind, name);
                }
            }
        })
        .await?;
        debug!("Stopped {} cluster", self.kind);
        Ok(())
    }
}
