//! Snapshot transport between a primary and its secondaries.
//!
//! The distributed stepping logic is written against [`SnapshotLink`], a
//! small blocking trait, so it runs identically over NATS in production and
//! over an in-process channel pair in tests. Runner threads are plain OS
//! threads; the NATS implementation owns its own single-threaded Tokio
//! runtime and bridges with `block_on`.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec;
use crate::connection::NatsConnection;
use crate::error::NetError;
use crate::messages::{SecondaryReady, SnapshotMsg, StepAck};
use crate::subjects;

/// One end of a snapshot/ack transport.
///
/// A primary calls `send_snapshot`, `recv_ready`, and `recv_acks`; a
/// secondary calls `recv_snapshot`, `send_ready`, and `send_ack`. All
/// receives are blocking with a deadline.
pub trait SnapshotLink: Send {
    fn send_snapshot(&mut self, msg: &SnapshotMsg) -> Result<(), NetError>;
    fn recv_snapshot(&mut self, timeout: Duration) -> Result<SnapshotMsg, NetError>;

    fn send_ack(&mut self, ack: &StepAck) -> Result<(), NetError>;
    fn recv_ack(&mut self, timeout: Duration) -> Result<StepAck, NetError>;

    fn send_ready(&mut self, msg: &SecondaryReady) -> Result<(), NetError>;
    fn recv_ready(&mut self, timeout: Duration) -> Result<SecondaryReady, NetError>;

    /// Collect `expected` acks within `timeout` total.
    fn recv_acks(&mut self, expected: usize, timeout: Duration) -> Result<Vec<StepAck>, NetError> {
        let deadline = Instant::now() + timeout;
        let mut acks = Vec::with_capacity(expected);
        while acks.len() < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetError::Timeout("step acks"));
            }
            acks.push(self.recv_ack(remaining)?);
        }
        Ok(acks)
    }
}

// ── In-process link ─────────────────────────────────────────────────────────

/// One end of an in-process link pair; see [`local_link`].
pub struct LocalLink {
    snap_tx: mpsc::Sender<SnapshotMsg>,
    snap_rx: mpsc::Receiver<SnapshotMsg>,
    ack_tx: mpsc::Sender<StepAck>,
    ack_rx: mpsc::Receiver<StepAck>,
    ready_tx: mpsc::Sender<SecondaryReady>,
    ready_rx: mpsc::Receiver<SecondaryReady>,
}

/// Build a connected pair of in-process links. Symmetric: what one end
/// sends, the other receives.
#[must_use]
pub fn local_link() -> (LocalLink, LocalLink) {
    let (snap_ab_tx, snap_ab_rx) = mpsc::channel();
    let (snap_ba_tx, snap_ba_rx) = mpsc::channel();
    let (ack_ab_tx, ack_ab_rx) = mpsc::channel();
    let (ack_ba_tx, ack_ba_rx) = mpsc::channel();
    let (ready_ab_tx, ready_ab_rx) = mpsc::channel();
    let (ready_ba_tx, ready_ba_rx) = mpsc::channel();
    let a = LocalLink {
        snap_tx: snap_ab_tx,
        snap_rx: snap_ba_rx,
        ack_tx: ack_ab_tx,
        ack_rx: ack_ba_rx,
        ready_tx: ready_ab_tx,
        ready_rx: ready_ba_rx,
    };
    let b = LocalLink {
        snap_tx: snap_ba_tx,
        snap_rx: snap_ab_rx,
        ack_tx: ack_ba_tx,
        ack_rx: ack_ab_rx,
        ready_tx: ready_ba_tx,
        ready_rx: ready_ab_rx,
    };
    (a, b)
}

fn recv_local<T>(rx: &mpsc::Receiver<T>, timeout: Duration, what: &'static str) -> Result<T, NetError> {
    rx.recv_timeout(timeout).map_err(|err| match err {
        mpsc::RecvTimeoutError::Timeout => NetError::Timeout(what),
        mpsc::RecvTimeoutError::Disconnected => NetError::Closed(what),
    })
}

impl SnapshotLink for LocalLink {
    fn send_snapshot(&mut self, msg: &SnapshotMsg) -> Result<(), NetError> {
        self.snap_tx
            .send(msg.clone())
            .map_err(|_| NetError::Closed("snapshot"))
    }

    fn recv_snapshot(&mut self, timeout: Duration) -> Result<SnapshotMsg, NetError> {
        recv_local(&self.snap_rx, timeout, "snapshot")
    }

    fn send_ack(&mut self, ack: &StepAck) -> Result<(), NetError> {
        self.ack_tx
            .send(ack.clone())
            .map_err(|_| NetError::Closed("step ack"))
    }

    fn recv_ack(&mut self, timeout: Duration) -> Result<StepAck, NetError> {
        recv_local(&self.ack_rx, timeout, "step ack")
    }

    fn send_ready(&mut self, msg: &SecondaryReady) -> Result<(), NetError> {
        self.ready_tx
            .send(msg.clone())
            .map_err(|_| NetError::Closed("secondary ready"))
    }

    fn recv_ready(&mut self, timeout: Duration) -> Result<SecondaryReady, NetError> {
        recv_local(&self.ready_rx, timeout, "secondary ready")
    }
}

// ── NATS link ───────────────────────────────────────────────────────────────

/// Which side of the link this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Primary,
    Secondary,
}

/// [`SnapshotLink`] over NATS.
///
/// Owns a single-threaded Tokio runtime; all async I/O is bridged through
/// `block_on` so the runner thread's synchronous tick loop stays in charge
/// of pacing.
pub struct NatsLink {
    runtime: tokio::runtime::Runtime,
    conn: NatsConnection,
    world: String,
    snap_sub: Option<async_nats::Subscriber>,
    ack_sub: Option<async_nats::Subscriber>,
    ready_sub: Option<async_nats::Subscriber>,
}

impl NatsLink {
    /// Connect to NATS and subscribe to the subjects this role receives on.
    ///
    /// Subscriptions are made before returning, so no message published
    /// after `connect` returns can be missed.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if the runtime, connection, or subscriptions
    /// fail.
    pub fn connect(role: LinkRole, world: &str, url: &str) -> Result<Self, NetError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let conn = runtime.block_on(NatsConnection::connect_to(url))?;
        let (snap_sub, ack_sub, ready_sub) = runtime.block_on(async {
            match role {
                LinkRole::Primary => {
                    let acks = conn.subscribe(&subjects::ack_subject(world)).await?;
                    let ready = conn.subscribe(&subjects::ready_subject(world)).await?;
                    Ok::<_, NetError>((None, Some(acks), Some(ready)))
                }
                LinkRole::Secondary => {
                    let snaps = conn.subscribe(&subjects::state_subject(world)).await?;
                    Ok((Some(snaps), None, None))
                }
            }
        })?;
        debug!(world, ?role, "snapshot link connected");
        Ok(Self {
            runtime,
            conn,
            world: world.to_string(),
            snap_sub,
            ack_sub,
            ready_sub,
        })
    }

    fn publish<T: serde::Serialize>(&self, subject: &str, msg: &T) -> Result<(), NetError> {
        self.runtime.block_on(self.conn.publish(subject, msg))
    }
}

fn recv_nats<T: DeserializeOwned>(
    runtime: &tokio::runtime::Runtime,
    sub: Option<&mut async_nats::Subscriber>,
    timeout: Duration,
    what: &'static str,
) -> Result<T, NetError> {
    let Some(sub) = sub else {
        return Err(NetError::Closed(what));
    };
    runtime.block_on(async {
        match tokio::time::timeout(timeout, sub.next()).await {
            Ok(Some(msg)) => codec::decode(&msg.payload),
            Ok(None) => Err(NetError::Closed(what)),
            Err(_) => Err(NetError::Timeout(what)),
        }
    })
}

impl SnapshotLink for NatsLink {
    fn send_snapshot(&mut self, msg: &SnapshotMsg) -> Result<(), NetError> {
        self.publish(&subjects::state_subject(&self.world), msg)
    }

    fn recv_snapshot(&mut self, timeout: Duration) -> Result<SnapshotMsg, NetError> {
        recv_nats(&self.runtime, self.snap_sub.as_mut(), timeout, "snapshot")
    }

    fn send_ack(&mut self, ack: &StepAck) -> Result<(), NetError> {
        self.publish(&subjects::ack_subject(&self.world), ack)
    }

    fn recv_ack(&mut self, timeout: Duration) -> Result<StepAck, NetError> {
        recv_nats(&self.runtime, self.ack_sub.as_mut(), timeout, "step ack")
    }

    fn send_ready(&mut self, msg: &SecondaryReady) -> Result<(), NetError> {
        self.publish(&subjects::ready_subject(&self.world), msg)
    }

    fn recv_ready(&mut self, timeout: Duration) -> Result<SecondaryReady, NetError> {
        recv_nats(
            &self.runtime,
            self.ready_sub.as_mut(),
            timeout,
            "secondary ready",
        )
    }
}
