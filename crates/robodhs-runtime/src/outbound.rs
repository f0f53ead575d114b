//! [`Outbound`] – the single path from the bridge to the DCSS socket.
//!
//! The session manager attaches a writer channel per epoch; the dispatcher
//! and the event relay push finished [`Frame`]s through it and the session's
//! writer serialises them one whole frame at a time.
//!
//! Three send flavours exist:
//!
//! - [`Outbound::send_session`] – registration and heartbeat; needs only a
//!   live link for the given epoch.
//! - [`Outbound::send_reply`] – command replies; dropped unless the link
//!   still belongs to the epoch the command arrived in.
//! - [`Outbound::send_unsolicited`] – relay status frames; dropped unless
//!   the session is `Active` at the moment of emission.
//!
//! [`Outbound::activations`] reports each transition into `Active` so the
//! relay can push the login snapshot to the new session.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use robodhs_types::{Epoch, Frame, SessionState};
use tokio::sync::{mpsc, watch};
use tracing::debug;

struct Link {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<Frame>,
}

struct Inner {
    /// Mutated only while `link` is locked.
    state: AtomicU8,
    link: Mutex<Option<Link>>,
    dropped: AtomicU64,
    /// Epoch of the active session, `None` while there is none.
    active: watch::Sender<Option<Epoch>>,
}

/// Shared handle to the current DCSS session's writer.
#[derive(Clone)]
pub struct Outbound {
    inner: Arc<Inner>,
}

impl Outbound {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(SessionState::Disconnected as u8),
                link: Mutex::new(None),
                dropped: AtomicU64::new(0),
                active: watch::channel(None).0,
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.inner.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Epoch of the attached link, if any.
    pub fn epoch(&self) -> Option<Epoch> {
        self.link().as_ref().map(|l| l.epoch)
    }

    /// Follows the active session's epoch.
    pub fn activations(&self) -> watch::Receiver<Option<Epoch>> {
        self.inner.active.subscribe()
    }

    /// Unsolicited frames dropped because no session was active.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Mark a connection attempt in progress.
    pub fn connecting(&self) {
        let link = self.link();
        if link.is_none() {
            self.store_state(SessionState::Connecting);
        }
    }

    /// Install the writer for a freshly connected `epoch`, replacing any
    /// previous link.  The session starts out `Registered`.
    pub fn attach(&self, epoch: Epoch, tx: mpsc::UnboundedSender<Frame>) {
        let mut link = self.link();
        *link = Some(Link { epoch, tx });
        self.store_state(SessionState::Registered);
        self.inner.active.send_replace(None);
    }

    /// The peer acknowledged registration for `epoch`.  Returns `true` on the
    /// transition into `Active`.
    pub fn activate(&self, epoch: Epoch) -> bool {
        let link = self.link();
        match link.as_ref() {
            Some(l) if l.epoch == epoch && !self.is_active() => {
                self.store_state(SessionState::Active);
                self.inner.active.send_replace(Some(epoch));
                true
            }
            _ => false,
        }
    }

    /// Remove the link for `epoch`.  A link belonging to a newer epoch is
    /// left alone.
    pub fn detach(&self, epoch: Epoch) {
        let mut link = self.link();
        if link.as_ref().is_some_and(|l| l.epoch == epoch) {
            *link = None;
            self.store_state(SessionState::Disconnected);
            self.inner.active.send_replace(None);
        }
    }

    pub fn send_session(&self, epoch: Epoch, frame: Frame) -> bool {
        let link = self.link();
        match link.as_ref() {
            Some(l) if l.epoch == epoch => l.tx.send(frame).is_ok(),
            _ => false,
        }
    }

    pub fn send_reply(&self, epoch: Epoch, frame: Frame) -> bool {
        self.send_session(epoch, frame)
    }

    pub fn send_unsolicited(&self, frame: Frame) -> bool {
        let link = self.link();
        let sent = match link.as_ref() {
            Some(l) if self.is_active() => l.tx.send(frame).is_ok(),
            _ => false,
        };
        if !sent {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(state = ?self.state(), "no active session; unsolicited frame dropped");
        }
        sent
    }
}

impl Default for Outbound {
    fn default() -> Self {
        Self::new()
    }
}
