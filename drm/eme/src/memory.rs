/*!
    In-process implementation of the host session contracts.

    Stands in for a browser's CDM when driving the registry from tests
    or from recorded scenarios. License updates are simulated by setting
    key statuses and expiration directly.
*/

use core::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{EmeError, EmeResult};
use crate::keys::KeySystem;
use crate::registry::validate_init_data;
use crate::session::MediaKeySession;
use crate::types::{Expiration, InitDataType, KeyStatusMap, SessionType};

#[derive(Default)]
struct SessionState {
    session_id: String,
    request: Option<(InitDataType, Vec<u8>)>,
    expiration: Expiration,
    key_statuses: KeyStatusMap,
}

struct SessionInner {
    session_type: SessionType,
    state: Mutex<SessionState>,
    closed_tx: watch::Sender<bool>,
}

/**
    A session held entirely in memory.

    Clones share the same underlying session, and two handles compare
    equal only when they refer to the same session.
*/
#[derive(Clone)]
pub struct MemorySession {
    inner: Arc<SessionInner>,
    next_session_id: Arc<AtomicU64>,
}

impl MemorySession {
    fn with_counter(session_type: SessionType, next_session_id: Arc<AtomicU64>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                session_type,
                state: Mutex::new(SessionState::default()),
                closed_tx,
            }),
            next_session_id,
        }
    }

    /**
        Create a standalone temporary session, not tied to any key system.
    */
    pub fn temporary() -> Self {
        Self::with_counter(SessionType::Temporary, Arc::new(AtomicU64::new(1)))
    }

    pub fn session_type(&self) -> SessionType {
        self.inner.session_type
    }

    /**
        The initialization data the license request was generated from, if any.
    */
    pub fn request(&self) -> Option<(InitDataType, Vec<u8>)> {
        self.inner.state.lock().request.clone()
    }

    /**
        Replace the key statuses, as a license update would.
    */
    pub fn update_key_statuses(&self, key_statuses: KeyStatusMap) {
        self.inner.state.lock().key_statuses = key_statuses;
    }

    pub fn set_expiration(&self, expiration: Expiration) {
        self.inner.state.lock().expiration = expiration;
    }

    /**
        Close the session, resolving its closed signal.

        Closing an already closed session does nothing.
    */
    pub fn close(&self) {
        self.inner.closed_tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    fn try_generate_request(
        &self,
        init_data_type: &InitDataType,
        init_data: &[u8],
    ) -> EmeResult<()> {
        if self.is_closed() {
            return Err(EmeError::InvalidState("session is closed"));
        }
        validate_init_data(init_data_type, init_data)?;

        let mut state = self.inner.state.lock();
        if state.request.is_some() {
            return Err(EmeError::InvalidState("request already generated"));
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        state.session_id = format!("session-{id}");
        state.request = Some((init_data_type.clone(), init_data.to_vec()));
        Ok(())
    }
}

impl MediaKeySession for MemorySession {
    type Error = EmeError;

    fn session_id(&self) -> String {
        self.inner.state.lock().session_id.clone()
    }

    fn expiration(&self) -> Expiration {
        self.inner.state.lock().expiration
    }

    fn key_statuses(&self) -> KeyStatusMap {
        self.inner.state.lock().key_statuses.clone()
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut closed_rx = self.inner.closed_tx.subscribe();
        async move {
            // The sender lives as long as any handle, so an error here
            // means the session is gone and will never be usable again.
            let _ = closed_rx.wait_for(|closed| *closed).await;
        }
        .boxed()
    }

    fn generate_request(
        &self,
        init_data_type: &InitDataType,
        init_data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        future::ready(self.try_generate_request(init_data_type, init_data))
    }
}

impl PartialEq for MemorySession {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MemorySession {}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemorySession")
            .field("session_id", &state.session_id)
            .field("session_type", &self.inner.session_type)
            .field("expiration", &state.expiration)
            .field("keys", &state.key_statuses.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/**
    Key system that hands out [`MemorySession`]s with sequential IDs.

    Has no native lookup, so [`MediaKeys`](crate::MediaKeys) always
    falls back to its registry.
*/
#[derive(Debug, Clone)]
pub struct MemoryKeySystem {
    next_session_id: Arc<AtomicU64>,
}

impl MemoryKeySystem {
    pub fn new() -> Self {
        Self {
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for MemoryKeySystem {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySystem for MemoryKeySystem {
    type Session = MemorySession;

    fn create_session(&self, session_type: SessionType) -> Result<MemorySession, EmeError> {
        Ok(MemorySession::with_counter(
            session_type,
            self.next_session_id.clone(),
        ))
    }
}
