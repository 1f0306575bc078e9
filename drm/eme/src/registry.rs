use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{EmeError, EmeResult};
use crate::session::MediaKeySession;
use crate::types::InitDataType;

/**
    Largest initialization data accepted for registration or lookup.
*/
pub const MAX_INIT_DATA_LEN: usize = 64 * 1024;

/**
    Check that a type tag and initialization data are well-formed
    enough to be compared against registered sessions.
*/
pub fn validate_init_data(init_data_type: &InitDataType, init_data: &[u8]) -> EmeResult<()> {
    if init_data_type.is_empty() {
        return Err(EmeError::EmptyInitDataType);
    }
    if init_data.is_empty() {
        return Err(EmeError::EmptyInitData);
    }
    if init_data.len() > MAX_INIT_DATA_LEN {
        return Err(EmeError::InitDataTooLarge {
            len: init_data.len(),
            max: MAX_INIT_DATA_LEN,
        });
    }
    Ok(())
}

#[derive(Clone)]
struct TrackedSession<S> {
    id: u64,
    session: S,
    init_data_type: InitDataType,
    init_data: Arc<[u8]>,
}

impl<S> TrackedSession<S> {
    fn matches(&self, init_data_type: &InitDataType, init_data: &[u8]) -> bool {
        self.init_data_type == *init_data_type && *self.init_data == *init_data
    }
}

struct Entries<S> {
    next_id: u64,
    tracked: Vec<TrackedSession<S>>,
}

/**
    Sessions created by the application, keyed by the initialization
    data their license requests were generated from.

    Lookups compare initialization data byte for byte, so data that is
    semantically equivalent but encoded differently will not match. A
    miss means "no known usable session", not that none exists in the CDM.

    Entries are removed when their session reports itself closed. This
    happens on a spawned Tokio task, so [`SessionRegistry::register`]
    fails with [`EmeError::NoRuntime`] outside a Tokio runtime.
*/
pub struct SessionRegistry<S> {
    entries: Arc<Mutex<Entries<S>>>,
    clock: Arc<dyn Clock>,
}

impl<S: MediaKeySession> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /**
        Create a registry that evaluates session expiry against `clock`.
    */
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                tracked: Vec::new(),
            })),
            clock: Arc::new(clock),
        }
    }

    /**
        Start tracking `session` under the given initialization data.

        The data is copied, so later changes to the caller's buffer do not
        affect lookups. Duplicate data is allowed; lookups prefer the
        earliest registration. Registering the same session handle twice
        is not supported.

        Fails without tracking anything when the data could never be
        looked up, or when called outside a Tokio runtime.
    */
    pub fn register(
        &self,
        session: S,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) -> EmeResult<()> {
        validate_init_data(&init_data_type, init_data)?;
        let runtime = Handle::try_current().map_err(|_| EmeError::NoRuntime)?;
        let closed = session.closed();

        let id = {
            let mut entries = self.entries.lock();
            let id = entries.next_id;
            entries.next_id += 1;
            entries.tracked.push(TrackedSession {
                id,
                session,
                init_data_type,
                init_data: Arc::from(init_data),
            });
            id
        };

        debug!(
            entry = id,
            init_data_len = init_data.len(),
            "registered session"
        );

        let entries = Arc::downgrade(&self.entries);
        runtime.spawn(async move {
            closed.await;
            remove_entry(&entries, id);
        });
        Ok(())
    }

    /**
        Find the earliest registered session whose initialization data
        is identical to the given data, is not expired, and has at least
        one usable key.

        Returns `Ok(None)` when no such session is known. Fails only when
        the input is malformed.
    */
    pub async fn find_by_init_data(
        &self,
        init_data_type: &InitDataType,
        init_data: &[u8],
    ) -> EmeResult<Option<S>> {
        validate_init_data(init_data_type, init_data)?;
        Ok(self.find_matching(init_data_type, init_data))
    }

    fn find_matching(&self, init_data_type: &InitDataType, init_data: &[u8]) -> Option<S> {
        // Removals that land after this point are not observed by the scan
        let snapshot = self.entries.lock().tracked.clone();
        let now = self.clock.now_millis();

        for entry in snapshot
            .into_iter()
            .filter(|entry| entry.matches(init_data_type, init_data))
        {
            let expiration = entry.session.expiration();
            if expiration.is_expired_at(now) {
                trace!(
                    entry = entry.id,
                    expiration = expiration.as_millis(),
                    now,
                    "skipping expired session"
                );
                continue;
            }

            if !entry.session.key_statuses().has_usable_key() {
                trace!(entry = entry.id, "skipping session without usable keys");
                continue;
            }

            debug!(
                entry = entry.id,
                session_id = %entry.session.session_id(),
                init_data_type = %init_data_type,
                "found session for init data"
            );
            return Some(entry.session);
        }

        debug!(
            init_data_type = %init_data_type,
            init_data_len = init_data.len(),
            "no usable session for init data"
        );
        None
    }

    /**
        Handles of all tracked sessions, in registration order.
    */
    pub fn sessions(&self) -> Vec<S> {
        self.entries
            .lock()
            .tracked
            .iter()
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().tracked.is_empty()
    }
}

impl<S: MediaKeySession> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_entry<S: MediaKeySession>(entries: &Weak<Mutex<Entries<S>>>, id: u64) {
    // Registry already dropped
    let Some(entries) = entries.upgrade() else {
        return;
    };

    let mut entries = entries.lock();
    if let Some(index) = entries.tracked.iter().position(|entry| entry.id == id) {
        let removed = entries.tracked.remove(index);
        debug!(
            entry = id,
            session_id = %removed.session.session_id(),
            init_data_type = %removed.init_data_type,
            "removed closed session"
        );
    }
}
