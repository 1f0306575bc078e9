use futures::future::BoxFuture;
use tracing::debug;

use crate::clock::Clock;
use crate::error::EmeResult;
use crate::registry::{SessionRegistry, validate_init_data};
use crate::session::MediaKeySession;
use crate::types::{InitDataType, SessionType};

/**
    Contract for the host's key system, the factory for sessions.
*/
pub trait KeySystem: Send + Sync {
    type Session: MediaKeySession;

    /**
        Create a new, empty session of the given type.
    */
    fn create_session(
        &self,
        session_type: SessionType,
    ) -> Result<Self::Session, <Self::Session as MediaKeySession>::Error>;

    /**
        Native lookup of an existing session by initialization data.

        Hosts that can recognize equivalent initialization data return
        `Some` with a future resolving to the session, if any. The default
        returns `None`, meaning the host has no native lookup and callers
        should fall back to a [`SessionRegistry`].
    */
    fn lookup_session<'a>(
        &'a self,
        init_data_type: &'a InitDataType,
        init_data: &'a [u8],
    ) -> Option<BoxFuture<'a, Option<Self::Session>>> {
        let _ = (init_data_type, init_data);
        None
    }
}

/**
    Sessions of one key system, together with the registry that
    remembers which initialization data each was created for.

    One instance belongs to one playback context. Sessions created
    elsewhere are invisible to its fallback lookup.
*/
pub struct MediaKeys<K: KeySystem> {
    key_system: K,
    registry: SessionRegistry<K::Session>,
}

impl<K: KeySystem> MediaKeys<K> {
    pub fn new(key_system: K) -> Self {
        Self {
            key_system,
            registry: SessionRegistry::new(),
        }
    }

    /**
        Use `clock` when checking whether tracked sessions have expired.
    */
    pub fn with_clock(key_system: K, clock: impl Clock + 'static) -> Self {
        Self {
            key_system,
            registry: SessionRegistry::with_clock(clock),
        }
    }

    pub fn registry(&self) -> &SessionRegistry<K::Session> {
        &self.registry
    }

    pub fn create_session(
        &self,
        session_type: SessionType,
    ) -> Result<K::Session, <K::Session as MediaKeySession>::Error> {
        self.key_system.create_session(session_type)
    }

    /**
        Track `session` under the given initialization data, then start
        its license request.

        Malformed initialization data is rejected before anything is
        tracked or sent to the host. Errors from the session itself are
        returned unchanged, and the session stays tracked until it reports
        itself closed, even if the request fails.
    */
    pub async fn generate_request(
        &self,
        session: &K::Session,
        init_data_type: &InitDataType,
        init_data: &[u8],
    ) -> Result<(), <K::Session as MediaKeySession>::Error> {
        self.registry
            .register(session.clone(), init_data_type.clone(), init_data)?;
        session.generate_request(init_data_type, init_data).await
    }

    /**
        Find an existing session usable for the given initialization data.

        Prefers the key system's native lookup, falling back to the
        registry's byte comparison when the host has none. Returns
        `Ok(None)` when no usable session is known; fails only on
        malformed input.
    */
    pub async fn session_for_init_data(
        &self,
        init_data_type: &InitDataType,
        init_data: &[u8],
    ) -> EmeResult<Option<K::Session>> {
        validate_init_data(init_data_type, init_data)?;

        if let Some(lookup) = self.key_system.lookup_session(init_data_type, init_data) {
            debug!(init_data_type = %init_data_type, "using native session lookup");
            return Ok(lookup.await);
        }

        self.registry
            .find_by_init_data(init_data_type, init_data)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::EmeError;
    use crate::memory::{MemoryKeySystem, MemorySession};
    use crate::types::{Expiration, KeyStatus, KeyStatusMap};

    fn usable() -> KeyStatusMap {
        [(vec![0x11u8; 16], KeyStatus::Usable)].into_iter().collect()
    }

    /// Key system whose native lookup always answers with a fixed session.
    struct NativeKeySystem {
        inner: MemoryKeySystem,
        answer: MemorySession,
    }

    impl KeySystem for NativeKeySystem {
        type Session = MemorySession;

        fn create_session(&self, session_type: SessionType) -> Result<MemorySession, EmeError> {
            self.inner.create_session(session_type)
        }

        fn lookup_session<'a>(
            &'a self,
            _init_data_type: &'a InitDataType,
            _init_data: &'a [u8],
        ) -> Option<BoxFuture<'a, Option<MemorySession>>> {
            let answer = self.answer.clone();
            Some(async move { Some(answer) }.boxed())
        }
    }

    #[tokio::test]
    async fn generated_sessions_are_found() {
        let keys = MediaKeys::new(MemoryKeySystem::new());
        let session = keys.create_session(SessionType::Temporary).unwrap();
        keys.generate_request(&session, &InitDataType::Cenc, &[1, 2, 3])
            .await
            .unwrap();
        session.update_key_statuses(usable());

        let found = keys
            .session_for_init_data(&InitDataType::Cenc, &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(found, Some(session));
        assert_eq!(keys.registry().len(), 1);
    }

    #[tokio::test]
    async fn request_errors_pass_through() {
        let keys = MediaKeys::new(MemoryKeySystem::new());
        let session = keys.create_session(SessionType::Temporary).unwrap();
        session.close();

        let err = keys
            .generate_request(&session, &InitDataType::Cenc, &[1])
            .await
            .unwrap_err();
        assert!(matches!(err, EmeError::InvalidState("session is closed")));
    }

    #[tokio::test]
    async fn failed_request_stays_tracked_until_closed() {
        let keys = MediaKeys::new(MemoryKeySystem::new());
        let session = keys.create_session(SessionType::Temporary).unwrap();
        keys.generate_request(&session, &InitDataType::Cenc, &[1])
            .await
            .unwrap();

        // Second request is rejected by the host, yet registration happens first
        assert!(
            keys.generate_request(&session, &InitDataType::Cenc, &[2])
                .await
                .is_err()
        );
        assert_eq!(keys.registry().len(), 2);

        session.close();
        for _ in 0..100 {
            if keys.registry().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(keys.registry().is_empty());
    }

    #[tokio::test]
    async fn malformed_request_is_not_tracked() {
        let keys = MediaKeys::new(MemoryKeySystem::new());
        let session = keys.create_session(SessionType::Temporary).unwrap();

        let err = keys
            .generate_request(&session, &InitDataType::Cenc, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EmeError::EmptyInitData));
        assert_eq!(keys.registry().len(), 0);
        assert_eq!(session.request(), None);
    }

    #[test]
    fn request_outside_tokio_fails_without_panicking() {
        let keys = MediaKeys::new(MemoryKeySystem::new());
        let session = keys.create_session(SessionType::Temporary).unwrap();

        let result = futures::executor::block_on(keys.generate_request(
            &session,
            &InitDataType::Cenc,
            &[1, 2, 3],
        ));
        assert!(matches!(result, Err(EmeError::NoRuntime)));
        assert!(keys.registry().is_empty());
        assert_eq!(session.request(), None);
    }

    #[tokio::test]
    async fn expiry_uses_configured_clock() {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let keys = MediaKeys::with_clock(MemoryKeySystem::new(), clock.clone());
        let session = keys.create_session(SessionType::Temporary).unwrap();
        keys.generate_request(&session, &InitDataType::Webm, &[5])
            .await
            .unwrap();
        session.update_key_statuses(usable());
        session.set_expiration(Expiration::At(2_000.0));

        let found = keys
            .session_for_init_data(&InitDataType::Webm, &[5])
            .await
            .unwrap();
        assert_eq!(found, Some(session));

        clock.advance(1_000.0);
        let found = keys
            .session_for_init_data(&InitDataType::Webm, &[5])
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn native_lookup_is_preferred() {
        let answer = MemorySession::temporary();
        let keys = MediaKeys::new(NativeKeySystem {
            inner: MemoryKeySystem::new(),
            answer: answer.clone(),
        });

        // Nothing registered, the native answer still comes back
        let found = keys
            .session_for_init_data(&InitDataType::Cenc, &[9, 9])
            .await
            .unwrap();
        assert_eq!(found, Some(answer));
        assert!(keys.registry().is_empty());
    }

    #[tokio::test]
    async fn malformed_input_fails_before_lookup() {
        let keys = MediaKeys::new(MemoryKeySystem::new());
        assert!(matches!(
            keys.session_for_init_data(&InitDataType::Cenc, &[]).await,
            Err(EmeError::EmptyInitData)
        ));
    }
}
