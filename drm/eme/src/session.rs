use std::future::Future;

use futures::future::BoxFuture;

use crate::error::EmeError;
use crate::types::{Expiration, InitDataType, KeyStatusMap};

/**
    Contract for a host-provided decryption session.

    Implementations are cheap handles onto a shared host object, so
    cloning a session must yield a handle to the same underlying session.
    The registry only observes sessions through this trait and never
    drives their lifecycle.
*/
pub trait MediaKeySession: Clone + Send + Sync + 'static {
    /**
        Error produced by the host when request generation fails.

        Passed through to callers without being wrapped or inspected.
    */
    type Error: std::error::Error + From<EmeError> + Send + Sync + 'static;

    /**
        Session identifier assigned by the CDM, empty until a request
        has been generated.
    */
    fn session_id(&self) -> String;

    /**
        Time after which the session's keys are no longer valid.
    */
    fn expiration(&self) -> Expiration;

    /**
        Current status of every key known to the session.
    */
    fn key_statuses(&self) -> KeyStatusMap;

    /**
        Resolves once, when the session becomes permanently unusable.

        The returned future must not borrow the handle, so that it can
        be awaited from a spawned task.
    */
    fn closed(&self) -> BoxFuture<'static, ()>;

    /**
        Begin the license request flow for the given initialization data.
    */
    fn generate_request(
        &self,
        init_data_type: &InitDataType,
        init_data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
