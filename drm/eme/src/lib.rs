mod clock;
mod error;
mod keys;
mod registry;
mod session;
mod types;

pub mod memory;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::error::{EmeError, EmeResult};
pub use self::keys::{KeySystem, MediaKeys};
pub use self::registry::{MAX_INIT_DATA_LEN, SessionRegistry, validate_init_data};
pub use self::session::MediaKeySession;
pub use self::types::{Expiration, InitDataType, KeyId, KeyStatus, KeyStatusMap, SessionType};
