use core::fmt;
use core::str::FromStr;

use crate::error::EmeError;

/**
    Format tag of a piece of initialization data.

    The registered EME formats get their own variants, anything else is
    carried verbatim. Two tags are equal exactly when their string forms
    are equal, so `"CENC"` is not the same tag as `"cenc"`.
*/
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InitDataType {
    Cenc,
    KeyIds,
    Webm,
    Other(String),
}

impl InitDataType {
    pub fn name(&self) -> &str {
        match self {
            Self::Cenc => "cenc",
            Self::KeyIds => "keyids",
            Self::Webm => "webm",
            Self::Other(name) => name,
        }
    }

    /**
        Whether the tag is the empty string, which never names a valid format.
    */
    pub fn is_empty(&self) -> bool {
        self.name().is_empty()
    }
}

impl From<&str> for InitDataType {
    fn from(value: &str) -> Self {
        match value {
            "cenc" => Self::Cenc,
            "keyids" => Self::KeyIds,
            "webm" => Self::Webm,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for InitDataType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "cenc" | "keyids" | "webm" => Self::from(value.as_str()),
            _ => Self::Other(value),
        }
    }
}

impl FromStr for InitDataType {
    type Err = EmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(EmeError::EmptyInitDataType);
        }
        Ok(Self::from(s))
    }
}

impl fmt::Display for InitDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/**
    Point in time after which a session's keys are no longer valid.

    Hosts report expiration as milliseconds since the Unix epoch, using
    NaN to mean the session never expires. [`Expiration::from_millis`]
    and [`Expiration::as_millis`] convert to and from that form, and are
    the preferred way to build one. `At(NaN)` still means "never" and
    compares equal to [`Expiration::Never`].
*/
#[derive(Debug, Clone, Copy, Default)]
pub enum Expiration {
    #[default]
    Never,
    At(f64),
}

impl Expiration {
    pub fn from_millis(millis: f64) -> Self {
        if millis.is_nan() {
            Self::Never
        } else {
            Self::At(millis)
        }
    }

    pub fn as_millis(self) -> f64 {
        match self {
            Self::Never => f64::NAN,
            Self::At(millis) => millis,
        }
    }

    /**
        Check whether the expiration has been reached at `now_millis`.

        An expiration equal to the current time counts as expired.
        The never-expires sentinel compares false against every time.
    */
    pub fn is_expired_at(self, now_millis: f64) -> bool {
        self.as_millis() <= now_millis
    }
}

impl PartialEq for Expiration {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.as_millis(), other.as_millis());
        a == b || (a.is_nan() && b.is_nan())
    }
}

impl From<Option<f64>> for Expiration {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Never, Self::from_millis)
    }
}

/**
    Status of a single key within a session, as reported by the CDM.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    Usable,
    Expired,
    Released,
    OutputRestricted,
    OutputDownscaled,
    UsableInFuture,
    StatusPending,
    InternalError,
}

impl KeyStatus {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Usable => "usable",
            Self::Expired => "expired",
            Self::Released => "released",
            Self::OutputRestricted => "output-restricted",
            Self::OutputDownscaled => "output-downscaled",
            Self::UsableInFuture => "usable-in-future",
            Self::StatusPending => "status-pending",
            Self::InternalError => "internal-error",
        }
    }

    /**
        Only `usable` keys can decrypt content right now.
    */
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Usable)
    }
}

impl FromStr for KeyStatus {
    type Err = EmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "usable" => Ok(Self::Usable),
            "expired" => Ok(Self::Expired),
            "released" => Ok(Self::Released),
            "output-restricted" => Ok(Self::OutputRestricted),
            "output-downscaled" => Ok(Self::OutputDownscaled),
            "usable-in-future" => Ok(Self::UsableInFuture),
            "status-pending" => Ok(Self::StatusPending),
            "internal-error" => Ok(Self::InternalError),
            _ => Err(EmeError::UnknownKeyStatus(s.to_string())),
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type KeyId = Vec<u8>;

/**
    Key IDs known to a session together with their current status,
    in the order the CDM reported them.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStatusMap {
    entries: Vec<(KeyId, KeyStatus)>,
}

impl KeyStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Set the status of a key, replacing any previous status for the same ID.
    */
    pub fn insert(&mut self, key_id: impl Into<KeyId>, status: KeyStatus) {
        let key_id = key_id.into();
        match self.entries.iter_mut().find(|(id, _)| *id == key_id) {
            Some(entry) => entry.1 = status,
            None => self.entries.push((key_id, status)),
        }
    }

    pub fn get(&self, key_id: &[u8]) -> Option<KeyStatus> {
        self.entries
            .iter()
            .find(|(id, _)| id.as_slice() == key_id)
            .map(|(_, status)| *status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], KeyStatus)> {
        self.entries.iter().map(|(id, status)| (id.as_slice(), *status))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /**
        Whether at least one key can currently be used for decryption.
    */
    pub fn has_usable_key(&self) -> bool {
        self.entries.iter().any(|(_, status)| status.is_usable())
    }
}

impl<K: Into<KeyId>> FromIterator<(K, KeyStatus)> for KeyStatusMap {
    fn from_iter<I: IntoIterator<Item = (K, KeyStatus)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key_id, status) in iter {
            map.insert(key_id, status);
        }
        map
    }
}

/**
    Kind of session a key system is asked to create.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionType {
    #[default]
    Temporary,
    PersistentLicense,
}

impl SessionType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::PersistentLicense => "persistent-license",
        }
    }
}

impl FromStr for SessionType {
    type Err = EmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temporary" => Ok(Self::Temporary),
            "persistent-license" => Ok(Self::PersistentLicense),
            _ => Err(EmeError::UnknownSessionType(s.to_string())),
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
