use std::path::Path;

use anyhow::{Context, Result, bail};
use data_encoding::BASE64;
use serde::Deserialize;

use drm_eme::{Expiration, InitDataType, KeyStatus, KeyStatusMap, SessionType};

/// How byte fields in a scenario file are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Hex,
    Base64,
}

impl Encoding {
    pub fn decode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Self::Hex => hex::decode(text).with_context(|| format!("invalid hex: {text:?}")),
            Self::Base64 => BASE64
                .decode(text.as_bytes())
                .with_context(|| format!("invalid base64: {text:?}")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct KeySpec {
    pub kid: String,
    pub status: String,
}

/// A session to create and generate a request for.
#[derive(Debug, Deserialize)]
pub struct SessionSpec {
    pub name: String,
    pub init_data_type: String,
    pub init_data: String,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub session_type: Option<String>,
    /// Milliseconds since the Unix epoch, `null` for never
    #[serde(default)]
    pub expiration_ms: Option<f64>,
    #[serde(default)]
    pub keys: Vec<KeySpec>,
    /// Close the session after all sessions are registered
    #[serde(default)]
    pub closed: bool,
}

/// A lookup to run once all sessions are set up.
#[derive(Debug, Deserialize)]
pub struct LookupSpec {
    pub init_data_type: String,
    pub init_data: String,
    #[serde(default)]
    pub encoding: Encoding,
    /// Expected session name, `null` for no match
    #[serde(default, deserialize_with = "present")]
    pub expect: Option<Option<String>>,
}

// Keeps an explicit `null` distinct from a missing field
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub now_ms: Option<f64>,
    #[serde(default)]
    pub sessions: Vec<SessionSpec>,
    #[serde(default)]
    pub lookups: Vec<LookupSpec>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(text).context("failed to parse scenario")?;
        scenario.check_names()?;
        Ok(scenario)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_json(&text)
    }

    fn check_names(&self) -> Result<()> {
        for (i, session) in self.sessions.iter().enumerate() {
            if self.sessions[..i].iter().any(|s| s.name == session.name) {
                bail!("duplicate session name {:?}", session.name);
            }
        }
        Ok(())
    }
}

impl SessionSpec {
    pub fn init_data_type(&self) -> InitDataType {
        InitDataType::from(self.init_data_type.as_str())
    }

    pub fn init_data(&self) -> Result<Vec<u8>> {
        self.encoding
            .decode(&self.init_data)
            .with_context(|| format!("session {:?}", self.name))
    }

    pub fn session_type(&self) -> Result<SessionType> {
        match &self.session_type {
            Some(name) => Ok(name.parse()?),
            None => Ok(SessionType::default()),
        }
    }

    pub fn expiration(&self) -> Expiration {
        Expiration::from(self.expiration_ms)
    }

    pub fn key_statuses(&self) -> Result<KeyStatusMap> {
        let mut map = KeyStatusMap::new();
        for key in &self.keys {
            let kid = hex::decode(&key.kid)
                .with_context(|| format!("session {:?}: invalid key id {:?}", self.name, key.kid))?;
            let status: KeyStatus = key.status.parse()?;
            map.insert(kid, status);
        }
        Ok(map)
    }
}

impl LookupSpec {
    pub fn init_data_type(&self) -> InitDataType {
        InitDataType::from(self.init_data_type.as_str())
    }

    pub fn init_data(&self) -> Result<Vec<u8>> {
        self.encoding.decode(&self.init_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "now_ms": 1000,
        "sessions": [
            {
                "name": "main",
                "init_data_type": "cenc",
                "init_data": "010203",
                "expiration_ms": 5000,
                "keys": [{ "kid": "00112233445566778899aabbccddeeff", "status": "usable" }]
            },
            {
                "name": "alt",
                "init_data_type": "keyids",
                "init_data": "eyJraWRzIjpbXX0=",
                "encoding": "base64",
                "session_type": "persistent-license",
                "closed": true
            }
        ],
        "lookups": [
            { "init_data_type": "cenc", "init_data": "010203", "expect": "main" },
            { "init_data_type": "webm", "init_data": "010203", "expect": null },
            { "init_data_type": "cenc", "init_data": "0a0b" }
        ]
    }"#;

    #[test]
    fn parse_scenario() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.now_ms, Some(1000.0));
        assert_eq!(scenario.sessions.len(), 2);

        let main = &scenario.sessions[0];
        assert_eq!(main.init_data_type(), InitDataType::Cenc);
        assert_eq!(main.init_data().unwrap(), vec![1, 2, 3]);
        assert_eq!(main.expiration(), Expiration::At(5000.0));
        assert!(main.key_statuses().unwrap().has_usable_key());
        assert_eq!(main.session_type().unwrap(), SessionType::Temporary);
        assert!(!main.closed);

        let alt = &scenario.sessions[1];
        assert_eq!(alt.init_data().unwrap(), br#"{"kids":[]}"#.to_vec());
        assert_eq!(alt.expiration(), Expiration::Never);
        assert_eq!(alt.session_type().unwrap(), SessionType::PersistentLicense);
        assert!(alt.key_statuses().unwrap().is_empty());
        assert!(alt.closed);
    }

    #[test]
    fn lookup_expectations() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.lookups[0].expect, Some(Some("main".to_string())));
        assert_eq!(scenario.lookups[1].expect, Some(None));
        assert_eq!(scenario.lookups[2].expect, None);
    }

    #[test]
    fn duplicate_names_rejected() {
        let text = r#"{ "sessions": [
            { "name": "a", "init_data_type": "cenc", "init_data": "01" },
            { "name": "a", "init_data_type": "cenc", "init_data": "02" }
        ] }"#;
        assert!(Scenario::from_json(text).is_err());
    }

    #[test]
    fn bad_key_status_rejected() {
        let text = r#"{ "sessions": [
            { "name": "a", "init_data_type": "cenc", "init_data": "01",
              "keys": [{ "kid": "01", "status": "ready" }] }
        ] }"#;
        let scenario = Scenario::from_json(text).unwrap();
        assert!(scenario.sessions[0].key_statuses().is_err());
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(Encoding::Hex.decode("zz").is_err());
        assert!(Encoding::Base64.decode("!!").is_err());
    }
}
