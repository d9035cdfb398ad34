// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// A certificate and the quote binding it, as served to bootstrapping clients.
///
/// On the wire: `{"cert": <base64>, "quote": <base64>}` with the standard
/// padded alphabet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertBundle {
    #[serde(with = "b64")]
    pub cert: Vec<u8>,
    #[serde(with = "b64")]
    pub quote: Vec<u8>,
}

impl CertBundle {
    pub fn new(cert: Vec<u8>, quote: Vec<u8>) -> Self {
        Self { cert, quote }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(json: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(json)
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::CertBundle;

    #[test]
    fn wire_format() {
        let bundle = CertBundle::new(b"cert".to_vec(), vec![0, 1, 2, 0xff]);
        let json = String::from_utf8(bundle.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"cert":"Y2VydA==","quote":"AAEC/w=="}"#);
        assert_eq!(CertBundle::from_json(json.as_bytes()).unwrap(), bundle);
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(CertBundle::from_json(br#"{"cert":"***","quote":""}"#).is_err());
        assert!(CertBundle::from_json(br#"{"cert":"Y2VydA=="}"#).is_err());
        assert!(CertBundle::from_json(b"<html>").is_err());
    }
}
