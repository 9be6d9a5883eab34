//! ParameterStatus bookkeeping.

use std::collections::HashMap;

use bytes::BytesMut;
use once_cell::sync::Lazy;

use crate::messages::protocol::parameter_status;

/// Parameters every session advertises unless the host overrides them.
static DEFAULT_PARAMETERS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("client_encoding", "UTF8"),
        ("DateStyle", "ISO, MDY"),
        ("IntervalStyle", "postgres"),
        ("TimeZone", "Etc/UTC"),
        ("integer_datetimes", "on"),
        ("standard_conforming_strings", "on"),
    ]
});

/// The set of ParameterStatus values announced during session setup.
#[derive(Debug, Clone)]
pub struct ServerParameters {
    parameters: HashMap<String, String>,
}

impl ServerParameters {
    /// Defaults plus the advertised server version.
    pub fn new(version: &str) -> Self {
        let mut parameters = HashMap::new();
        for (key, value) in DEFAULT_PARAMETERS.iter() {
            parameters.insert(key.to_string(), value.to_string());
        }
        parameters.insert("server_version".to_string(), version.to_string());
        ServerParameters { parameters }
    }

    /// Set or override one parameter. Lowercased aliases of the canonical
    /// mixed-case keys are folded in, the way startup packets spell them.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let mut key = key.into();
        if key == "timezone" {
            key = "TimeZone".to_string();
        } else if key == "datestyle" {
            key = "DateStyle".to_string();
        } else if key == "intervalstyle" {
            key = "IntervalStyle".to_string();
        }
        self.parameters.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// One ParameterStatus frame per entry, sorted for a deterministic wire
    /// image.
    pub fn to_frames(&self) -> BytesMut {
        let mut keys: Vec<&String> = self.parameters.keys().collect();
        keys.sort();
        let mut bytes = BytesMut::new();
        for key in keys {
            bytes.extend_from_slice(&parameter_status(key, &self.parameters[key]));
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_advertised_set() {
        let params = ServerParameters::new("17.0");
        for key in [
            "server_version",
            "client_encoding",
            "DateStyle",
            "IntervalStyle",
            "TimeZone",
            "integer_datetimes",
            "standard_conforming_strings",
        ] {
            assert!(params.get(key).is_some(), "missing {key}");
        }
        assert_eq!(params.get("server_version"), Some("17.0"));
    }

    #[test]
    fn lowercase_aliases_fold_to_canonical_keys() {
        let mut params = ServerParameters::new("17.0");
        params.set("timezone", "UTC");
        assert_eq!(params.get("TimeZone"), Some("UTC"));
        assert_eq!(params.get("timezone"), None);
    }

    #[test]
    fn frames_are_parameter_status_messages() {
        let params = ServerParameters::new("17.0");
        let frames = params.to_frames();
        assert_eq!(frames[0], b'S');
        // Seven entries → seven frames, each starting with 'S'.
        let mut count = 0;
        let mut pos = 0;
        while pos < frames.len() {
            assert_eq!(frames[pos], b'S');
            let len = i32::from_be_bytes(frames[pos + 1..pos + 5].try_into().unwrap()) as usize;
            pos += 1 + len;
            count += 1;
        }
        assert_eq!(count, 7);
    }
}
