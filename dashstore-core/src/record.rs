// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Generic record used at the store boundary.

use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A keyed bag of named properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub key: Key,
    pub properties: BTreeMap<String, Value>,
}

impl RawRecord {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Flatten a serializable struct into properties.
    ///
    /// The struct must serialize to a JSON object; nested structs become
    /// `Value::Map` properties.
    pub fn from_entity<T: Serialize>(key: Key, entity: &T) -> StoreResult<Self> {
        match serde_json::to_value(entity) {
            Ok(serde_json::Value::Object(map)) => Ok(Self {
                key,
                properties: map
                    .into_iter()
                    .map(|(name, value)| (name, Value::from_json(value)))
                    .collect(),
            }),
            Ok(other) => Err(StoreError::Codec(format!(
                "entity for {} serialized to a non-object: {}",
                key, other
            ))),
            Err(e) => Err(StoreError::Codec(e.to_string())),
        }
    }

    /// Rebuild a typed struct from this record's properties.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| StoreError::Codec(format!("{}: {}", self.key, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Kind;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: i64,
        tags: Vec<String>,
    }

    #[test]
    fn test_entity_properties_are_flattened() {
        let sample = Sample {
            name: "boot".into(),
            count: 3,
            tags: vec!["a".into(), "b".into()],
        };
        let record = RawRecord::from_entity(Key::root(Kind::Test, "boot"), &sample).unwrap();

        assert_eq!(record.get("count"), Some(&Value::Int(3)));
        assert!(record.get("tags").unwrap().matches_eq(&Value::from("b")));
        assert_eq!(record.decode::<Sample>().unwrap(), sample);
    }

    #[test]
    fn test_decode_reports_codec_error() {
        let record = RawRecord::new(Key::root(Kind::Test, "x")).with("name", 5i64);
        assert!(matches!(
            record.decode::<Sample>(),
            Err(StoreError::Codec(_))
        ));
    }
}
