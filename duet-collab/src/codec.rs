//! Two-tier dictionary compression for engine messages.
//!
//! Wire format (JSON-encoded):
//! ```text
//! ┌──────────────────────────────┬─────────────────────────────┐
//! │ data                         │ map                         │
//! │ transformed payload          │ alias token → original      │
//! └──────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! Two dictionaries drive the transform:
//! - a **static** table mapping well-known structural message keys to
//!   one-character codes, shared by every codec;
//! - a **dynamic** [`Dictionary`] of string values seen on this codec,
//!   growing monotonically: the first occurrence of a string travels
//!   verbatim, every repeat travels as a short `%<index>` token.
//!
//! An [`Envelope`]'s `map` is the alias table needed to invert the
//! transform; it always covers every token its `data` references.
//! The dynamic dictionary is never pruned, so long sessions trade
//! memory for bandwidth — see [`Dictionary::len`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix character reserved for alias tokens.
///
/// Any real string starting with this character is itself aliased, so
/// a decoded `%`-string can only ever be a token.
pub const ALIAS_PREFIX: char = '%';

/// Structural keys of engine operations, paired with their one-character
/// wire codes. Unlisted keys travel unchanged.
static STATIC_KEYS: &[(&str, &str)] = &[
    ("type", "t"),
    ("uid", "u"),
    ("struct", "s"),
    ("content", "c"),
    ("left", "l"),
    ("right", "r"),
    ("origin", "o"),
    ("deps", "d"),
    ("id", "i"),
    ("args", "a"),
    ("op", "p"),
    ("creator", "k"),
    ("sync_step", "y"),
    ("send_again", "g"),
    ("state_vector", "v"),
    ("delete_set", "x"),
    ("auth", "h"),
    ("custom_type", "m"),
];

fn encode_key<'a>(key: &'a str) -> &'a str {
    STATIC_KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, code)| *code)
        .unwrap_or(key)
}

fn decode_key<'a>(key: &'a str) -> &'a str {
    STATIC_KEYS
        .iter()
        .find(|(_, code)| *code == key)
        .map(|(name, _)| *name)
        .unwrap_or(key)
}

/// The wire unit: transformed payload plus the alias table that
/// inverts it. The two are inseparable — decoding `data` against any
/// other `map` is a protocol violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    pub map: BTreeMap<String, String>,
}

/// Codec errors. All of them indicate a desync between peers, not a
/// recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// An alias token in `data` has no entry in the envelope's `map`.
    UnknownAlias(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlias(token) => {
                write!(f, "alias token {token:?} missing from envelope map")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Dynamic string dictionary: which strings have been seen, and the
/// stable index assigned to each aliased one.
///
/// Indices are append-only. Once a string holds an index, that index
/// is never reused or reassigned, and the dictionary is never reset —
/// it grows for the lifetime of its codec.
#[derive(Debug, Default)]
pub struct Dictionary {
    seen: HashSet<String>,
    aliases: Vec<String>,
    indices: HashMap<String, usize>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `value` must travel as an alias token. Records a first
    /// sighting as a side effect.
    fn should_alias(&mut self, value: &str) -> bool {
        if value.starts_with(ALIAS_PREFIX) {
            // Would collide with a real token; always alias.
            return true;
        }
        if self.seen.contains(value) {
            true
        } else {
            self.seen.insert(value.to_owned());
            false
        }
    }

    /// Stable index for `value`, assigning the next free one on first
    /// use.
    fn alias_index(&mut self, value: &str) -> usize {
        if let Some(&index) = self.indices.get(value) {
            return index;
        }
        let index = self.aliases.len();
        self.aliases.push(value.to_owned());
        self.indices.insert(value.to_owned(), index);
        index
    }

    /// Alias table for every index assigned so far, token → original.
    pub fn alias_map(&self) -> BTreeMap<String, String> {
        self.aliases
            .iter()
            .enumerate()
            .map(|(index, value)| (format!("{ALIAS_PREFIX}{index}"), value.clone()))
            .collect()
    }

    /// Number of aliased strings. Monotonically increasing.
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Transport-agnostic message codec.
///
/// `decode(encode(v))` is deeply equal to `v` for any JSON value.
/// Each codec owns its [`Dictionary`], so two sessions never leak
/// aliases into each other; share the codec itself to share state.
#[derive(Debug, Default)]
pub struct Codec {
    dict: Dictionary,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dictionary(dict: Dictionary) -> Self {
        Self { dict }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    /// Snapshot of the full alias table accumulated so far.
    pub fn alias_map(&self) -> BTreeMap<String, String> {
        self.dict.alias_map()
    }

    /// Transform `value` and seal it with the current alias table.
    pub fn encode(&mut self, value: &Value) -> Envelope {
        let data = self.transform(value);
        Envelope {
            data,
            map: self.dict.alias_map(),
        }
    }

    /// Transform a value without sealing an envelope. Used on the send
    /// path, where fragments from several calls share one envelope.
    pub(crate) fn encode_fragment(&mut self, value: &Value) -> Value {
        self.transform(value)
    }

    fn transform(&mut self, value: &Value) -> Value {
        match value {
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.transform(item)).collect())
            }
            Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, item)| (encode_key(key).to_owned(), self.transform(item)))
                    .collect(),
            ),
            Value::String(text) => {
                if self.dict.should_alias(text) {
                    let index = self.dict.alias_index(text);
                    Value::String(format!("{ALIAS_PREFIX}{index}"))
                } else {
                    value.clone()
                }
            }
            other => other.clone(),
        }
    }

    /// Invert [`Codec::encode`]. Fails if `data` references a token the
    /// envelope's `map` does not carry.
    pub fn decode(envelope: &Envelope) -> Result<Value, CodecError> {
        restore(&envelope.data, &envelope.map)
    }
}

fn restore(value: &Value, map: &BTreeMap<String, String>) -> Result<Value, CodecError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| restore(item, map))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(entries) => {
            let mut restored = serde_json::Map::new();
            for (key, item) in entries {
                restored.insert(decode_key(key).to_owned(), restore(item, map)?);
            }
            Ok(Value::Object(restored))
        }
        Value::String(text) if text.starts_with(ALIAS_PREFIX) => map
            .get(text)
            .cloned()
            .map(Value::String)
            .ok_or_else(|| CodecError::UnknownAlias(text.clone())),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_nested_value() {
        let mut codec = Codec::new();
        let value = json!({
            "type": "insert",
            "id": ["client-7", 42],
            "content": { "text": "hello", "bold": true },
            "deps": [null, 3.5, "hello"],
        });

        let envelope = codec.encode(&value);
        let decoded = Codec::decode(&envelope).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_static_key_substitution() {
        let mut codec = Codec::new();
        let value = json!({ "type": "insert", "left": null, "right": null });

        let envelope = codec.encode(&value);
        let data = envelope.data.as_object().unwrap();
        assert!(data.contains_key("t"));
        assert!(data.contains_key("l"));
        assert!(data.contains_key("r"));
        assert!(!data.contains_key("type"));

        assert_eq!(Codec::decode(&envelope).unwrap(), value);
    }

    #[test]
    fn test_unrecognized_key_passes_through() {
        let mut codec = Codec::new();
        let value = json!({ "flavor": "vanilla" });

        let envelope = codec.encode(&value);
        let data = envelope.data.as_object().unwrap();
        assert!(data.contains_key("flavor"));
        assert_eq!(Codec::decode(&envelope).unwrap(), value);
    }

    #[test]
    fn test_first_occurrence_not_aliased() {
        let mut codec = Codec::new();
        let envelope = codec.encode(&json!("hello"));

        assert_eq!(envelope.data, json!("hello"));
        assert!(envelope.map.is_empty());
        assert_eq!(codec.dictionary().len(), 0);
    }

    #[test]
    fn test_second_occurrence_gets_stable_alias() {
        let mut codec = Codec::new();
        codec.encode(&json!("hello"));
        let envelope = codec.encode(&json!("hello"));

        assert_eq!(envelope.data, json!("%0"));
        assert_eq!(envelope.map.get("%0").unwrap(), "hello");
        assert_eq!(Codec::decode(&envelope).unwrap(), json!("hello"));

        // A third encode reuses the same index.
        let again = codec.encode(&json!("hello"));
        assert_eq!(again.data, json!("%0"));
        assert_eq!(codec.dictionary().len(), 1);
    }

    #[test]
    fn test_repeat_within_single_value_is_aliased() {
        let mut codec = Codec::new();
        let envelope = codec.encode(&json!(["hello", "hello"]));

        assert_eq!(envelope.data, json!(["hello", "%0"]));
        assert_eq!(
            Codec::decode(&envelope).unwrap(),
            json!(["hello", "hello"])
        );
    }

    #[test]
    fn test_prefix_collision_always_aliased() {
        let mut codec = Codec::new();
        let envelope = codec.encode(&json!("%not-a-token"));

        assert_eq!(envelope.data, json!("%0"));
        assert_eq!(envelope.map.get("%0").unwrap(), "%not-a-token");
        assert_eq!(Codec::decode(&envelope).unwrap(), json!("%not-a-token"));
    }

    #[test]
    fn test_indices_never_reused_across_strings() {
        let mut codec = Codec::new();
        codec.encode(&json!(["alpha", "beta"]));
        let envelope = codec.encode(&json!(["beta", "alpha"]));

        // Assignment order follows aliasing order, not sighting order.
        assert_eq!(envelope.data, json!(["%0", "%1"]));
        assert_eq!(envelope.map.get("%0").unwrap(), "beta");
        assert_eq!(envelope.map.get("%1").unwrap(), "alpha");
    }

    #[test]
    fn test_alias_map_is_cumulative() {
        let mut codec = Codec::new();
        codec.encode(&json!(["a", "a"]));
        let envelope = codec.encode(&json!(["b", "b"]));

        // Later envelopes carry the whole table, including earlier aliases.
        assert_eq!(envelope.map.len(), 2);
        assert_eq!(envelope.map.get("%0").unwrap(), "a");
        assert_eq!(envelope.map.get("%1").unwrap(), "b");
    }

    #[test]
    fn test_unknown_alias_is_an_error() {
        let envelope = Envelope {
            data: json!(["%9"]),
            map: BTreeMap::new(),
        };
        let err = Codec::decode(&envelope).unwrap_err();
        assert_eq!(err, CodecError::UnknownAlias("%9".to_owned()));
    }

    #[test]
    fn test_scalars_pass_through() {
        let mut codec = Codec::new();
        for value in [json!(17), json!(2.5), json!(true), json!(null)] {
            let envelope = codec.encode(&value);
            assert_eq!(envelope.data, value);
            assert_eq!(Codec::decode(&envelope).unwrap(), value);
        }
    }

    #[test]
    fn test_codecs_do_not_share_dictionaries() {
        let mut first = Codec::new();
        first.encode(&json!("hello"));
        first.encode(&json!("hello"));

        // A fresh codec has never seen "hello".
        let mut second = Codec::new();
        let envelope = second.encode(&json!("hello"));
        assert_eq!(envelope.data, json!("hello"));
        assert!(envelope.map.is_empty());
    }

    #[test]
    fn test_string_map_values_are_aliased_but_keys_are_not() {
        let mut codec = Codec::new();
        codec.encode(&json!({ "note": "dup" }));
        let envelope = codec.encode(&json!({ "note": "dup" }));

        let data = envelope.data.as_object().unwrap();
        // The key repeats but travels verbatim; the value is aliased.
        assert_eq!(data.get("note").unwrap(), &json!("%0"));
        assert_eq!(
            Codec::decode(&envelope).unwrap(),
            json!({ "note": "dup" })
        );
    }

    #[test]
    fn test_envelope_wire_round_trip() {
        let mut codec = Codec::new();
        codec.encode(&json!("dup"));
        let envelope = codec.encode(&json!({ "type": "insert", "content": "dup" }));

        let wire = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(
            Codec::decode(&parsed).unwrap(),
            json!({ "type": "insert", "content": "dup" })
        );
    }

    #[test]
    fn test_empty_containers() {
        let mut codec = Codec::new();
        let value = json!({ "args": [], "content": {} });
        let envelope = codec.encode(&value);
        assert_eq!(Codec::decode(&envelope).unwrap(), value);
    }
}
