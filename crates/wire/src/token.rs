//! Token model for the incremental tree stream.
//!
//! The wire shape is deliberately skinny: a token is a JSON number, a
//! string, or a small array. Inside the crate that polymorphism is an
//! explicit tagged union; only the serde boundary knows the raw forms.
//!
//! Wire forms:
//! - number       → [`Token::Delta`] (id delta; literal `0` means
//!   "absent/root" and never folds into the accumulator)
//! - string       → [`Token::Literal`] (tag, `key=value` pair, text, or
//!   `*`-joined base-36 layout quad)
//! - `[index]`    → [`Token::IndexRef`] (reuse the string emitted at
//!   that stream position)
//! - `["hash"]`   → [`Token::HashRef`] (digest standing in for a whole
//!   metadata block)
//! - `["a","b"]`  → [`Token::KeyList`] (several digests, resolved as a
//!   unit by the key resolver)

use crate::error::{Result, WireError};
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Delta(i64),
    Literal(String),
    IndexRef(usize),
    HashRef(String),
    KeyList(Vec<String>),
}

impl Token {
    pub fn to_value(&self) -> Value {
        match self {
            Token::Delta(delta) => Value::from(*delta),
            Token::Literal(text) => Value::from(text.clone()),
            Token::IndexRef(index) => Value::Array(vec![Value::from(*index as u64)]),
            Token::HashRef(hash) => Value::Array(vec![Value::from(hash.clone())]),
            Token::KeyList(keys) => {
                Value::Array(keys.iter().map(|k| Value::from(k.clone())).collect())
            }
        }
    }

    /// Classify a parsed JSON value as a token. `position` is the
    /// stream index, used only for error reporting.
    pub fn from_value(value: &Value, position: usize) -> Result<Token> {
        match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f as i64))
                .map(Token::Delta)
                .ok_or(WireError::MalformedToken(position)),
            Value::String(text) => Ok(Token::Literal(text.clone())),
            Value::Array(items) => Self::from_array(items, position),
            _ => Err(WireError::MalformedToken(position)),
        }
    }

    fn from_array(items: &[Value], position: usize) -> Result<Token> {
        match items {
            [Value::Number(number)] => number
                .as_u64()
                .map(|index| Token::IndexRef(index as usize))
                .ok_or(WireError::MalformedToken(position)),
            [Value::String(hash)] => Ok(Token::HashRef(hash.clone())),
            _ => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(key) => keys.push(key.clone()),
                        _ => return Err(WireError::MalformedToken(position)),
                    }
                }
                if keys.is_empty() {
                    return Err(WireError::MalformedToken(position));
                }
                Ok(Token::KeyList(keys))
            }
        }
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Token::Delta(delta) => serializer.serialize_i64(*delta),
            Token::Literal(text) => serializer.serialize_str(text),
            Token::IndexRef(index) => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(&(*index as u64))?;
                seq.end()
            }
            Token::HashRef(hash) => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(hash)?;
                seq.end()
            }
            Token::KeyList(keys) => {
                let mut seq = serializer.serialize_seq(Some(keys.len()))?;
                for key in keys {
                    seq.serialize_element(key)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Token::from_value(&value, 0).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_forms() {
        assert_eq!(Token::Delta(-3).to_value(), json!(-3));
        assert_eq!(Token::Literal("a=b".into()).to_value(), json!("a=b"));
        assert_eq!(Token::IndexRef(7).to_value(), json!([7]));
        assert_eq!(Token::HashRef("z1".into()).to_value(), json!(["z1"]));
        assert_eq!(
            Token::KeyList(vec!["a".into(), "b".into()]).to_value(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let tokens = vec![
            Token::Delta(12),
            Token::Delta(0),
            Token::Literal("div".into()),
            Token::IndexRef(2),
            Token::HashRef("k9".into()),
            Token::KeyList(vec!["k9".into(), "m2".into()]),
        ];
        for (position, token) in tokens.iter().enumerate() {
            let parsed = Token::from_value(&token.to_value(), position).unwrap();
            assert_eq!(&parsed, token);
        }
    }

    #[test]
    fn test_rejects_malformed_arrays() {
        assert!(Token::from_value(&json!([]), 0).is_err());
        assert!(Token::from_value(&json!([1, 2]), 0).is_err());
        assert!(Token::from_value(&json!([true]), 0).is_err());
        assert!(Token::from_value(&json!({"k": 1}), 0).is_err());
    }

    #[test]
    fn test_serde_matches_to_value() {
        let token = Token::IndexRef(4);
        let rendered = serde_json::to_value(&token).unwrap();
        assert_eq!(rendered, token.to_value());
        let parsed: Token = serde_json::from_value(rendered).unwrap();
        assert_eq!(parsed, token);
    }
}
