//! Serde adapters for the beacon API JSON conventions: quoted integers and 0x-prefixed hex.

/// Serialize a u64 as a decimal string, accept either a string or a number
pub mod quoted_u64 {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct QuotedU64Visitor;

        impl<'de> de::Visitor<'de> for QuotedU64Visitor {
            type Value = u64;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an unsigned integer or a quoted unsigned integer")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
                Ok(value)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
                value.parse::<u64>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(QuotedU64Visitor)
    }
}

/// Fixed-size byte arrays as 0x-prefixed hex strings
pub mod hex_array {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&crate::to_hex(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        crate::decode_hex_array(&s).map_err(de::Error::custom)
    }
}

/// Variable-length byte strings as 0x-prefixed hex strings
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&crate::to_hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        crate::decode_hex(&s).map_err(de::Error::custom)
    }
}
