use primitive_types::H160;
use serde::{de, Deserializer, Serializer};
use serde_with::{DeserializeAs, SerializeAs};
use std::fmt;

pub struct HexadecimalH160;

impl<'de> DeserializeAs<'de, H160> for HexadecimalH160 {
    fn deserialize_as<D>(deserializer: D) -> Result<H160, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize(deserializer)
    }
}

impl<'de> SerializeAs<H160> for HexadecimalH160 {
    fn serialize_as<S>(source: &H160, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize(source, serializer)
    }
}

pub fn serialize<S>(value: &H160, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut bytes = [0u8; 2 + 20 * 2];
    bytes[..2].copy_from_slice(b"0x");
    // Can only fail if the buffer size does not match but we know it is correct.
    hex::encode_to_slice(value, &mut bytes[2..]).unwrap();
    // Hex encoding is always valid utf8.
    let s = std::str::from_utf8(&bytes).unwrap();
    serializer.serialize_str(s)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<H160, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor {}
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = H160;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "an ethereum address as a hex encoded string")
        }

        fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let s = s.strip_prefix("0x").ok_or_else(|| {
                de::Error::custom(format!(
                    "{:?} can't be decoded as hex H160 because it does not start with '0x'",
                    s
                ))
            })?;
            let mut value = [0u8; 20];
            hex::decode_to_slice(s, value.as_mut()).map_err(|err| {
                de::Error::custom(format!("failed to decode {:?} as hex H160: {}", s, err))
            })?;
            Ok(H160(value))
        }
    }

    deserializer.deserialize_str(Visitor {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize)]
    struct S(#[serde(with = "super")] H160);

    #[test]
    fn round_trip() {
        let value = S(H160([1u8; 20]));
        let serialized = json!("0x0101010101010101010101010101010101010101");
        assert_eq!(serde_json::to_value(&value).unwrap(), serialized);
        assert_eq!(serde_json::from_value::<S>(serialized).unwrap(), value);
    }

    #[test]
    fn missing_prefix_is_rejected() {
        assert!(serde_json::from_value::<S>(json!(
            "0101010101010101010101010101010101010101"
        ))
        .is_err());
    }
}
