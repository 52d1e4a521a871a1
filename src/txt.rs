//! TXT record properties for a service instance.
//!
//! [RFC 6763 section 6](https://www.rfc-editor.org/rfc/rfc6763#section-6)
//! defines the TXT rdata as a sequence of length-prefixed `key=value`
//! strings. [`TxtProperties`] is the decoded view, [`Txt`] carries either
//! the decoded view or opaque caller-supplied bytes.

#[cfg(feature = "logging")]
use crate::log::error;
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;

/// The TXT data of a service, either as decoded properties or raw bytes.
///
/// Publishers that only hold pre-encoded TXT payloads (for example when
/// proxying records) can pass them through unmodified via [`Txt::Raw`].
#[derive(Clone, Debug)]
pub enum Txt {
    /// Key/value properties, encoded on the wire per RFC 6763.
    Decoded(TxtProperties),

    /// An already-encoded TXT rdata passed through as-is.
    Raw(Vec<u8>),
}

impl Txt {
    /// Returns the wire format bytes of this TXT data.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Txt::Decoded(props) => props.encode(),
            Txt::Raw(bytes) => {
                if bytes.is_empty() {
                    vec![0]
                } else {
                    bytes.clone()
                }
            }
        }
    }
}

impl Default for Txt {
    fn default() -> Self {
        Txt::Decoded(TxtProperties::default())
    }
}

impl From<TxtProperties> for Txt {
    fn from(props: TxtProperties) -> Self {
        Txt::Decoded(props)
    }
}

impl From<Vec<u8>> for Txt {
    fn from(bytes: Vec<u8>) -> Self {
        Txt::Raw(bytes)
    }
}

/// Represents properties in a TXT record.
///
/// The key string of a property is case insensitive, and only
/// one [`TxtProperty`] is stored for the same key.
///
/// [RFC 6763](https://www.rfc-editor.org/rfc/rfc6763#section-6.4):
/// "A given key SHOULD NOT appear more than once in a TXT record."
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TxtProperties {
    // Use `Vec` instead of `HashMap` to keep the order of insertions.
    properties: Vec<TxtProperty>,
}

impl TxtProperties {
    /// Returns an iterator for all properties.
    pub fn iter(&self) -> impl Iterator<Item = &TxtProperty> {
        self.properties.iter()
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns if the properties are empty.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Returns a property for a given `key`, where `key` is
    /// case insensitive.
    pub fn get(&self, key: &str) -> Option<&TxtProperty> {
        let key = key.to_lowercase();
        self.properties
            .iter()
            .find(|&prop| prop.key.to_lowercase() == key)
    }

    /// Returns a property value string for a given `key`, where `key` is
    /// case insensitive.
    pub fn get_property_val(&self, key: &str) -> Option<&str> {
        self.get(key).map(|x| x.val())
    }

    /// Encodes the properties into TXT rdata bytes.
    ///
    /// An empty property set encodes as a single zero byte, which is the
    /// smallest TXT rdata allowed on the wire.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for prop in self.properties.iter() {
            let s = format!("{}={}", prop.key, prop.val);
            match u8::try_from(s.len()) {
                Ok(len) => {
                    bytes.push(len);
                    bytes.extend_from_slice(s.as_bytes());
                }
                Err(_) => error!("TXT property {} too long, skipped", &prop.key),
            }
        }
        if bytes.is_empty() {
            bytes.push(0);
        }
        bytes
    }

    /// Decodes TXT rdata bytes into properties. Malformed entries are
    /// skipped.
    pub(crate) fn decode(txt: &[u8]) -> Self {
        let mut properties = Vec::new();
        let mut offset = 0;
        while offset < txt.len() {
            let length = txt[offset] as usize;
            if length == 0 {
                break; // reached the end
            }
            offset += 1; // move over the length byte
            if offset + length > txt.len() {
                error!("TXT rdata truncated at offset {}", offset);
                break;
            }
            match String::from_utf8(txt[offset..offset + length].to_vec()) {
                Ok(kv_string) => match kv_string.find('=') {
                    Some(idx) => {
                        let k = &kv_string[..idx];
                        let v = &kv_string[idx + 1..];
                        properties.push(TxtProperty {
                            key: k.to_string(),
                            val: v.to_string(),
                        });
                    }
                    None => error!("cannot find = sign inside {}", &kv_string),
                },
                Err(e) => error!("failed to convert to String from key/value pair: {}", e),
            }
            offset += length;
        }

        TxtProperties { properties }
    }
}

/// Represents a property in a TXT record.
#[derive(Debug, Clone, PartialEq)]
pub struct TxtProperty {
    /// The name of the property. The original cases are kept.
    key: String,

    /// RFC 6763 says values are bytes, not necessarily UTF-8.
    /// For now we define `val` as UTF-8 for ergnomics benefits.
    val: String,
}

impl TxtProperty {
    /// Returns the key of a property.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the value of a property.
    pub fn val(&self) -> &str {
        &self.val
    }
}

/// Supports constructing from a tuple.
impl<K, V> From<&(K, V)> for TxtProperty
where
    K: ToString,
    V: ToString,
{
    fn from(prop: &(K, V)) -> Self {
        TxtProperty {
            key: prop.0.to_string(),
            val: prop.1.to_string(),
        }
    }
}

/// This trait allows for converting inputs into [`TxtProperties`].
pub trait IntoTxtProperties {
    fn into_txt_properties(self) -> TxtProperties;
}

impl IntoTxtProperties for HashMap<String, String> {
    fn into_txt_properties(mut self) -> TxtProperties {
        let properties = self
            .drain()
            .map(|(key, val)| TxtProperty { key, val })
            .collect();
        TxtProperties { properties }
    }
}

impl IntoTxtProperties for Option<HashMap<String, String>> {
    fn into_txt_properties(self) -> TxtProperties {
        match self {
            None => TxtProperties::default(),
            Some(h) => h.into_txt_properties(),
        }
    }
}

/// Support slices like `[("k1", "v1"), ("k2", "v2")]`.
impl<'a, T: 'a> IntoTxtProperties for &'a [T]
where
    TxtProperty: From<&'a T>,
{
    fn into_txt_properties(self) -> TxtProperties {
        let mut properties = Vec::new();
        let mut keys = HashSet::new();
        for t in self.iter() {
            let prop = TxtProperty::from(t);
            let key = prop.key.to_lowercase();
            if keys.insert(key) {
                // Only push a new entry if the key did not exist.
                //
                // RFC 6763: https://www.rfc-editor.org/rfc/rfc6763#section-6.4
                //
                // "If a client receives a TXT record containing the same key more than
                //    once, then the client MUST silently ignore all but the first
                //    occurrence of that attribute. "
                properties.push(prop);
            }
        }
        TxtProperties { properties }
    }
}

#[cfg(test)]
mod tests {
    use super::{IntoTxtProperties, Txt, TxtProperties};

    #[test]
    fn test_txt_encode_decode() {
        let properties = [("key1", "value1"), ("key2", "value2")].as_slice().into_txt_properties();

        // test encode
        let encoded = properties.encode();
        assert_eq!(
            encoded.len(),
            "key1=".len() + "value1".len() + "key2=".len() + "value2".len() + 2
        );
        assert_eq!(encoded[0] as usize, "key1=".len() + "value1".len());

        // test decode
        let decoded = TxtProperties::decode(&encoded);
        assert_eq!(properties, decoded);
    }

    #[test]
    fn test_empty_txt_encodes_one_zero_byte() {
        let props = TxtProperties::default();
        assert_eq!(props.encode(), vec![0]);
        assert_eq!(Txt::Raw(Vec::new()).encode(), vec![0]);
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let props = [("k", "v1"), ("K", "v2")].as_slice().into_txt_properties();
        assert_eq!(props.len(), 1);
        assert_eq!(props.get_property_val("k"), Some("v1"));
    }

    #[test]
    fn test_oversized_property_is_skipped() {
        let big = "v".repeat(300);
        let props = [("big", big.as_str()), ("ok", "1")].as_slice().into_txt_properties();
        let encoded = props.encode();
        // only "ok=1" fits in a single length-prefixed string
        assert_eq!(encoded, vec![4, b'o', b'k', b'=', b'1']);
    }

    #[test]
    fn test_decode_truncated() {
        // length byte claims 10 bytes but only 3 follow
        let bytes = [10u8, b'a', b'=', b'b'];
        let decoded = TxtProperties::decode(&bytes);
        assert!(decoded.is_empty());
    }
}
