//! Hash signing of gateway form payloads.
//!
//! The hash is the uppercase hex SHA-512 of every field value except `hash`,
//! concatenated in payload order, followed by the integration key.

use sha2::{Digest, Sha512};
use url::form_urlencoded;

const HASH_FIELD: &str = "hash";

/// Ordered form fields as received from (or sent to) the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedPayload {
    fields: Vec<(String, String)>,
}

impl SignedPayload {
    pub fn parse(body: &[u8]) -> Self {
        Self {
            fields: form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Case-insensitive field lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn digest(&self, integration_key: &str) -> String {
        let mut hasher = Sha512::new();
        for (name, value) in &self.fields {
            if !name.eq_ignore_ascii_case(HASH_FIELD) {
                hasher.update(value.as_bytes());
            }
        }
        hasher.update(integration_key.as_bytes());
        hex::encode_upper(hasher.finalize())
    }

    /// Append the `hash` field computed with `integration_key`
    pub fn sign(mut self, integration_key: &str) -> Self {
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(HASH_FIELD));
        let hash = self.digest(integration_key);
        self.fields.push((HASH_FIELD.to_string(), hash));
        self
    }

    pub fn verify(&self, integration_key: &str) -> bool {
        match self.get(HASH_FIELD) {
            Some(received) => constant_time_eq_ignore_case(received, &self.digest(integration_key)),
            None => false,
        }
    }

    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
    }
}

fn constant_time_eq_ignore_case(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x.to_ascii_uppercase() ^ y.to_ascii_uppercase()))
        == 0
}
