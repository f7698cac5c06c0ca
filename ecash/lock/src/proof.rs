// Copyright (c) 2024 The Botho Foundation

//! Bearer proofs, their witnesses, and the token that groups them.

use std::{collections::HashSet, fmt};

use bth_crypto_p2pk::Signature;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{
    error::LockError,
    secret::{LockingCondition, SecretCodec},
};

/// Opaque proof secret. Either a random plain string or a serialized
/// locking condition.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Fresh plain secret: 32 random bytes, hex encoded.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Decode the locking condition carried by this secret, if any.
    ///
    /// Secrets that are not JSON arrays are plain and yield `None`. A JSON
    /// array must be a valid locking condition.
    pub fn locking_condition(&self) -> Result<Option<LockingCondition>, LockError> {
        SecretCodec::parse(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secrets are bearer material; only show a prefix.
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "Secret({prefix}...)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signatures attached to a locked proof, hex encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub signatures: Vec<String>,
}

impl Witness {
    pub fn from_signatures<'a>(signatures: impl IntoIterator<Item = &'a Signature>) -> Self {
        Self {
            signatures: signatures.into_iter().map(Signature::to_hex).collect(),
        }
    }

    /// Parse the signatures, skipping any that are not valid encodings.
    pub fn parsed_signatures(&self) -> Vec<Signature> {
        self.signatures
            .iter()
            .filter_map(|hex| hex.parse().ok())
            .collect()
    }
}

/// One unit of bearer value issued by a mint.
///
/// Proofs are never mutated in place. Attaching a witness produces a new
/// proof through [`Proof::with_witness`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub amount: u64,
    #[serde(rename = "id")]
    pub keyset_id: String,
    pub secret: Secret,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "witness_string"
    )]
    pub witness: Option<Witness>,
}

impl Proof {
    pub fn with_witness(&self, witness: Witness) -> Proof {
        Proof {
            witness: Some(witness),
            ..self.clone()
        }
    }

    /// Copy of this proof without any witness.
    pub fn stripped(&self) -> Proof {
        Proof {
            witness: None,
            ..self.clone()
        }
    }
}

/// Sum proof amounts, failing on overflow.
pub fn total_amount(proofs: &[Proof]) -> Result<u64, LockError> {
    proofs.iter().try_fold(0u64, |acc, proof| {
        acc.checked_add(proof.amount)
            .ok_or_else(|| LockError::MalformedToken("proof amounts overflow".to_string()))
    })
}

/// The witness travels as a JSON string inside the proof object.
mod witness_string {
    use super::Witness;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        witness: &Option<Witness>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match witness {
            Some(witness) => {
                let json = serde_json::to_string(witness).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&json)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Witness>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|json| serde_json::from_str(&json).map_err(D::Error::custom))
            .transpose()
    }
}

/// Mint base URL, normalized without trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MintUrl(String);

impl MintUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join an API path onto the base URL.
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl From<String> for MintUrl {
    fn from(raw: String) -> Self {
        Self(raw.trim().trim_end_matches('/').to_string())
    }
}

impl From<&str> for MintUrl {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<MintUrl> for String {
    fn from(url: MintUrl) -> Self {
        url.0
    }
}

impl fmt::Display for MintUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Denomination of a token, lowercase (`sat`, `usd`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyUnit(String);

impl CurrencyUnit {
    /// Unit that lightning payments settle in.
    pub const NATIVE: &'static str = "sat";

    pub fn sat() -> Self {
        Self(Self::NATIVE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_native(&self) -> bool {
        self.0 == Self::NATIVE
    }
}

impl Default for CurrencyUnit {
    fn default() -> Self {
        Self::sat()
    }
}

impl From<String> for CurrencyUnit {
    fn from(raw: String) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }
}

impl From<&str> for CurrencyUnit {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<CurrencyUnit> for String {
    fn from(unit: CurrencyUnit) -> Self {
        unit.0
    }
}

impl fmt::Display for CurrencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proofs from a single mint in a single unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub mint_url: MintUrl,
    pub unit: CurrencyUnit,
    pub proofs: Vec<Proof>,
    pub memo: Option<String>,
}

impl Token {
    pub fn new(mint_url: MintUrl, unit: CurrencyUnit, proofs: Vec<Proof>) -> Self {
        Self {
            mint_url,
            unit,
            proofs,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn value(&self) -> Result<u64, LockError> {
        total_amount(&self.proofs)
    }

    /// Same mint, unit and set of secrets. Witnesses are ignored.
    pub fn is_value_equivalent(&self, other: &Token) -> bool {
        let ours: HashSet<&Secret> = self.proofs.iter().map(|p| &p.secret).collect();
        let theirs: HashSet<&Secret> = other.proofs.iter().map(|p| &p.secret).collect();
        self.mint_url == other.mint_url && self.unit == other.unit && ours == theirs
    }

    /// Token with the same scope but a different proof set.
    pub fn with_proofs(&self, proofs: Vec<Proof>) -> Token {
        Token {
            mint_url: self.mint_url.clone(),
            unit: self.unit.clone(),
            proofs,
            memo: self.memo.clone(),
        }
    }
}

/// Seconds since the Unix epoch.
pub fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof(amount: u64, secret: &str) -> Proof {
        Proof {
            amount,
            keyset_id: "009a1f293253e41e".to_string(),
            secret: Secret::new(secret),
            c: "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904".to_string(),
            witness: None,
        }
    }

    #[test]
    fn test_proof_json_shape() {
        let witnessed = proof(8, "abc").with_witness(Witness {
            signatures: vec!["aa".repeat(64)],
        });
        let json = serde_json::to_value(&witnessed).unwrap();

        assert_eq!(json["id"], "009a1f293253e41e");
        assert!(json["C"].is_string());
        // Witness is a JSON document encoded as a string.
        let witness_json: serde_json::Value =
            serde_json::from_str(json["witness"].as_str().unwrap()).unwrap();
        assert_eq!(witness_json["signatures"][0], "aa".repeat(64));

        let back: Proof = serde_json::from_value(json).unwrap();
        assert_eq!(back, witnessed);
    }

    #[test]
    fn test_plain_proof_omits_witness() {
        let json = serde_json::to_string(&proof(1, "abc")).unwrap();
        assert!(!json.contains("witness"));
    }

    #[test]
    fn test_with_witness_leaves_original_untouched() {
        let original = proof(2, "abc");
        let witnessed = original.with_witness(Witness::default());
        assert!(original.witness.is_none());
        assert!(witnessed.witness.is_some());
        assert_eq!(witnessed.stripped(), original);
    }

    #[test]
    fn test_mint_url_normalization() {
        let url = MintUrl::from("https://mint.example.com/ ");
        assert_eq!(url.as_str(), "https://mint.example.com");
        assert_eq!(url.join("/v1/checkstate"), "https://mint.example.com/v1/checkstate");
        assert_eq!(url, MintUrl::from("https://mint.example.com"));
    }

    #[test]
    fn test_unit_defaults_to_sat() {
        assert_eq!(CurrencyUnit::default().as_str(), "sat");
        assert!(CurrencyUnit::from("SAT").is_native());
        assert!(!CurrencyUnit::from("usd").is_native());
    }

    #[test]
    fn test_value_equivalence_ignores_witness_and_order() {
        let url = MintUrl::from("https://mint.example.com");
        let a = Token::new(url.clone(), CurrencyUnit::sat(), vec![proof(1, "a"), proof(2, "b")]);
        let b = Token::new(
            url,
            CurrencyUnit::sat(),
            vec![
                proof(2, "b"),
                proof(1, "a").with_witness(Witness::default()),
            ],
        );
        assert!(a.is_value_equivalent(&b));
        assert_eq!(a.value().unwrap(), 3);
    }

    #[test]
    fn test_total_amount_overflow() {
        let proofs = vec![proof(u64::MAX, "a"), proof(1, "b")];
        assert!(total_amount(&proofs).is_err());
    }

    #[test]
    fn test_random_secrets_differ() {
        let a = Secret::random();
        let b = Secret::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.locking_condition().unwrap(), None);
    }
}
