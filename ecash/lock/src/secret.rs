// Copyright (c) 2024 The Botho Foundation

//! Wire codec for pay-to-public-key locking conditions.
//!
//! A locked secret is the JSON array
//! `["P2PK", {"nonce": ..., "data": <primary key>, "tags": [[name, values...], ...]}]`.
//! Parsing is strict: unknown kinds, unknown tags, repeated tags and repeated
//! keys are all rejected, so a parsed condition always re-serializes to a
//! secret that parses back to the same condition.

use std::{collections::HashSet, fmt, str::FromStr};

use bth_crypto_p2pk::PublicKey;
use rand::RngCore;
use serde_json::{json, Value};

use crate::{error::LockError, proof::Secret};

const KIND_P2PK: &str = "P2PK";

const TAG_SIGFLAG: &str = "sigflag";
const TAG_N_SIGS: &str = "n_sigs";
const TAG_LOCKTIME: &str = "locktime";
const TAG_PUBKEYS: &str = "pubkeys";
const TAG_REFUND: &str = "refund";
const TAG_N_SIGS_REFUND: &str = "n_sigs_refund";

/// What a witness signature commits to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SigFlag {
    /// Each input proof is signed on its own secret.
    #[default]
    SigInputs,
    /// Signatures also commit to the transaction outputs. Refused.
    SigAll,
}

impl SigFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigFlag::SigInputs => "SIG_INPUTS",
            SigFlag::SigAll => "SIG_ALL",
        }
    }
}

impl fmt::Display for SigFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigFlag {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIG_INPUTS" => Ok(SigFlag::SigInputs),
            "SIG_ALL" => Ok(SigFlag::SigAll),
            other => Err(LockError::MalformedSecret(format!(
                "unknown signature flag {other}"
            ))),
        }
    }
}

/// Optional conditions attached to a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTags {
    /// Unix seconds after which the refund path takes over.
    pub locktime: Option<u64>,
    /// Co-signers on the lock path besides the primary key.
    pub additional_lock_keys: Vec<PublicKey>,
    pub required_lock_signatures: u64,
    pub refund_keys: Vec<PublicKey>,
    pub required_refund_signatures: u64,
    pub sig_flag: SigFlag,
}

impl Default for LockTags {
    fn default() -> Self {
        Self {
            locktime: None,
            additional_lock_keys: Vec::new(),
            required_lock_signatures: 1,
            refund_keys: Vec::new(),
            required_refund_signatures: 1,
            sig_flag: SigFlag::SigInputs,
        }
    }
}

/// A locking condition without its nonce. One template yields one fresh
/// condition per proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTemplate {
    pub primary_key: PublicKey,
    pub tags: LockTags,
}

impl LockTemplate {
    /// Validated template.
    pub fn new(primary_key: PublicKey, tags: LockTags) -> Result<Self, LockError> {
        let template = Self { primary_key, tags };
        template.validate()?;
        Ok(template)
    }

    pub fn single_key(primary_key: PublicKey) -> Self {
        Self {
            primary_key,
            tags: LockTags::default(),
        }
    }

    /// All keys on the lock path, primary first.
    pub fn lock_keys(&self) -> Vec<PublicKey> {
        std::iter::once(self.primary_key)
            .chain(self.tags.additional_lock_keys.iter().copied())
            .collect()
    }

    pub fn validate(&self) -> Result<(), LockError> {
        let tags = &self.tags;
        if tags.sig_flag == SigFlag::SigAll {
            return Err(LockError::UnsupportedSigFlag(tags.sig_flag.to_string()));
        }
        if tags.required_lock_signatures == 0 {
            return Err(LockError::MalformedSecret(
                "required lock signatures must be positive".to_string(),
            ));
        }
        let lock_keys = self.lock_keys();
        if tags.required_lock_signatures > lock_keys.len() as u64 {
            return Err(LockError::MalformedSecret(format!(
                "{} lock signatures required but only {} lock keys",
                tags.required_lock_signatures,
                lock_keys.len()
            )));
        }
        if tags.required_refund_signatures == 0 {
            return Err(LockError::MalformedSecret(
                "required refund signatures must be positive".to_string(),
            ));
        }
        ensure_distinct(&lock_keys, "lock")?;
        ensure_distinct(&tags.refund_keys, "refund")?;
        Ok(())
    }

    /// Attach a fresh random nonce.
    pub fn instantiate(&self) -> LockingCondition {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.with_nonce(hex::encode(nonce))
    }

    pub fn with_nonce(&self, nonce: impl Into<String>) -> LockingCondition {
        LockingCondition {
            nonce: nonce.into(),
            primary_key: self.primary_key,
            tags: self.tags.clone(),
        }
    }
}

/// Decoded pay-to-public-key secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockingCondition {
    pub nonce: String,
    pub primary_key: PublicKey,
    pub tags: LockTags,
}

impl LockingCondition {
    pub fn template(&self) -> LockTemplate {
        LockTemplate {
            primary_key: self.primary_key,
            tags: self.tags.clone(),
        }
    }

    pub fn to_secret(&self) -> Result<Secret, LockError> {
        SecretCodec::serialize(self).map(Secret::new)
    }
}

fn ensure_distinct(keys: &[PublicKey], path: &str) -> Result<(), LockError> {
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key) {
            return Err(LockError::MalformedSecret(format!(
                "duplicate {path} key {key}"
            )));
        }
    }
    Ok(())
}

/// Parse and serialize locking conditions.
pub struct SecretCodec;

impl SecretCodec {
    /// Classify and decode a raw secret.
    ///
    /// Returns `Ok(None)` for plain secrets (anything not opening with `[`).
    /// Anything that does must be a complete, valid locking condition.
    pub fn parse(raw: &str) -> Result<Option<LockingCondition>, LockError> {
        if !raw.trim_start().starts_with('[') {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| malformed(format!("secret is not valid JSON: {e}")))?;
        let Value::Array(items) = value else {
            return Err(malformed("secret must be a JSON array"));
        };
        Self::parse_array(items).map(Some)
    }

    fn parse_array(items: Vec<Value>) -> Result<LockingCondition, LockError> {
        let [kind, body]: [Value; 2] = items
            .try_into()
            .map_err(|_| malformed("secret must have exactly two elements"))?;

        match kind.as_str() {
            Some(KIND_P2PK) => {}
            Some(other) => return Err(malformed(format!("unsupported secret kind {other}"))),
            None => return Err(malformed("secret kind must be a string")),
        }

        let Value::Object(body) = body else {
            return Err(malformed("secret body must be an object"));
        };
        if let Some(key) = body
            .keys()
            .find(|k| !matches!(k.as_str(), "nonce" | "data" | "tags"))
        {
            return Err(malformed(format!("unknown field {key}")));
        }

        let nonce = body
            .get("nonce")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| malformed("missing nonce"))?
            .to_string();
        let primary_key = body
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing data"))
            .and_then(parse_key)?;
        let tags = match body.get("tags") {
            None | Some(Value::Null) => LockTags::default(),
            Some(raw) => parse_tags(raw)?,
        };

        let template = LockTemplate { primary_key, tags };
        template.validate()?;
        Ok(template.with_nonce(nonce))
    }

    /// Deterministic encoding of a condition.
    pub fn serialize(condition: &LockingCondition) -> Result<String, LockError> {
        condition.template().validate()?;
        let tags = &condition.tags;

        let mut tag_list: Vec<Vec<String>> = vec![vec![
            TAG_SIGFLAG.to_string(),
            tags.sig_flag.as_str().to_string(),
        ]];
        if tags.required_lock_signatures != 1 {
            tag_list.push(vec![
                TAG_N_SIGS.to_string(),
                tags.required_lock_signatures.to_string(),
            ]);
        }
        if let Some(locktime) = tags.locktime {
            tag_list.push(vec![TAG_LOCKTIME.to_string(), locktime.to_string()]);
        }
        if !tags.additional_lock_keys.is_empty() {
            tag_list.push(key_tag(TAG_PUBKEYS, &tags.additional_lock_keys));
        }
        if !tags.refund_keys.is_empty() {
            tag_list.push(key_tag(TAG_REFUND, &tags.refund_keys));
        }
        if tags.required_refund_signatures != 1 {
            tag_list.push(vec![
                TAG_N_SIGS_REFUND.to_string(),
                tags.required_refund_signatures.to_string(),
            ]);
        }

        let secret = json!([
            KIND_P2PK,
            {
                "nonce": condition.nonce,
                "data": condition.primary_key.to_hex(),
                "tags": tag_list,
            }
        ]);
        serde_json::to_string(&secret).map_err(|e| malformed(e.to_string()))
    }
}

fn key_tag(name: &str, keys: &[PublicKey]) -> Vec<String> {
    std::iter::once(name.to_string())
        .chain(keys.iter().map(PublicKey::to_hex))
        .collect()
}

fn parse_tags(raw: &Value) -> Result<LockTags, LockError> {
    let Value::Array(entries) = raw else {
        return Err(malformed("tags must be an array"));
    };

    let mut tags = LockTags::default();
    let mut seen = HashSet::new();

    for entry in entries {
        let fields = tag_fields(entry)?;
        let (name, values) = fields
            .split_first()
            .ok_or_else(|| malformed("empty tag"))?;
        if values.is_empty() {
            return Err(malformed(format!("tag {name} has no values")));
        }
        if !seen.insert(name.to_string()) {
            return Err(malformed(format!("duplicate tag {name}")));
        }

        match name.as_str() {
            TAG_SIGFLAG => {
                let flag: SigFlag = single_value(name, values)?.parse()?;
                if flag == SigFlag::SigAll {
                    return Err(LockError::UnsupportedSigFlag(flag.to_string()));
                }
                tags.sig_flag = flag;
            }
            TAG_N_SIGS => tags.required_lock_signatures = parse_count(name, values)?,
            TAG_LOCKTIME => tags.locktime = Some(parse_count(name, values)?),
            TAG_PUBKEYS => {
                tags.additional_lock_keys = values
                    .iter()
                    .map(|v| parse_key(v))
                    .collect::<Result<_, _>>()?
            }
            TAG_REFUND => {
                tags.refund_keys = values
                    .iter()
                    .map(|v| parse_key(v))
                    .collect::<Result<_, _>>()?
            }
            TAG_N_SIGS_REFUND => tags.required_refund_signatures = parse_count(name, values)?,
            other => return Err(malformed(format!("unknown tag {other}"))),
        }
    }

    Ok(tags)
}

fn tag_fields(entry: &Value) -> Result<Vec<String>, LockError> {
    let Value::Array(fields) = entry else {
        return Err(malformed("tag must be an array"));
    };
    fields
        .iter()
        .map(|field| {
            field
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed("tag values must be strings"))
        })
        .collect()
}

fn single_value<'a>(name: &str, values: &'a [String]) -> Result<&'a str, LockError> {
    match values {
        [value] => Ok(value),
        _ => Err(malformed(format!("tag {name} takes exactly one value"))),
    }
}

fn parse_count(name: &str, values: &[String]) -> Result<u64, LockError> {
    single_value(name, values)?
        .parse()
        .map_err(|_| malformed(format!("tag {name} is not a non-negative integer")))
}

fn parse_key(hex: &str) -> Result<PublicKey, LockError> {
    PublicKey::from_hex(hex).map_err(|_| malformed(format!("invalid public key {hex}")))
}

fn malformed(reason: impl Into<String>) -> LockError {
    LockError::MalformedSecret(reason.into())
}
