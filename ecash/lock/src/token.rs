// Copyright (c) 2024 The Botho Foundation

//! Bearer string encoding of a [`Token`].
//!
//! Format: `cashuA` followed by base64url of
//! `{"token":[{"mint":..,"proofs":[..]}],"unit":..,"memo":..}`.
//! Decoding accepts padded or unpadded input, the standard base64 alphabet,
//! and an optional `cashu:` URI prefix.

use std::{fmt, str::FromStr};

use base64::{
    alphabet,
    engine::{
        general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE},
        DecodePaddingMode,
    },
    Engine as _,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::LockError,
    proof::{CurrencyUnit, MintUrl, Proof, Token},
};

const TOKEN_PREFIX_V3: &str = "cashuA";
const URI_PREFIX: &str = "cashu:";

const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Serialize, Deserialize)]
struct TokenV3 {
    token: Vec<TokenV3Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TokenV3Entry {
    mint: String,
    proofs: Vec<Proof>,
}

impl Token {
    /// Encode as a `cashuA` bearer string.
    pub fn encode(&self) -> Result<String, LockError> {
        let wire = TokenV3 {
            token: vec![TokenV3Entry {
                mint: self.mint_url.to_string(),
                proofs: self.proofs.clone(),
            }],
            unit: Some(self.unit.to_string()),
            memo: self.memo.clone(),
        };
        let json =
            serde_json::to_vec(&wire).map_err(|e| LockError::MalformedToken(e.to_string()))?;
        Ok(format!("{TOKEN_PREFIX_V3}{}", URL_SAFE.encode(json)))
    }

    /// Decode a bearer string. Tokens spanning several mints are refused.
    pub fn decode(encoded: &str) -> Result<Token, LockError> {
        let trimmed = encoded.trim();
        let trimmed = trimmed.strip_prefix(URI_PREFIX).unwrap_or(trimmed);
        let body = trimmed.strip_prefix(TOKEN_PREFIX_V3).ok_or_else(|| {
            LockError::MalformedToken(format!("expected {TOKEN_PREFIX_V3} prefix"))
        })?;

        let normalized = body.replace('+', "-").replace('/', "_");
        let json = LENIENT_URL_SAFE
            .decode(normalized)
            .map_err(|e| LockError::MalformedToken(format!("invalid base64: {e}")))?;
        let wire: TokenV3 = serde_json::from_slice(&json)
            .map_err(|e| LockError::MalformedToken(format!("invalid token json: {e}")))?;

        let mut entries = wire.token.into_iter();
        let first = entries
            .next()
            .ok_or_else(|| LockError::MalformedToken("token has no entries".to_string()))?;
        let mint_url = MintUrl::from(first.mint);
        let mut proofs = first.proofs;

        for entry in entries {
            let other = MintUrl::from(entry.mint);
            if other != mint_url {
                return Err(LockError::MintMismatch {
                    expected: mint_url.to_string(),
                    actual: other.to_string(),
                });
            }
            proofs.extend(entry.proofs);
        }
        if proofs.is_empty() {
            return Err(LockError::MalformedToken("token has no proofs".to_string()));
        }

        Ok(Token {
            mint_url,
            unit: wire.unit.map(CurrencyUnit::from).unwrap_or_default(),
            proofs,
            memo: wire.memo,
        })
    }
}

impl FromStr for Token {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::decode(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.encode().map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}
