// Copyright (c) 2024 The Botho Foundation

//! Lock keys, Schnorr signatures and key blinding.

use core::{fmt, str::FromStr};

use bip39::{Language, Mnemonic, Seed};
use hmac::{Hmac, Mac};
use k256::{
    elliptic_curve::{ops::Reduce, sec1::ToEncodedPoint},
    schnorr::{Signature as SchnorrSignature, SigningKey, VerifyingKey},
    FieldBytes, NonZeroScalar, ProjectivePoint, Scalar, SecretKey, U256,
};
use rand_core::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use signature::{Signer, Verifier};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Error;

type HmacSha512 = Hmac<Sha512>;

/// BIP-32 path components for ecash lock keys: m/129372'/10'/0'/0'/{index}
const LOCK_PURPOSE: u32 = 129372;
const LOCK_KEY_BRANCH: u32 = 10;

/// Hardened key offset
const HARDENED: u32 = 0x80000000;

/// Domain separator mixed into every blinding tweak.
const BLINDING_DOMAIN: &[u8] = b"bth-ecash-p2bk";

/// A compressed secp256k1 public key (33 bytes: 0x02/0x03 || x).
///
/// Serialized as a lowercase hex string, the form lock keys take inside a
/// proof secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    /// Parse a SEC1 encoded key (compressed or uncompressed).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let key = k256::PublicKey::from_sec1_bytes(bytes).map_err(|_| Error::InvalidPublicKey)?;
        Ok(Self::from_k256(&key))
    }

    /// Parse a hex encoded key.
    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex_str).map_err(|_| Error::InvalidPublicKey)?;
        Self::from_slice(&bytes)
    }

    fn from_k256(key: &k256::PublicKey) -> Self {
        let point = key.to_encoded_point(true);
        let mut result = [0u8; 33];
        result.copy_from_slice(point.as_bytes());
        Self(result)
    }

    pub(crate) fn to_k256(&self) -> Result<k256::PublicKey, Error> {
        k256::PublicKey::from_sec1_bytes(&self.0).map_err(|_| Error::InvalidPublicKey)
    }

    pub(crate) fn from_projective(point: ProjectivePoint) -> Result<Self, Error> {
        let key =
            k256::PublicKey::from_affine(point.to_affine()).map_err(|_| Error::InvalidPublicKey)?;
        Ok(Self::from_k256(&key))
    }

    /// Compressed encoding.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0
    }

    /// Lowercase hex of the compressed encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// BIP340 x-only form of this key.
    pub fn x_only(&self) -> [u8; 32] {
        let mut result = [0u8; 32];
        result.copy_from_slice(&self.0[1..]);
        result
    }

    /// Verify a BIP340 Schnorr signature over `message`.
    ///
    /// Verification uses the x-only key, so the parity byte of the
    /// compressed encoding does not matter.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Error> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0[1..]).map_err(|_| Error::InvalidPublicKey)?;
        let signature = SchnorrSignature::try_from(&signature.0[..])
            .map_err(|_| Error::InvalidSignatureEncoding)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| Error::InvalidSignature)
    }

    /// Blind this key: `P + t·G`.
    pub fn blind(&self, tweak: &BlindingTweak) -> Result<Self, Error> {
        let point = self.to_k256()?.to_projective() + ProjectivePoint::GENERATOR * tweak.scalar();
        Self::from_projective(point)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        Self::from_hex(&hex_str).map_err(de::Error::custom)
    }
}

/// A 64-byte BIP340 Schnorr signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::InvalidSignatureEncoding)?;
        Ok(Self(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidSignatureEncoding)?;
        Self::from_slice(&bytes)
    }
}

/// Scalar tweak used to blind a lock key for one mint.
///
/// The tweak is `SHA256(domain || mint_url || compressed_key)`, so whoever
/// holds the original private key can re-derive the blinded private key for
/// the same mint without any extra state.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BlindingTweak([u8; 32]);

impl BlindingTweak {
    pub fn for_mint(mint_url: &str, key: &PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(BLINDING_DOMAIN);
        hasher.update(mint_url.as_bytes());
        hasher.update(key.to_bytes());
        Self(hasher.finalize().into())
    }

    fn scalar(&self) -> Scalar {
        <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(self.0))
    }
}

/// A secp256k1 keypair able to satisfy a P2PK lock.
#[derive(Clone, ZeroizeOnDrop)]
pub struct P2pkKeypair {
    #[zeroize(skip)] // SecretKey implements its own zeroization
    secret_key: SecretKey,
}

impl fmt::Debug for P2pkKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P2pkKeypair {{ public_key: {} }}", self.public_key())
    }
}

impl P2pkKeypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            secret_key: SecretKey::random(&mut OsRng),
        }
    }

    /// Create a keypair from raw 32-byte private key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let secret_key =
            SecretKey::from_bytes(&FieldBytes::from(*bytes)).map_err(|_| Error::InvalidPrivateKey)?;
        Ok(Self { secret_key })
    }

    /// Create a keypair from a hex encoded private key.
    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        let mut bytes = hex::decode(hex_str.trim()).map_err(|_| Error::InvalidPrivateKey)?;
        let result = match <[u8; 32]>::try_from(bytes.as_slice()) {
            Ok(array) => Self::from_bytes(&array),
            Err(_) => Err(Error::InvalidPrivateKey),
        };
        bytes.zeroize();
        result
    }

    /// Derive a lock key from a BIP-39 mnemonic phrase.
    ///
    /// Uses the path m/129372'/10'/0'/0'/{index}.
    pub fn from_mnemonic(mnemonic: &str, password: &str, index: u32) -> Result<Self, Error> {
        let mnemonic =
            Mnemonic::from_phrase(mnemonic, Language::English).map_err(|_| Error::InvalidMnemonic)?;

        let seed = Seed::new(&mnemonic, password);
        Self::from_seed(seed.as_bytes(), index)
    }

    /// Derive a lock key from a 64-byte BIP-39 seed.
    pub fn from_seed(seed: &[u8], index: u32) -> Result<Self, Error> {
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .map_err(|e| Error::DerivationError(e.to_string()))?;
        mac.update(seed);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&result[..32]);
        chain_code.copy_from_slice(&result[32..]);

        let path = [
            LOCK_PURPOSE | HARDENED,
            LOCK_KEY_BRANCH | HARDENED,
            HARDENED,
            HARDENED,
            index,
        ];

        for &child_index in &path {
            let (new_key, new_chain) = derive_child(&key, &chain_code, child_index)?;
            key = new_key;
            chain_code = new_chain;
        }

        let keypair = Self::from_bytes(&key);
        key.zeroize();
        chain_code.zeroize();
        keypair
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_k256(&self.secret_key.public_key())
    }

    /// Raw private key bytes, for persisting a manually entered key.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.to_bytes().into()
    }

    /// Sign `message` with BIP340 Schnorr.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, Error> {
        let signing_key = SigningKey::from_bytes(&self.secret_key.to_bytes())
            .map_err(|e| Error::SigningError(e.to_string()))?;
        let signature: SchnorrSignature = signing_key
            .try_sign(message)
            .map_err(|e| Error::SigningError(e.to_string()))?;
        Ok(Signature(signature.to_bytes()))
    }

    /// The keypair matching `self.public_key().blind(tweak)`: `s + t`.
    pub fn blind(&self, tweak: &BlindingTweak) -> Result<Self, Error> {
        let scalar = *self.secret_key.to_nonzero_scalar() + tweak.scalar();
        let scalar: Option<NonZeroScalar> = NonZeroScalar::new(scalar).into();
        let scalar = scalar.ok_or(Error::InvalidPrivateKey)?;
        Ok(Self {
            secret_key: SecretKey::from(scalar),
        })
    }

    pub(crate) fn scalar(&self) -> NonZeroScalar {
        self.secret_key.to_nonzero_scalar()
    }
}

/// Derive a child key from a parent key and chain code (BIP-32, private
/// parent to private child).
fn derive_child(
    parent_key: &[u8; 32],
    parent_chain: &[u8; 32],
    index: u32,
) -> Result<([u8; 32], [u8; 32]), Error> {
    let mut mac = HmacSha512::new_from_slice(parent_chain)
        .map_err(|e| Error::DerivationError(e.to_string()))?;

    let parent = SecretKey::from_bytes(&FieldBytes::from(*parent_key))
        .map_err(|_| Error::DerivationError("invalid parent key".to_string()))?;

    if index >= HARDENED {
        mac.update(&[0x00]);
        mac.update(parent_key);
    } else {
        let pubkey = parent.public_key().to_encoded_point(true);
        mac.update(pubkey.as_bytes());
    }

    mac.update(&index.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let tweak = NonZeroScalar::try_from(&result[..32])
        .map_err(|_| Error::DerivationError("derived tweak out of range".to_string()))?;
    let child = *parent.to_nonzero_scalar() + *tweak;
    let child: Option<NonZeroScalar> = NonZeroScalar::new(child).into();
    let child = child.ok_or_else(|| Error::DerivationError("derived zero key".to_string()))?;

    let mut new_chain = [0u8; 32];
    new_chain.copy_from_slice(&result[32..]);

    Ok((SecretKey::from(child).to_bytes().into(), new_chain))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Standard test mnemonic (DO NOT USE IN PRODUCTION)
    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_sign_and_verify() {
        let keypair = P2pkKeypair::generate();
        let message = b"[\"P2PK\",{\"nonce\":\"00\"}]";

        let signature = keypair.sign(message).unwrap();
        assert!(keypair.public_key().verify(message, &signature).is_ok());
        assert_eq!(
            keypair.public_key().verify(b"other message", &signature),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let alice = P2pkKeypair::generate();
        let bob = P2pkKeypair::generate();

        let signature = alice.sign(b"secret").unwrap();
        assert!(bob.public_key().verify(b"secret", &signature).is_err());
    }

    #[test]
    fn test_mnemonic_derivation_is_deterministic() {
        let a = P2pkKeypair::from_mnemonic(TEST_MNEMONIC, "", 0).unwrap();
        let b = P2pkKeypair::from_mnemonic(TEST_MNEMONIC, "", 0).unwrap();
        let c = P2pkKeypair::from_mnemonic(TEST_MNEMONIC, "", 1).unwrap();

        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_invalid_mnemonic() {
        assert_eq!(
            P2pkKeypair::from_mnemonic("not a mnemonic", "", 0).unwrap_err(),
            Error::InvalidMnemonic
        );
    }

    #[test]
    fn test_blinded_keypair_matches_blinded_pubkey() {
        let keypair = P2pkKeypair::generate();
        let tweak = BlindingTweak::for_mint("https://mint.example", &keypair.public_key());

        let blinded_pub = keypair.public_key().blind(&tweak).unwrap();
        let blinded_pair = keypair.blind(&tweak).unwrap();
        assert_eq!(blinded_pair.public_key(), blinded_pub);
        assert_ne!(blinded_pub, keypair.public_key());

        let signature = blinded_pair.sign(b"locked").unwrap();
        assert!(blinded_pub.verify(b"locked", &signature).is_ok());
        assert!(keypair.public_key().verify(b"locked", &signature).is_err());
    }

    #[test]
    fn test_blinding_depends_on_mint() {
        let key = P2pkKeypair::generate().public_key();
        let a = key.blind(&BlindingTweak::for_mint("https://a.example", &key)).unwrap();
        let b = key.blind(&BlindingTweak::for_mint("https://b.example", &key)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_public_key_hex_and_serde() {
        let key = P2pkKeypair::generate().public_key();
        let hex_str = key.to_hex();
        assert_eq!(hex_str.len(), 66);
        assert!(hex_str.starts_with("02") || hex_str.starts_with("03"));
        assert_eq!(PublicKey::from_hex(&hex_str).unwrap(), key);

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", hex_str));
        let decoded: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_invalid_public_key() {
        assert!(PublicKey::from_hex("02deadbeef").is_err());
        assert!(PublicKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_signature_hex_parse() {
        let keypair = P2pkKeypair::generate();
        let signature = keypair.sign(b"msg").unwrap();
        let parsed: Signature = signature.to_hex().parse().unwrap();
        assert_eq!(parsed, signature);
        assert!("abcd".parse::<Signature>().is_err());
    }

    #[test]
    fn test_keypair_hex_round_trip() {
        let keypair = P2pkKeypair::generate();
        let restored = P2pkKeypair::from_hex(&hex::encode(keypair.secret_bytes())).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
        assert!(P2pkKeypair::from_hex("00").is_err());
    }
}
