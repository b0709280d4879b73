//! Schnorr commitments, partial signatures and aggregation over Ristretto.
//!
//! A round signs `m = hash(payload)`. Each participant `i` holds a key
//! `x_i` and draws a nonce `k_i` with commitment `R_i = k_i·G`. Given the sum
//! of everybody else's commitments, `i` computes the shared
//! `R = R_i + Σ R_j`, the challenge `e = H(R || m)` and its share
//! `s_i = k_i + e·x_i`. Summing the shares gives `(R, Σ s_i)`, which verifies
//! against `Σ x_i·G` exactly when the same participant set contributed to
//! both sides.

use std::fmt;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::CompressedRistretto;
use curve25519_dalek::traits::Identity;
use curve25519_dalek::{RistrettoPoint, Scalar};
use rand::RngCore;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;

const NONCE_DOMAIN: &[u8] = b"cosign-schnorr-nonce";
const CHALLENGE_DOMAIN: &[u8] = b"cosign-schnorr-challenge";
const KEY_DOMAIN: &[u8] = b"cosign-schnorr-key";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchnorrError {
    #[error("invalid point encoding")]
    InvalidPoint,

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("nonce generation produced zero")]
    ZeroNonce,

    #[error("partial signatures use different commitments")]
    CommitmentMismatch,

    #[error("nothing to combine")]
    Empty,
}

/// Hash a payload into the 32-byte message that gets signed
pub fn hash_message(payload: &[u8]) -> [u8; 32] {
    cosign_state::sha3_hash(payload)
}

fn wide_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Group element: a public key or a nonce commitment
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Point(RistrettoPoint);

pub type PublicKey = Point;

impl Point {
    pub fn identity() -> Self {
        Point(RistrettoPoint::identity())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SchnorrError> {
        CompressedRistretto(*bytes)
            .decompress()
            .map(Point)
            .ok_or(SchnorrError::InvalidPoint)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, SchnorrError> {
        let bytes: [u8; 32] = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| SchnorrError::InvalidPoint)?
            .try_into()
            .map_err(|_| SchnorrError::InvalidPoint)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({})", &self.to_hex()[..16])
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.to_bytes().serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Point::from_hex(&s).map_err(de::Error::custom)
        } else {
            let bytes = <[u8; 32]>::deserialize(deserializer)?;
            Point::from_bytes(&bytes).map_err(de::Error::custom)
        }
    }
}

/// Producer signing key
#[derive(Clone)]
pub struct PrivateKey(Scalar);

impl PrivateKey {
    pub fn generate() -> Self {
        let mut seed = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut seed);
        PrivateKey(wide_scalar(&[KEY_DOMAIN, &seed]))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SchnorrError> {
        let scalar: Option<Scalar> = Scalar::from_canonical_bytes(*bytes).into();
        match scalar {
            Some(s) if s != Scalar::ZERO => Ok(PrivateKey(s)),
            _ => Err(SchnorrError::InvalidScalar),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn from_hex(s: &str) -> Result<Self, SchnorrError> {
        let bytes: [u8; 32] = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| SchnorrError::InvalidScalar)?
            .try_into()
            .map_err(|_| SchnorrError::InvalidScalar)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        Point(RISTRETTO_BASEPOINT_POINT * self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// One-shot signing nonce; consumed by [`partial_sign`]
pub struct Nonce(Scalar);

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Nonce(..)")
    }
}

/// Schnorr signature `(R, s)`, either partial or aggregated
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Signature {
    r: Point,
    s: Scalar,
}

impl Signature {
    pub fn commitment(&self) -> &Point {
        &self.r
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.r, self.s.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (r, s) = <(Point, [u8; 32])>::deserialize(deserializer)?;
        let s: Option<Scalar> = Scalar::from_canonical_bytes(s).into();
        let s = s.ok_or_else(|| de::Error::custom(SchnorrError::InvalidScalar))?;
        Ok(Signature { r, s })
    }
}

/// Draw a nonce bound to the key and message, hedged with fresh randomness
pub fn generate_commitment(key: &PrivateKey, message: &[u8]) -> Result<(Nonce, Point), SchnorrError> {
    let mut random = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random);

    let k = wide_scalar(&[NONCE_DOMAIN, key.0.as_bytes(), message, &random]);
    if k == Scalar::ZERO {
        return Err(SchnorrError::ZeroNonce);
    }
    Ok((Nonce(k), Point(RISTRETTO_BASEPOINT_POINT * k)))
}

fn challenge(r: &Point, message: &[u8]) -> Scalar {
    wide_scalar(&[CHALLENGE_DOMAIN, &r.to_bytes(), message])
}

/// Sign one share given the combined commitment of all other participants
pub fn partial_sign(key: &PrivateKey, nonce: Nonce, message: &[u8], others_commitment: &Point) -> Signature {
    let r = Point(RISTRETTO_BASEPOINT_POINT * nonce.0 + others_commitment.0);
    let e = challenge(&r, message);
    Signature {
        r,
        s: nonce.0 + e * key.0,
    }
}

/// Single-signer signature, equivalent to a round with no other participants
pub fn sign(key: &PrivateKey, message: &[u8]) -> Result<Signature, SchnorrError> {
    let (nonce, _) = generate_commitment(key, message)?;
    Ok(partial_sign(key, nonce, message, &Point::identity()))
}

/// Sum of points; identity for an empty slice
pub fn combine_points(points: &[Point]) -> Point {
    Point(
        points
            .iter()
            .fold(RistrettoPoint::identity(), |acc, p| acc + p.0),
    )
}

/// Sum partial signatures that share the same `R`
pub fn combine_sigs(sigs: &[Signature]) -> Result<Signature, SchnorrError> {
    let first = sigs.first().ok_or(SchnorrError::Empty)?;
    let mut s = Scalar::ZERO;
    for sig in sigs {
        if sig.r != first.r {
            return Err(SchnorrError::CommitmentMismatch);
        }
        s += sig.s;
    }
    Ok(Signature { r: first.r, s })
}

/// Check `s·G == R + e·P`
pub fn verify(public_key: &PublicKey, message: &[u8], sig: &Signature) -> bool {
    let e = challenge(&sig.r, message);
    RISTRETTO_BASEPOINT_POINT * sig.s == sig.r.0 + public_key.0 * e
}
