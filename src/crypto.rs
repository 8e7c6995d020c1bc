use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::{Identity, VartimeMultiscalarMul};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, WalletError};

/// A 32-byte value read as a scalar or a compressed point depending on context.
pub type Key = [u8; 32];

/// All-zero key; the scalar zero.
pub const Z: Key = [0u8; 32];

/// The identity point, also the scalar one.
pub const I: Key = {
    let mut k = [0u8; 32];
    k[0] = 1;
    k
};

/// Compressed form of the amount generator `H`.
pub const H_BYTES: Key = [
    0x8b, 0x65, 0x59, 0x70, 0x15, 0x37, 0x99, 0xaf, 0x2a, 0xea, 0xdc, 0x9f, 0xf1, 0xad, 0xd0, 0xea,
    0x6c, 0x72, 0x51, 0xd5, 0x41, 0x54, 0xcf, 0xa9, 0x2c, 0x17, 0x3a, 0x0d, 0xd3, 0x9c, 0x1f, 0x94,
];

pub static H: Lazy<EdwardsPoint> = Lazy::new(|| {
    CompressedEdwardsY(H_BYTES)
        .decompress()
        .expect("H generator is a valid point")
});

/// `8⁻¹ mod ℓ`.
pub static INV_EIGHT: Lazy<Scalar> = Lazy::new(|| Scalar::from(8u64).invert());

// -----------------------------------------------------------------------------
// Hashing
// -----------------------------------------------------------------------------

/// cn_fast_hash: Keccak-256 with the original padding.
pub fn keccak256(data: &[u8]) -> Key {
    Keccak256::digest(data).into()
}

/// Keccak over the concatenation of several slices.
pub fn keccak256_parts(parts: &[&[u8]]) -> Key {
    let mut h = Keccak256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

pub fn sha256(data: &[u8]) -> Key {
    Sha256::digest(data).into()
}

/// `H_s(x) = keccak(x) mod ℓ`.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak256(data))
}

pub fn hash_to_scalar_parts(parts: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak256_parts(parts))
}

/// Keccak → Elligator → ×8, the CryptoNote `H_p`.
pub fn hash_to_point(key: &Key) -> EdwardsPoint {
    monero_generators::hash_to_point(*key)
}

// -----------------------------------------------------------------------------
// Encoding helpers
// -----------------------------------------------------------------------------

/// LEB128 varint as used in derivation hashes.
pub fn write_varint(mut v: u64, out: &mut Vec<u8>) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub fn varint(v: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    write_varint(v, &mut out);
    out
}

/// Returns the value and the number of bytes consumed.
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut v = 0u64;
    for (i, b) in buf.iter().enumerate().take(10) {
        v |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Some((v, i + 1));
        }
    }
    None
}

pub fn compress(p: &EdwardsPoint) -> Key {
    p.compress().to_bytes()
}

/// Strict point decode: the bytes must decompress and re-encode identically.
pub fn decompress(k: &Key) -> Result<EdwardsPoint> {
    let p = CompressedEdwardsY(*k).decompress().ok_or(WalletError::InvalidKey)?;
    if p.compress().to_bytes() != *k {
        return Err(WalletError::InvalidKey);
    }
    Ok(p)
}

/// True iff `k` is the canonical encoding of a curve point.
pub fn check_key(k: &Key) -> bool {
    decompress(k).is_ok()
}

/// sc_reduce32.
pub fn sc_reduce(k: &Key) -> Scalar {
    Scalar::from_bytes_mod_order(*k)
}

/// Accepts only fully reduced scalars.
pub fn sc_canonical(k: &Key) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*k))
}

pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

// -----------------------------------------------------------------------------
// Key arithmetic
// -----------------------------------------------------------------------------

pub fn sc_add(a: &Key, b: &Key) -> Key {
    (sc_reduce(a) + sc_reduce(b)).to_bytes()
}

pub fn sc_sub(a: &Key, b: &Key) -> Key {
    (sc_reduce(a) - sc_reduce(b)).to_bytes()
}

pub fn scalarmult_base(a: &Key) -> Key {
    compress(&(&sc_reduce(a) * ED25519_BASEPOINT_TABLE))
}

pub fn base_mul(a: &Scalar) -> EdwardsPoint {
    a * ED25519_BASEPOINT_TABLE
}

pub fn scalarmult_key(p: &Key, a: &Key) -> Result<Key> {
    Ok(compress(&(sc_reduce(a) * decompress(p)?)))
}

pub fn scalarmult8(p: &Key) -> Result<Key> {
    Ok(compress(&decompress(p)?.mul_by_cofactor()))
}

pub fn scalarmult_h(a: &Key) -> Key {
    compress(&(sc_reduce(a) * *H))
}

pub fn add_keys(a: &Key, b: &Key) -> Result<Key> {
    Ok(compress(&(decompress(a)? + decompress(b)?)))
}

pub fn sub_keys(a: &Key, b: &Key) -> Result<Key> {
    Ok(compress(&(decompress(a)? - decompress(b)?)))
}

pub fn add_key_v(keys: &[Key]) -> Result<Key> {
    let mut acc = EdwardsPoint::identity();
    for k in keys {
        acc += decompress(k)?;
    }
    Ok(compress(&acc))
}

/// `a·G + b·B`.
pub fn add_keys2(a: &Key, b: &Key, big_b: &Key) -> Result<Key> {
    Ok(compress(&(base_mul(&sc_reduce(a)) + sc_reduce(b) * decompress(big_b)?)))
}

/// Multiscalar product over decoded points, variable time (public data only).
pub fn multiexp(scalars: &[Scalar], points: &[EdwardsPoint]) -> EdwardsPoint {
    EdwardsPoint::vartime_multiscalar_mul(scalars.iter(), points.iter())
}

// -----------------------------------------------------------------------------
// Commitments
// -----------------------------------------------------------------------------

/// Committed amount as a little-endian scalar.
pub fn d2h(amount: u64) -> Key {
    let mut k = Z;
    k[..8].copy_from_slice(&amount.to_le_bytes());
    k
}

/// `G + amount·H`, the commitment of a public amount.
pub fn zero_commit(amount: u64) -> Key {
    compress(&(curve25519_dalek::constants::ED25519_BASEPOINT_POINT + Scalar::from(amount) * *H))
}

/// `mask·G + amount·H`.
pub fn gen_c(mask: &Key, amount: u64) -> Key {
    compress(&commit(&sc_reduce(mask), &Scalar::from(amount)))
}

pub fn commit(mask: &Scalar, amount: &Scalar) -> EdwardsPoint {
    base_mul(mask) + amount * *H
}

// -----------------------------------------------------------------------------
// Secrets
// -----------------------------------------------------------------------------

/// A secret scalar that is wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SecretKey(bytes)
    }

    pub fn from_scalar(s: &Scalar) -> Self {
        SecretKey(s.to_bytes())
    }

    pub fn random() -> Self {
        Self::from_scalar(&random_scalar())
    }

    pub fn as_bytes(&self) -> &Key {
        &self.0
    }

    pub fn scalar(&self) -> Scalar {
        sc_reduce(&self.0)
    }

    pub fn public_key(&self) -> Key {
        scalarmult_base(&self.0)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Parse a 64-char hex string into a key.
pub fn key_from_hex(s: &str) -> Result<Key> {
    let s = s.trim().trim_start_matches("0x");
    let bytes = hex::decode(s).map_err(|_| WalletError::InvalidKey)?;
    bytes.try_into().map_err(|_| WalletError::InvalidKey)
}
