//! Pedersen commitments, amount scaling and the ECDH amount envelope.

use curve25519_dalek::scalar::Scalar;

use crate::crypto::{self, Key, Z};
use crate::error::{Result, WalletError};
use crate::rct::{CtKey, EcdhTuple};

/// Atomic units per committed unit of the native token.
pub const CHANGE_RATE: u128 = 10_000_000_000;

/// Atomic amount → committed units. The amount must be a multiple of the rate.
pub fn to_commit_units(atomic: u128) -> Result<u64> {
    if atomic % CHANGE_RATE != 0 {
        return Err(WalletError::OutputAmountInvalid);
    }
    u64::try_from(atomic / CHANGE_RATE).map_err(|_| WalletError::OutputAmountOverflow)
}

pub fn from_commit_units(units: u64) -> u128 {
    u128::from(units) * CHANGE_RATE
}

pub fn amount_to_key(units: u64) -> Key {
    crypto::d2h(units)
}

/// Inverse of [`amount_to_key`]; anything past the low eight bytes overflows.
pub fn key_to_amount(k: &Key) -> Result<u64> {
    if k[8..].iter().any(|b| *b != 0) {
        return Err(WalletError::OutputAmountOverflow);
    }
    let mut le = [0u8; 8];
    le.copy_from_slice(&k[..8]);
    Ok(u64::from_le_bytes(le))
}

/// `H_s("commitment_mask" ‖ s)`.
pub fn gen_commitment_mask(shared: &Key) -> Scalar {
    crypto::hash_to_scalar_parts(&[b"commitment_mask", shared])
}

fn short_amount_pad(shared: &Key) -> [u8; 8] {
    let h = crypto::keccak256_parts(&[b"amount", shared]);
    let mut pad = [0u8; 8];
    pad.copy_from_slice(&h[..8]);
    pad
}

/// Encrypt `(mask, amount)` in place with the output's shared scalar.
pub fn ecdh_encode(tuple: &mut EcdhTuple, shared: &Key, short: bool) {
    if short {
        tuple.mask = Z;
        let pad = short_amount_pad(shared);
        let mut amount = Z;
        for i in 0..8 {
            amount[i] = tuple.amount[i] ^ pad[i];
        }
        tuple.amount = amount;
        return;
    }
    let s1 = crypto::hash_to_scalar(shared);
    let s2 = crypto::hash_to_scalar(&s1.to_bytes());
    tuple.mask = (crypto::sc_reduce(&tuple.mask) + s1).to_bytes();
    tuple.amount = (crypto::sc_reduce(&tuple.amount) + s2).to_bytes();
}

/// Inverse of [`ecdh_encode`].
pub fn ecdh_decode(tuple: &mut EcdhTuple, shared: &Key, short: bool) {
    if short {
        tuple.mask = gen_commitment_mask(shared).to_bytes();
        let pad = short_amount_pad(shared);
        let mut amount = Z;
        for i in 0..8 {
            amount[i] = tuple.amount[i] ^ pad[i];
        }
        tuple.amount = amount;
        return;
    }
    let s1 = crypto::hash_to_scalar(shared);
    let s2 = crypto::hash_to_scalar(&s1.to_bytes());
    tuple.mask = (crypto::sc_reduce(&tuple.mask) - s1).to_bytes();
    tuple.amount = (crypto::sc_reduce(&tuple.amount) - s2).to_bytes();
}

/// Decode an output's envelope and check `mask·G + amount·H == out_pk.mask`.
/// Returns the blinding mask and the committed amount.
pub fn decode_output(ecdh: &EcdhTuple, out_pk: &CtKey, shared: &Key, short: bool) -> Result<(Key, u64)> {
    let mut t = ecdh.clone();
    ecdh_decode(&mut t, shared, short);
    let amount = key_to_amount(&t.amount)
        .map_err(|_| WalletError::TransInvalid("decoded amount out of range".into()))?;
    if crypto::gen_c(&t.mask, amount) != out_pk.mask {
        return Err(WalletError::TransInvalid("commitment mismatch".into()));
    }
    Ok((t.mask, amount))
}

/// XOR pad for output remarks.
pub fn remark_pad(shared: &Key) -> Key {
    crypto::sha256(shared)
}

pub fn xor_remark(remark: &Key, shared: &Key) -> Key {
    let pad = remark_pad(shared);
    let mut out = Z;
    for i in 0..32 {
        out[i] = remark[i] ^ pad[i];
    }
    out
}
