//! Multilayered linkable spontaneous anonymous group signatures, in the
//! "simple" RingCT arrangement: one linkable row (the one-time address) and
//! one commitment row per ring member.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use zeroize::Zeroizing;

use crate::crypto::{self, Key, SecretKey};
use crate::error::{Result, WalletError};
use crate::rct::{CtKey, MgSig};
use crate::ringsig::in_prime_subgroup;

/// Sign `message` with ring matrix `pk` (columns are ring members, each a
/// vector of `rows` keys). Only the first `ds_rows` rows produce key images.
pub fn mlsag_gen(message: &Key, pk: &[Vec<Key>], xx: &[SecretKey], index: usize, ds_rows: usize) -> Result<MgSig> {
    let cols = pk.len();
    if cols < 1 || index >= cols {
        return Err(WalletError::ArgsInvalid("mlsag: bad ring".into()));
    }
    let rows = pk[0].len();
    if rows == 0 || ds_rows > rows || xx.len() != rows || pk.iter().any(|c| c.len() != rows) {
        return Err(WalletError::ArgsInvalid("mlsag: bad matrix".into()));
    }

    let mut ss = vec![vec![[0u8; 32]; rows]; cols];
    let mut ii = Vec::with_capacity(ds_rows);
    let mut ii_pts = Vec::with_capacity(ds_rows);
    let alpha: Zeroizing<Vec<Scalar>> = Zeroizing::new((0..rows).map(|_| crypto::random_scalar()).collect());

    let mut to_hash: Vec<Key> = Vec::with_capacity(1 + 3 * ds_rows + 2 * (rows - ds_rows));
    to_hash.push(*message);
    for j in 0..ds_rows {
        let hi = crypto::hash_to_point(&pk[index][j]);
        let image = xx[j].scalar() * hi;
        to_hash.push(pk[index][j]);
        to_hash.push(crypto::compress(&crypto::base_mul(&alpha[j])));
        to_hash.push(crypto::compress(&(alpha[j] * hi)));
        ii.push(crypto::compress(&image));
        ii_pts.push(image);
    }
    for j in ds_rows..rows {
        to_hash.push(pk[index][j]);
        to_hash.push(crypto::compress(&crypto::base_mul(&alpha[j])));
    }

    let mut c_old = hash_keys(&to_hash);
    let mut cc = Scalar::ZERO;
    let mut i = (index + 1) % cols;
    if i == 0 {
        cc = c_old;
    }
    while i != index {
        for j in 0..rows {
            ss[i][j] = crypto::random_scalar().to_bytes();
        }
        c_old = round_hash(message, &pk[i], &ss[i], &c_old, &ii_pts, ds_rows)?;
        i = (i + 1) % cols;
        if i == 0 {
            cc = c_old;
        }
    }
    for j in 0..rows {
        ss[index][j] = (alpha[j] - c_old * xx[j].scalar()).to_bytes();
    }
    Ok(MgSig { ss, cc: cc.to_bytes(), ii })
}

fn hash_keys(keys: &[Key]) -> Scalar {
    let parts: Vec<&[u8]> = keys.iter().map(|k| &k[..]).collect();
    crypto::hash_to_scalar_parts(&parts)
}

fn round_hash(
    message: &Key,
    column: &[Key],
    ss: &[Key],
    c: &Scalar,
    images: &[EdwardsPoint],
    ds_rows: usize,
) -> Result<Scalar> {
    let mut to_hash: Vec<Key> = Vec::with_capacity(1 + 3 * column.len());
    to_hash.push(*message);
    for (j, key) in column.iter().enumerate() {
        let s = crypto::sc_reduce(&ss[j]);
        let p = crypto::decompress(key)?;
        let l = crypto::multiexp(&[s, *c], &[ED25519_BASEPOINT_POINT, p]);
        to_hash.push(*key);
        to_hash.push(crypto::compress(&l));
        if j < ds_rows {
            let hp = crypto::hash_to_point(key);
            let r = crypto::multiexp(&[s, *c], &[hp, images[j]]);
            to_hash.push(crypto::compress(&r));
        }
    }
    Ok(hash_keys(&to_hash))
}

pub fn mlsag_ver(message: &Key, pk: &[Vec<Key>], sig: &MgSig, ds_rows: usize) -> bool {
    let cols = pk.len();
    if cols == 0 || sig.ss.len() != cols {
        return false;
    }
    let rows = pk[0].len();
    if rows == 0 || ds_rows > rows || sig.ii.len() != ds_rows {
        return false;
    }
    if pk.iter().any(|c| c.len() != rows) || sig.ss.iter().any(|c| c.len() != rows) {
        return false;
    }
    if sig.ss.iter().flatten().any(|s| crypto::sc_canonical(s).is_none()) {
        return false;
    }
    let Some(cc) = crypto::sc_canonical(&sig.cc) else {
        return false;
    };
    let mut images = Vec::with_capacity(ds_rows);
    for k in &sig.ii {
        match crypto::decompress(k) {
            Ok(p) if in_prime_subgroup(&p) && !p.is_identity() => images.push(p),
            _ => return false,
        }
    }
    let mut c_old = cc;
    for i in 0..cols {
        match round_hash(message, &pk[i], &sig.ss[i], &c_old, &images, ds_rows) {
            Ok(c) => c_old = c,
            Err(_) => return false,
        }
    }
    c_old == cc
}

/// Simple-variant signature for one input: rows are `[P_j, C_j − pseudo_out]`,
/// secrets `[x, mask − pseudo_mask]`.
pub fn prove_rct_mg_simple(
    message: &Key,
    pubs: &[CtKey],
    secret: &SecretKey,
    in_mask: &Scalar,
    pseudo_mask: &Scalar,
    pseudo_out: &Key,
    index: usize,
) -> Result<MgSig> {
    let pseudo = crypto::decompress(pseudo_out)?;
    let mut matrix = Vec::with_capacity(pubs.len());
    for member in pubs {
        let c = crypto::decompress(&member.mask)?;
        matrix.push(vec![member.dest, crypto::compress(&(c - pseudo))]);
    }
    let sk = [secret.clone(), SecretKey::from_scalar(&(in_mask - pseudo_mask))];
    mlsag_gen(message, &matrix, &sk, index, 1)
}

pub fn ver_rct_mg_simple(message: &Key, sig: &MgSig, pubs: &[CtKey], pseudo_out: &Key) -> bool {
    let Ok(pseudo) = crypto::decompress(pseudo_out) else {
        return false;
    };
    let mut matrix = Vec::with_capacity(pubs.len());
    for member in pubs {
        let Ok(c) = crypto::decompress(&member.mask) else {
            return false;
        };
        matrix.push(vec![member.dest, crypto::compress(&(c - pseudo))]);
    }
    mlsag_ver(message, &matrix, sig, 1)
}
