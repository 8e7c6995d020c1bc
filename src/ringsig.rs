use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, Key, SecretKey};
use crate::error::{Result, WalletError};

/// Linking tag of a ring signature: the signer's key image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyImage(pub Key);

/// One `(c, r)` pair per ring member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub c: Key,
    pub r: Key,
}

pub trait RingSignatureScheme {
    type Sig;

    fn sign(&self, message: &Key, ring: &[Key], secret: &SecretKey, index: usize) -> Result<(Self::Sig, KeyImage)>;

    fn verify(&self, message: &Key, ring: &[Key], signature: &Self::Sig, image: &KeyImage) -> bool;
}

/// The original CryptoNote (non-linkable-matrix) ring signature, used for
/// single-member rings.
pub struct CryptoNoteRing;

impl RingSignatureScheme for CryptoNoteRing {
    type Sig = Vec<Signature>;

    fn sign(&self, message: &Key, ring: &[Key], secret: &SecretKey, index: usize) -> Result<(Vec<Signature>, KeyImage)> {
        let real = ring
            .get(index)
            .ok_or_else(|| WalletError::ArgsInvalid("ring index out of range".into()))?;
        let image = KeyImage(crate::keys::generate_key_image(real, secret));
        let sig = generate_ring_signature(message, &image, ring, secret, index)?;
        Ok((sig, image))
    }

    fn verify(&self, message: &Key, ring: &[Key], signature: &Vec<Signature>, image: &KeyImage) -> bool {
        check_ring_signature(message, image, ring, signature)
    }
}

/// True iff `p` lies in the prime-order subgroup.
pub(crate) fn in_prime_subgroup(p: &EdwardsPoint) -> bool {
    p.is_torsion_free()
}

pub fn generate_ring_signature(
    prefix_hash: &Key,
    image: &KeyImage,
    pubs: &[Key],
    secret: &SecretKey,
    index: usize,
) -> Result<Vec<Signature>> {
    if index >= pubs.len() {
        return Err(WalletError::ArgsInvalid("ring index out of range".into()));
    }
    let image_pt = crypto::decompress(&image.0)?;
    let mut sig = vec![Signature::default(); pubs.len()];
    let mut buf: Vec<u8> = Vec::with_capacity(32 + 64 * pubs.len());
    buf.extend_from_slice(prefix_hash);

    let mut sum = Scalar::ZERO;
    let k = crypto::random_scalar();
    for (i, pk) in pubs.iter().enumerate() {
        let p = crypto::decompress(pk)?;
        let hp = crypto::hash_to_point(pk);
        if i == index {
            buf.extend_from_slice(&crypto::compress(&crypto::base_mul(&k)));
            buf.extend_from_slice(&crypto::compress(&(k * hp)));
        } else {
            let c = crypto::random_scalar();
            let r = crypto::random_scalar();
            let l = crypto::multiexp(&[c, r], &[p, curve25519_dalek::constants::ED25519_BASEPOINT_POINT]);
            let rr = crypto::multiexp(&[r, c], &[hp, image_pt]);
            buf.extend_from_slice(&crypto::compress(&l));
            buf.extend_from_slice(&crypto::compress(&rr));
            sum += c;
            sig[i] = Signature { c: c.to_bytes(), r: r.to_bytes() };
        }
    }
    let h = crypto::hash_to_scalar(&buf);
    let c = h - sum;
    let r = k - c * secret.scalar();
    sig[index] = Signature { c: c.to_bytes(), r: r.to_bytes() };
    Ok(sig)
}

pub fn check_ring_signature(prefix_hash: &Key, image: &KeyImage, pubs: &[Key], sig: &[Signature]) -> bool {
    if pubs.is_empty() || pubs.len() != sig.len() {
        return false;
    }
    let image_pt = match crypto::decompress(&image.0) {
        Ok(p) if in_prime_subgroup(&p) && !p.is_identity() => p,
        _ => return false,
    };
    let mut buf: Vec<u8> = Vec::with_capacity(32 + 64 * pubs.len());
    buf.extend_from_slice(prefix_hash);
    let mut sum = Scalar::ZERO;
    for (pk, s) in pubs.iter().zip(sig) {
        let (Some(c), Some(r)) = (crypto::sc_canonical(&s.c), crypto::sc_canonical(&s.r)) else {
            return false;
        };
        let Ok(p) = crypto::decompress(pk) else {
            return false;
        };
        let hp = crypto::hash_to_point(pk);
        let l = crypto::multiexp(&[c, r], &[p, curve25519_dalek::constants::ED25519_BASEPOINT_POINT]);
        let rr = crypto::multiexp(&[r, c], &[hp, image_pt]);
        buf.extend_from_slice(&crypto::compress(&l));
        buf.extend_from_slice(&crypto::compress(&rr));
        sum += c;
    }
    crypto::hash_to_scalar(&buf) - sum == Scalar::ZERO
}
