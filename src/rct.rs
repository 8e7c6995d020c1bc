//! RingCT signature structures, signing of the simple (bulletproof) variant
//! and its verification counterpart.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::{Identity, IsIdentity};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bulletproof;
use crate::crypto::{self, Key, SecretKey, H, INV_EIGHT};
use crate::envelope;
use crate::error::{Result, WalletError};
use crate::mlsag;
use crate::ringsig::{CryptoNoteRing, KeyImage, RingSignatureScheme, Signature};
use crate::tlv;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CtKey {
    pub dest: Key,
    pub mask: Key,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhTuple {
    pub mask: Key,
    pub amount: Key,
    pub sender_pk: Key,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoroSig {
    pub s0: Vec<Key>,
    pub s1: Vec<Key>,
    pub ee: Key,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSig {
    pub asig: BoroSig,
    pub ci: Vec<Key>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MgSig {
    pub ss: Vec<Vec<Key>>,
    pub cc: Key,
    pub ii: Vec<Key>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bulletproof {
    pub v: Vec<Key>,
    pub a: Key,
    pub s: Key,
    pub t1: Key,
    pub t2: Key,
    pub taux: Key,
    pub mu: Key,
    pub l: Vec<Key>,
    pub r: Vec<Key>,
    pub a_final: Key,
    pub b: Key,
    pub t: Key,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RctConfig {
    pub bp_version: i32,
    pub range_proof_type: u8,
}

/// Multisig nonce material; carried for wire compatibility only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigKLRki {
    pub k: Key,
    pub ki: Key,
    pub l: Key,
    pub r: Key,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RctType {
    #[default]
    Null = 0,
    Full = 1,
    Simple = 2,
    Bulletproof = 3,
    Bulletproof2 = 4,
}

impl TryFrom<u8> for RctType {
    type Error = WalletError;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => RctType::Null,
            1 => RctType::Full,
            2 => RctType::Simple,
            3 => RctType::Bulletproof,
            4 => RctType::Bulletproof2,
            other => return Err(WalletError::Tlv(format!("unknown rct type {other}"))),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RctSigBase {
    pub rct_type: RctType,
    pub message: Key,
    pub mix_ring: Vec<Vec<CtKey>>,
    pub pseudo_outs: Vec<Key>,
    pub ecdh_info: Vec<EcdhTuple>,
    pub out_pk: Vec<CtKey>,
    /// Fee in committed units.
    pub txn_fee: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RctSigPrunable {
    pub range_sigs: Vec<RangeSig>,
    pub bulletproofs: Vec<Bulletproof>,
    pub mgs: Vec<MgSig>,
    pub pseudo_outs: Vec<Key>,
    /// Ring signatures for single-member rings, one per input.
    pub ss: Vec<Signature>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RctSig {
    pub base: RctSigBase,
    pub prunable: RctSigPrunable,
}

/// `H(message ‖ H(base) ‖ H(proof fields) ‖ H(pseudo_outs))`.
pub fn get_pre_mlsag_hash(rv: &RctSig) -> Result<Key> {
    let base_hash = crypto::keccak256(&tlv::encode(&rv.base)?);

    let mut kv: Vec<u8> = Vec::new();
    for bp in &rv.prunable.bulletproofs {
        for k in [&bp.a, &bp.s, &bp.t1, &bp.t2, &bp.taux, &bp.mu] {
            kv.extend_from_slice(k);
        }
        for k in bp.l.iter().chain(&bp.r) {
            kv.extend_from_slice(k);
        }
        for k in [&bp.a_final, &bp.b, &bp.t] {
            kv.extend_from_slice(k);
        }
    }
    let proof_hash = crypto::keccak256(&kv);

    let pseudo: Vec<u8> = rv.prunable.pseudo_outs.iter().flatten().copied().collect();
    let pseudo_hash = crypto::keccak256(&pseudo);

    Ok(crypto::keccak256_parts(&[&rv.base.message, &base_hash, &proof_hash, &pseudo_hash]))
}

/// One spent output with its ring.
pub struct RctInput {
    pub ring: Vec<CtKey>,
    pub real_index: usize,
    pub secret: SecretKey,
    pub mask: Scalar,
    /// Committed units.
    pub amount: u64,
}

/// One stealth destination.
pub struct RctOutput {
    pub dest: Key,
    /// Committed units.
    pub amount: u64,
    /// Derivation scalar shared with the recipient.
    pub shared: Key,
}

/// Result of building the confidential part of a transaction.
pub struct RctBuild {
    pub sig: RctSig,
    pub out_masks: Vec<Scalar>,
}

/// Commitments, envelopes and the range proof for the stealth outputs.
/// Signatures are added by [`sign_inputs`] once the prefix is fixed.
pub fn gen_rct_outputs(message: &Key, outputs: &[RctOutput], fee: u64, short_ecdh: bool) -> Result<RctBuild> {
    let mut sig = RctSig::default();
    sig.base.rct_type = RctType::Bulletproof;
    sig.base.message = *message;
    sig.base.txn_fee = fee;

    let out_masks: Vec<Scalar> = outputs.iter().map(|o| envelope::gen_commitment_mask(&o.shared)).collect();
    if !outputs.is_empty() {
        let amounts: Vec<Key> = outputs.iter().map(|o| envelope::amount_to_key(o.amount)).collect();
        let mut bp = bulletproof::prove(&amounts, &out_masks, 64)?;
        for (i, o) in outputs.iter().enumerate() {
            let mask = crypto::compress(&(crypto::decompress(&bp.v[i])?.mul_by_cofactor()));
            sig.base.out_pk.push(CtKey { dest: o.dest, mask });
            let mut ecdh = EcdhTuple { mask: out_masks[i].to_bytes(), amount: amounts[i], sender_pk: crypto::Z };
            envelope::ecdh_encode(&mut ecdh, &o.shared, short_ecdh);
            sig.base.ecdh_info.push(ecdh);
        }
        bp.v.clear();
        sig.prunable.bulletproofs.push(bp);
    }
    Ok(RctBuild { sig, out_masks })
}

/// Pseudo-outputs and ring signatures for UTXO inputs. `sum_out_masks` is the
/// sum of all blinding factors on the output side.
pub fn sign_inputs(rv: &mut RctSig, inputs: &[RctInput], sum_out_masks: &Scalar) -> Result<Vec<KeyImage>> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }
    let short_ring = inputs[0].ring.len() == 1;
    if inputs.iter().any(|i| (i.ring.len() == 1) != short_ring) {
        return Err(WalletError::UinTransSignFail("mixed ring sizes".into()));
    }

    rv.base.mix_ring = inputs.iter().map(|i| i.ring.clone()).collect();
    let mut pseudo_masks = Vec::with_capacity(inputs.len());
    let mut acc = Scalar::ZERO;
    for _ in 0..inputs.len() - 1 {
        let a = crypto::random_scalar();
        acc += a;
        pseudo_masks.push(a);
    }
    pseudo_masks.push(sum_out_masks - acc);
    rv.prunable.pseudo_outs = inputs
        .iter()
        .zip(&pseudo_masks)
        .map(|(i, a)| crypto::compress(&crypto::commit(a, &Scalar::from(i.amount))))
        .collect();

    let hash = get_pre_mlsag_hash(rv)?;
    let mut images = Vec::with_capacity(inputs.len());
    if short_ring {
        for input in inputs {
            let (sig, image) = CryptoNoteRing.sign(&hash, &[input.ring[0].dest], &input.secret, 0)?;
            rv.prunable.ss.extend(sig);
            images.push(image);
        }
        return Ok(images);
    }

    let pseudo_outs = rv.prunable.pseudo_outs.clone();
    let mgs: Vec<MgSig> = inputs
        .par_iter()
        .zip(pseudo_masks.par_iter())
        .zip(pseudo_outs.par_iter())
        .map(|((input, a), pseudo)| {
            mlsag::prove_rct_mg_simple(&hash, &input.ring, &input.secret, &input.mask, a, pseudo, input.real_index)
        })
        .collect::<Result<_>>()?;
    for mg in &mgs {
        let ii = mg.ii.first().ok_or_else(|| WalletError::UinTransSignFail("missing key image".into()))?;
        images.push(KeyImage(*ii));
    }
    rv.prunable.mgs = mgs;
    debug!(inputs = inputs.len(), "signed utxo inputs");
    Ok(images)
}

/// Checks everything that does not need chain state: range proofs, ring
/// signatures against the embedded rings, and the commitment balance.
/// `extra_in` / `extra_out` are the plaintext-account commitments.
pub fn ver_rct_simple(rv: &RctSig, key_images: &[KeyImage], extra_in: &[Key], extra_out: &[Key]) -> Result<()> {
    if rv.base.rct_type != RctType::Bulletproof {
        return Err(WalletError::TransInvalid("unsupported rct type".into()));
    }
    let n_out = rv.base.out_pk.len();
    if rv.base.ecdh_info.len() != n_out {
        return Err(WalletError::TransInvalid("ecdh/outPk size mismatch".into()));
    }

    // range proofs, with V restored from the output commitments
    let mut restored: Vec<Bulletproof> = Vec::with_capacity(rv.prunable.bulletproofs.len());
    let mut offset = 0usize;
    for bp in &rv.prunable.bulletproofs {
        let log_total = bp.l.len();
        let count = (0..=bulletproof::MAX_OUTPUTS)
            .rev()
            .find(|c| {
                *c > 0
                    && offset + c <= n_out
                    && c.next_power_of_two().trailing_zeros() as usize + 6 == log_total
            })
            .ok_or_else(|| WalletError::TransInvalid("bulletproof size mismatch".into()))?;
        let mut full = bp.clone();
        full.v = rv.base.out_pk[offset..offset + count]
            .iter()
            .map(|c| crypto::decompress(&c.mask).map(|p| crypto::compress(&(p * *INV_EIGHT))))
            .collect::<Result<_>>()?;
        offset += count;
        restored.push(full);
    }
    if offset != n_out {
        return Err(WalletError::TransInvalid("outputs without range proof".into()));
    }
    let refs: Vec<&Bulletproof> = restored.iter().collect();
    if !bulletproof::verify(&refs) {
        return Err(WalletError::TransInvalid("bulletproof verification failed".into()));
    }

    // balance
    let mut lhs = EdwardsPoint::identity();
    for k in rv.prunable.pseudo_outs.iter().chain(extra_in) {
        lhs += crypto::decompress(k)?;
    }
    let mut rhs = Scalar::from(rv.base.txn_fee) * *H;
    for k in rv.base.out_pk.iter().map(|c| &c.mask).chain(extra_out) {
        rhs += crypto::decompress(k)?;
    }
    if !(lhs - rhs).is_identity() {
        return Err(WalletError::TransInvalid("commitment balance".into()));
    }

    // ring signatures
    let n_in = key_images.len();
    if rv.base.mix_ring.len() != n_in || rv.prunable.pseudo_outs.len() != n_in {
        return Err(WalletError::TransInvalid("input count mismatch".into()));
    }
    if n_in == 0 {
        return Ok(());
    }
    let hash = get_pre_mlsag_hash(rv)?;
    let short_ring = rv.base.mix_ring[0].len() == 1;
    if rv.base.mix_ring.iter().any(|r| (r.len() == 1) != short_ring || r.is_empty()) {
        return Err(WalletError::TransInvalid("mixed ring sizes".into()));
    }
    let ok = if short_ring {
        rv.prunable.ss.len() == n_in
            && (0..n_in).into_par_iter().all(|i| {
                CryptoNoteRing.verify(
                    &hash,
                    &[rv.base.mix_ring[i][0].dest],
                    &rv.prunable.ss[i..i + 1].to_vec(),
                    &key_images[i],
                )
            })
    } else {
        rv.prunable.mgs.len() == n_in
            && (0..n_in).into_par_iter().all(|i| {
                let mg = &rv.prunable.mgs[i];
                mg.ii.first() == Some(&key_images[i].0)
                    && mlsag::ver_rct_mg_simple(&hash, mg, &rv.base.mix_ring[i], &rv.prunable.pseudo_outs[i])
            })
    };
    if !ok {
        return Err(WalletError::TransInvalid("ring signature verification failed".into()));
    }
    Ok(())
}
