//! Turns selected packets into signed transactions, and derives or checks
//! payment proofs for transactions the wallet sent.

use std::collections::HashSet;

use curve25519_dalek::scalar::Scalar;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{self, AccountAddress, ExternalAddress};
use crate::crypto::{self, Key, SecretKey};
use crate::envelope;
use crate::error::{Result, WalletError};
use crate::keys::{self, AccountKeys};
use crate::node::NodeClient;
use crate::rct::{self, CtKey, RctInput, RctOutput};
use crate::scanner::OwnedOutput;
use crate::selection::{Destination, MAX_TX_SIZE};
use crate::transaction::{self, AccountSigner, Input, Output, TokenId, Transaction, MAX_UTXO_OUT};

/// A real output with the ring it hides in. Offsets are absolute and sorted.
#[derive(Debug, Clone)]
pub struct Source {
    pub output: OwnedOutput,
    pub offsets: Vec<u64>,
    pub ring: Vec<CtKey>,
    pub real_index: usize,
}

/// Construction memo kept for each sent transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInfo {
    pub subaddrs: Vec<u32>,
    pub out_amount: u128,
    pub change_idx: u32,
}

/// A signed transaction and the secrets the wallet keeps for it.
pub struct BuiltTx {
    pub tx: Transaction,
    pub hash: Key,
    pub tx_key: SecretKey,
    pub add_info: AddInfo,
}

/// Who a payment proof is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Stealth(AccountAddress),
    Account(ExternalAddress),
}

impl Recipient {
    /// `0x…` selects an account recipient; anything else must be a base58 address.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with("0x") {
            return address::parse_external(s).map(Recipient::Account);
        }
        address::decode_address(s).map(|p| Recipient::Stealth(p.address))
    }
}

/// Draws `ring_size − 1` decoys for `real` from `[0, max_global]`, never
/// reusing an index in `used`. Returns the sorted ring and the real position.
pub fn draw_ring<R: Rng>(
    rng: &mut R,
    real: u64,
    ring_size: usize,
    max_global: u64,
    used: &mut HashSet<u64>,
) -> Result<(Vec<u64>, usize)> {
    used.insert(real);
    let available = max_global.saturating_add(1).saturating_sub(used.len() as u64);
    if available < (ring_size as u64).saturating_sub(1) {
        return Err(WalletError::NewUinFail("not enough outputs on chain for the ring".into()));
    }
    let mut ring = vec![real];
    while ring.len() < ring_size {
        let g = rng.gen_range(0..=max_global);
        if used.insert(g) {
            ring.push(g);
        }
    }
    ring.sort_unstable();
    let real_index = ring.binary_search(&real).map_err(|_| WalletError::Inner("real output left the ring".into()))?;
    Ok((ring, real_index))
}

/// Draws rings for `outputs` and fetches their members, `page` rings per
/// node call. The node's view of each real output must match ours.
pub async fn fetch_sources<N: NodeClient + ?Sized>(
    node: &N,
    token: TokenId,
    outputs: Vec<OwnedOutput>,
    ring_size: usize,
    max_global: u64,
    page: usize,
) -> Result<Vec<Source>> {
    let mut used: HashSet<u64> = outputs.iter().map(|o| o.global_index).collect();
    let mut drawn = Vec::with_capacity(outputs.len());
    {
        let mut rng = rand::thread_rng();
        for o in &outputs {
            drawn.push(draw_ring(&mut rng, o.global_index, ring_size, max_global, &mut used)?);
        }
    }

    let mut sources = Vec::with_capacity(outputs.len());
    let mut pending = outputs.into_iter().zip(drawn);
    loop {
        let chunk: Vec<_> = pending.by_ref().take(page.max(1)).collect();
        if chunk.is_empty() {
            break;
        }
        let indices: Vec<u64> = chunk.iter().flat_map(|(_, (ring, _))| ring.iter().copied()).collect();
        let members = node.get_outputs(token, indices).await?;
        let mut members = members.into_iter();
        for (output, (offsets, real_index)) in chunk {
            let ring: Vec<CtKey> = members.by_ref().take(offsets.len()).collect();
            let real = ring.get(real_index).ok_or(WalletError::OutputQueryMismatch)?;
            if real.dest != output.otaddr || real.mask != crypto::gen_c(&output.mask, output.amount) {
                return Err(WalletError::OutputQueryMismatch);
            }
            sources.push(Source { output, offsets, ring, real_index });
        }
    }
    debug!(inputs = sources.len(), ring_size, "rings assembled");
    Ok(sources)
}

/// `sha256(H_s(r ‖ varint(i)) ‖ to)`: the tag an account recipient proves against.
pub fn pay_tag(proof_key: &Key, to: &ExternalAddress) -> Key {
    crypto::sha256(&[&proof_key[..], &to[..]].concat())
}

fn account_proof_key(tx_key: &SecretKey, index: usize) -> Key {
    crypto::hash_to_scalar_parts(&[tx_key.as_bytes(), &crypto::varint(index as u64)]).to_bytes()
}

/// Outputs, their envelope inputs and the additional keys of a destination list.
struct OutputPlan {
    outputs: Vec<Output>,
    rct_outputs: Vec<RctOutput>,
    add_keys: Vec<Key>,
}

/// `tags_for_accounts` emits one additional key per destination (UTXO-input
/// txs); otherwise only stealth destinations get one.
fn plan_outputs(dests: &[Destination], tx_key: &SecretKey, tags_for_accounts: bool) -> Result<OutputPlan> {
    if dests.iter().filter(|d| !d.is_utxo()).count() > 1 {
        return Err(WalletError::TxTypeUnsupported);
    }
    if dests.iter().filter(|d| d.is_utxo()).count() > MAX_UTXO_OUT {
        return Err(WalletError::DestsOverLimit);
    }
    let mut plan = OutputPlan { outputs: Vec::new(), rct_outputs: Vec::new(), add_keys: Vec::new() };
    let mut j = 0u64;
    for (i, dest) in dests.iter().enumerate() {
        match dest {
            Destination::Utxo { address, amount, remark, .. } => {
                let derivation = keys::generate_key_derivation(&address.view_public, tx_key)?;
                let shared = keys::derivation_to_scalar(&derivation, j).to_bytes();
                let otaddr = keys::derive_public_key(&derivation, j, &address.spend_public)?;
                plan.add_keys.push(crypto::scalarmult_key(&address.spend_public, tx_key.as_bytes())?);
                plan.outputs.push(Output::Utxo { otaddr, remark: envelope::xor_remark(remark, &shared) });
                plan.rct_outputs.push(RctOutput { dest: otaddr, amount: envelope::to_commit_units(*amount)?, shared });
                j += 1;
            }
            Destination::Account { to, amount, data } => {
                let commit = transaction::account_output_commit(*amount)?;
                if tags_for_accounts {
                    plan.add_keys.push(pay_tag(&account_proof_key(tx_key, i), to));
                }
                plan.outputs.push(Output::Account { to: *to, amount: *amount, data: data.clone(), commit });
            }
        }
    }
    Ok(plan)
}

/// Spend secret of an owned output, re-derived from its tx public key.
fn output_secret(keys: &AccountKeys, o: &OwnedOutput) -> Result<SecretKey> {
    let derivation = keys::generate_key_derivation(&o.tx_pub_key, keys.view_secret())?;
    let base = keys.subaddress_spend_secret(o.sub_index);
    Ok(keys::derive_secret_key(&derivation, o.out_index, &base))
}

fn finish(tx: Transaction, tx_key: SecretKey, add_info: AddInfo) -> Result<BuiltTx> {
    let raw = tx.to_bytes()?;
    if raw.len() > MAX_TX_SIZE {
        return Err(WalletError::TxTooBig);
    }
    let hash = crypto::keccak256(&raw);
    debug!(tx = %hex::encode(hash), size = raw.len(), "transaction built");
    Ok(BuiltTx { tx, hash, tx_key, add_info })
}

/// Builds and signs a transaction spending `sources` to `dests`. The fee is
/// whatever the inputs carry beyond the destinations; `change_idx` is the
/// subaddress the change output pays back to.
pub fn build_utxo_tx(
    keys: &AccountKeys,
    token: TokenId,
    sources: &[Source],
    dests: &[Destination],
    extra: Vec<u8>,
    short_ecdh: bool,
    change_idx: u32,
) -> Result<BuiltTx> {
    if sources.is_empty() {
        return Err(WalletError::NewUinFail("no inputs".into()));
    }
    let in_total: u128 = sources.iter().map(|s| s.output.atomic_amount()).sum();
    let out_total: u128 = dests.iter().map(Destination::amount).sum();
    let fee = in_total.checked_sub(out_total).ok_or(WalletError::BalanceNotEnough)?;

    let tx_key = SecretKey::random();
    let plan = plan_outputs(dests, &tx_key, true)?;

    let inputs = sources
        .iter()
        .map(|s| {
            Ok(Input::Utxo {
                key_offsets: transaction::absolute_to_relative(&s.offsets)?,
                key_image: s.output.key_image,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let mut tx = Transaction {
        inputs,
        outputs: plan.outputs,
        token_id: token,
        r_key: tx_key.public_key(),
        add_keys: plan.add_keys,
        fee,
        extra,
        ..Default::default()
    };
    let message = tx.prefix_hash()?;
    let build = rct::gen_rct_outputs(&message, &plan.rct_outputs, envelope::to_commit_units(fee)?, short_ecdh)?;
    let mut rv = build.sig;
    let sum_masks: Scalar = build.out_masks.iter().sum();

    let inputs = sources
        .iter()
        .map(|s| {
            Ok(RctInput {
                ring: s.ring.clone(),
                real_index: s.real_index,
                secret: output_secret(keys, &s.output)?,
                mask: crypto::sc_reduce(&s.output.mask),
                amount: s.output.amount,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let images = rct::sign_inputs(&mut rv, &inputs, &sum_masks)?;
    for (img, s) in images.iter().zip(sources) {
        if img.0 != s.output.key_image {
            return Err(WalletError::UinTransSignFail("key image does not match the owned output".into()));
        }
    }
    tx.rct_sig = rv;

    let mut subaddrs: Vec<u32> = sources.iter().map(|s| s.output.sub_index).collect();
    subaddrs.sort_unstable();
    subaddrs.dedup();
    let add_info = AddInfo {
        subaddrs,
        out_amount: dests.iter().filter(|d| !d.is_change()).map(Destination::amount).sum(),
        change_idx,
    };
    finish(tx, tx_key, add_info)
}

/// Builds an account-input transaction. The account pays the destinations
/// plus the account fee of their sum; the signer authorises the prefix.
pub fn build_account_tx(
    signer: &dyn AccountSigner,
    nonce: u64,
    token: TokenId,
    dests: &[Destination],
    extra: Vec<u8>,
    short_ecdh: bool,
) -> Result<BuiltTx> {
    if !dests.iter().any(Destination::is_utxo) {
        return Err(WalletError::TxTypeUnsupported);
    }
    let out_total: u128 = dests.iter().map(Destination::amount).sum();
    let fee = crate::selection::account_fee(out_total);
    let amount = out_total.checked_add(fee).ok_or(WalletError::DestOverflow)?;

    let tx_key = SecretKey::random();
    let plan = plan_outputs(dests, &tx_key, false)?;
    let cf: Scalar = plan.rct_outputs.iter().map(|o| envelope::gen_commitment_mask(&o.shared)).sum();
    let commit = transaction::account_input_commit(&cf, amount).map_err(|_| WalletError::NewAinFail)?;

    let mut tx = Transaction {
        inputs: vec![Input::Account { nonce, amount, cf: cf.to_bytes(), commit }],
        outputs: plan.outputs,
        token_id: token,
        r_key: tx_key.public_key(),
        add_keys: plan.add_keys,
        fee,
        extra,
        ..Default::default()
    };
    let message = tx.prefix_hash()?;
    let build = rct::gen_rct_outputs(&message, &plan.rct_outputs, envelope::to_commit_units(fee)?, short_ecdh)?;
    tx.rct_sig = build.sig;
    tx.signature = signer.sign(&message)?;

    let add_info = AddInfo { subaddrs: Vec::new(), out_amount: out_total, change_idx: 0 };
    finish(tx, tx_key, add_info)
}

/// Proof that `tx` (built with `tx_key`) pays `recipient`.
pub fn get_proof_key(tx: &Transaction, tx_key: &SecretKey, recipient: &Recipient) -> Result<Key> {
    if tx.has_account_input() {
        return Err(WalletError::ProofNotNeeded);
    }
    match recipient {
        Recipient::Stealth(addr) => {
            let derivation = keys::generate_key_derivation(&addr.view_public, tx_key)?;
            for (j, otaddr, _) in tx.utxo_outputs() {
                if keys::derive_public_key(&derivation, j as u64, &addr.spend_public)? == *otaddr {
                    return Ok(derivation);
                }
            }
            Err(WalletError::NoTransInTx)
        }
        Recipient::Account(to) => tx
            .outputs
            .iter()
            .position(|o| matches!(o, Output::Account { to: t, .. } if t == to))
            .map(|i| account_proof_key(tx_key, i))
            .ok_or(WalletError::NoTransInTx),
    }
}

/// Checks a proof key and returns the atomic amount `tx` pays `recipient`.
pub fn check_proof_key(tx: &Transaction, recipient: &Recipient, key: &Key, short_ecdh: bool) -> Result<u128> {
    match recipient {
        Recipient::Stealth(addr) => {
            let mut total = 0u128;
            let mut found = false;
            for (j, otaddr, _) in tx.utxo_outputs() {
                if keys::derive_public_key(key, j as u64, &addr.spend_public)? != *otaddr {
                    continue;
                }
                let shared = keys::derivation_to_scalar(key, j as u64).to_bytes();
                let (ecdh, out_pk) = tx
                    .rct_sig
                    .base
                    .ecdh_info
                    .get(j)
                    .zip(tx.rct_sig.base.out_pk.get(j))
                    .ok_or_else(|| WalletError::TransInvalid("missing output envelope".into()))?;
                let (_, units) = envelope::decode_output(ecdh, out_pk, &shared, short_ecdh)?;
                total += envelope::from_commit_units(units);
                found = true;
            }
            if !found {
                return Err(WalletError::NoTransInTx);
            }
            Ok(total)
        }
        Recipient::Account(to) => {
            if !tx.add_keys.contains(&pay_tag(key, to)) {
                return Err(WalletError::NoTransInTx);
            }
            tx.outputs
                .iter()
                .find_map(|o| match o {
                    Output::Account { to: t, amount, .. } if t == to => Some(*amount),
                    _ => None,
                })
                .ok_or(WalletError::NoTransInTx)
        }
    }
}
