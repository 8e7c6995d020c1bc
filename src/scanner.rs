//! Block scanning: recognises stealth outputs paid to any known subaddress,
//! tracks spends by key image and keeps the per-token global index counters.
//!
//! Scanning a block is a pure function of `(block, keys, state)` and yields a
//! [`BlockDelta`]; the wallet persists the delta and only then applies it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::{self, ExternalAddress};
use crate::crypto::{self, Key};
use crate::envelope;
use crate::error::Result;
use crate::keys::{self, AccountKeys, SubaddressTable};
use crate::node::Block;
use crate::transaction::{Output, TokenId};

/// A stealth output owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedOutput {
    pub global_index: u64,
    pub height: u64,
    pub tx_hash: Key,
    pub out_index: u64,
    pub token: TokenId,
    pub sub_index: u32,
    pub otaddr: Key,
    /// The tx public key (`R` or an additional key) the output was derived from.
    pub tx_pub_key: Key,
    pub key_image: Key,
    pub mask: Key,
    /// Committed units.
    pub amount: u64,
    pub remark: Key,
    pub spent: bool,
    pub frozen: bool,
    /// Height the spend was seen at; 0 while only spent by a local transaction.
    pub spent_height: u64,
}

impl OwnedOutput {
    pub fn atomic_amount(&self) -> u128 {
        envelope::from_commit_units(self.amount)
    }

    pub fn is_spendable(&self) -> bool {
        !self.spent && !self.frozen
    }
}

/// What a wallet-relevant transaction did to the wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxView {
    pub hash: Key,
    pub token: TokenId,
    /// Atomic units received on stealth or account outputs.
    pub received: u128,
    pub outputs_found: u32,
    pub outputs_spent: u32,
    pub account_in: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: Key,
    pub timestamp: u64,
    /// Global index counters before this block, for rewinding.
    pub g_out_start: BTreeMap<String, u64>,
    pub txs: Vec<TxView>,
}

/// Changes produced by scanning one block.
#[derive(Debug, Clone, Default)]
pub struct BlockDelta {
    pub height: u64,
    pub found: Vec<OwnedOutput>,
    /// Indices into [`ScanState::transfers`] spent in this block.
    pub spent: Vec<usize>,
    pub g_out_index: BTreeMap<String, u64>,
    /// Raw encodings of transactions touching the wallet.
    pub txs: Vec<(Key, Vec<u8>)>,
    pub summary: BlockSummary,
}

impl BlockDelta {
    pub fn is_empty(&self) -> bool {
        self.found.is_empty() && self.spent.is_empty() && self.txs.is_empty()
    }
}

/// Keys and switches the scanner needs.
pub struct ScanContext<'a> {
    pub keys: &'a AccountKeys,
    pub table: &'a SubaddressTable,
    pub external: ExternalAddress,
    pub short_ecdh: bool,
}

fn token_key(token: &TokenId) -> String {
    address::external_to_string(token)
}

/// In-memory view of the owned-output store.
#[derive(Debug, Clone, Default)]
pub struct ScanState {
    /// Next height to scan.
    pub local_height: u64,
    /// Next global index per token (the number of outputs seen so far).
    pub g_out_index: BTreeMap<String, u64>,
    pub transfers: Vec<OwnedOutput>,
    key_images: HashMap<Key, usize>,
    balances: HashMap<(u32, TokenId), u64>,
}

impl ScanState {
    pub fn from_parts(local_height: u64, g_out_index: BTreeMap<String, u64>, transfers: Vec<OwnedOutput>) -> Self {
        let mut state = ScanState { local_height, g_out_index, ..Default::default() };
        for t in transfers {
            state.insert(t);
        }
        state
    }

    fn insert(&mut self, t: OwnedOutput) {
        if t.is_spendable() {
            *self.balances.entry((t.sub_index, t.token)).or_default() += t.amount;
        }
        self.key_images.insert(t.key_image, self.transfers.len());
        self.transfers.push(t);
    }

    pub fn next_global_index(&self, token: &TokenId) -> u64 {
        self.g_out_index.get(&token_key(token)).copied().unwrap_or(0)
    }

    /// Highest assigned global index, if the token has any outputs.
    pub fn max_global_index(&self, token: &TokenId) -> Option<u64> {
        self.next_global_index(token).checked_sub(1)
    }

    pub fn find_key_image(&self, key_image: &Key) -> Option<usize> {
        self.key_images.get(key_image).copied()
    }

    /// Unspent committed units held by `sub_index` in `token`.
    pub fn balance(&self, sub_index: u32, token: &TokenId) -> u64 {
        self.balances.get(&(sub_index, *token)).copied().unwrap_or(0)
    }

    pub fn total_balance(&self, token: &TokenId) -> u128 {
        self.balances
            .iter()
            .filter(|((_, t), _)| t == token)
            .map(|(_, v)| u128::from(*v))
            .sum()
    }

    pub fn balances(&self) -> impl Iterator<Item = (u32, TokenId, u64)> + '_ {
        self.balances.iter().map(|((s, t), v)| (*s, *t, *v))
    }

    /// Spendable outputs of `token`, optionally limited to some subaddresses.
    pub fn unspent(&self, token: &TokenId, subaddrs: &[u32]) -> Vec<(usize, &OwnedOutput)> {
        self.transfers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_spendable() && t.token == *token)
            .filter(|(_, t)| subaddrs.is_empty() || subaddrs.contains(&t.sub_index))
            .collect()
    }

    /// Records a delta writes: `(transfer index, record)`.
    pub fn staged_records(&self, delta: &BlockDelta) -> Vec<(usize, OwnedOutput)> {
        let mut out = Vec::with_capacity(delta.spent.len() + delta.found.len());
        for &idx in &delta.spent {
            if let Some(t) = self.transfers.get(idx) {
                let mut t = t.clone();
                t.spent = true;
                t.spent_height = delta.height;
                out.push((idx, t));
            }
        }
        let base = self.transfers.len();
        out.extend(delta.found.iter().cloned().enumerate().map(|(i, t)| (base + i, t)));
        out
    }

    pub fn apply(&mut self, delta: BlockDelta) {
        for idx in delta.spent {
            self.mark_spent(idx, delta.height);
        }
        for t in delta.found {
            self.insert(t);
        }
        self.g_out_index = delta.g_out_index;
        self.local_height = delta.height + 1;
    }

    pub fn mark_spent(&mut self, idx: usize, height: u64) {
        let Some(t) = self.transfers.get_mut(idx) else {
            return;
        };
        if t.spent {
            if t.spent_height == 0 {
                t.spent_height = height;
            }
            return;
        }
        if !t.frozen {
            if let Some(b) = self.balances.get_mut(&(t.sub_index, t.token)) {
                *b = b.saturating_sub(t.amount);
            }
        }
        t.spent = true;
        t.spent_height = height;
    }

    /// Drop everything learned at `height` and above. Returns the indices of
    /// outputs whose spent flag was cleared.
    pub fn rewind(&mut self, height: u64, g_out_start: BTreeMap<String, u64>) -> Vec<usize> {
        let keep = self.transfers.iter().take_while(|t| t.height < height).count();
        let kept: Vec<OwnedOutput> = self.transfers.drain(..keep).collect();
        let mut unspent = Vec::new();
        let mut rebuilt = ScanState { local_height: height, g_out_index: g_out_start, ..Default::default() };
        for (i, mut t) in kept.into_iter().enumerate() {
            if t.spent && t.spent_height >= height {
                t.spent = false;
                t.spent_height = 0;
                unspent.push(i);
            }
            rebuilt.insert(t);
        }
        *self = rebuilt;
        unspent
    }
}

/// Derivations to try for a transaction: `8·a·R` and one per additional key
/// that is a valid point, each with the public key it came from.
fn tx_derivations(r_key: &Key, add_keys: &[Key], ctx: &ScanContext<'_>) -> (Vec<Key>, Vec<Key>) {
    std::iter::once(r_key)
        .chain(add_keys)
        .filter(|k| crypto::check_key(k))
        .filter_map(|k| keys::generate_key_derivation(k, ctx.keys.view_secret()).ok().map(|d| (*k, d)))
        .unzip()
}

pub fn scan_block(block: &Block, ctx: &ScanContext<'_>, state: &ScanState) -> Result<BlockDelta> {
    let mut delta = BlockDelta {
        height: block.height,
        g_out_index: state.g_out_index.clone(),
        summary: BlockSummary {
            height: block.height,
            hash: block.hash,
            timestamp: block.timestamp,
            g_out_start: state.g_out_index.clone(),
            txs: Vec::new(),
        },
        ..Default::default()
    };
    let mut found_images: HashMap<Key, usize> = HashMap::new();

    for btx in &block.txs {
        let tx = &btx.tx;
        let mut view = TxView { hash: btx.hash, token: tx.token_id, ..Default::default() };
        let mut touched = false;

        for (_, key_image) in tx.utxo_inputs() {
            if let Some(idx) = state.find_key_image(key_image) {
                let t = &state.transfers[idx];
                if (!t.spent || t.spent_height == 0) && !delta.spent.contains(&idx) {
                    delta.spent.push(idx);
                }
                view.outputs_spent += 1;
                touched = true;
            } else if let Some(&i) = found_images.get(key_image) {
                delta.found[i].spent = true;
                delta.found[i].spent_height = block.height;
                view.outputs_spent += 1;
                touched = true;
            }
        }
        if tx.has_account_input() && btx.from == Some(ctx.external) {
            view.account_in = true;
            touched = true;
        }

        let key = token_key(&tx.token_id);
        let (tx_keys, derivations) = tx_derivations(&tx.r_key, &tx.add_keys, ctx);
        for (j, otaddr, remark) in tx.utxo_outputs() {
            let counter = delta.g_out_index.entry(key.clone()).or_insert(0);
            let global_index = *counter;
            *counter += 1;

            let Some((k, sub_index)) = ctx.table.recognize(otaddr, &derivations, j as u64) else {
                continue;
            };
            let (Some(ecdh), Some(out_pk)) = (tx.rct_sig.base.ecdh_info.get(j), tx.rct_sig.base.out_pk.get(j)) else {
                warn!(tx = %hex::encode(btx.hash), out = j, "owned output without envelope");
                continue;
            };
            let derivation = &derivations[k];
            let shared = keys::derivation_to_scalar(derivation, j as u64).to_bytes();
            let (mask, amount) = match envelope::decode_output(ecdh, out_pk, &shared, ctx.short_ecdh) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tx = %hex::encode(btx.hash), out = j, "rejecting output: {e}");
                    continue;
                }
            };
            let base = ctx.keys.subaddress_spend_secret(sub_index);
            let secret = keys::derive_secret_key(derivation, j as u64, &base);
            let key_image = keys::generate_key_image(otaddr, &secret);
            if state.find_key_image(&key_image).is_some() || found_images.contains_key(&key_image) {
                warn!(key_image = %hex::encode(key_image), "key image already known, skipping output");
                continue;
            }

            found_images.insert(key_image, delta.found.len());
            delta.found.push(OwnedOutput {
                global_index,
                height: block.height,
                tx_hash: btx.hash,
                out_index: j as u64,
                token: tx.token_id,
                sub_index,
                otaddr: *otaddr,
                tx_pub_key: tx_keys[k],
                key_image,
                mask,
                amount,
                remark: envelope::xor_remark(remark, &shared),
                spent: false,
                frozen: false,
                spent_height: 0,
            });
            view.received += envelope::from_commit_units(amount);
            view.outputs_found += 1;
            touched = true;
        }

        for output in &tx.outputs {
            if let Output::Account { to, amount, .. } = output {
                if *to == ctx.external {
                    view.received += *amount;
                    touched = true;
                }
            }
        }

        if touched {
            delta.txs.push((btx.hash, tx.to_bytes()?));
            delta.summary.txs.push(view);
        }
    }

    if !delta.found.is_empty() || !delta.spent.is_empty() {
        debug!(height = block.height, found = delta.found.len(), spent = delta.spent.len(), "scanned block");
    }
    Ok(delta)
}
