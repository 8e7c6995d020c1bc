//! Coin selection and packetisation of a payment into one or more
//! transactions that fit the size caps.

use std::collections::{HashMap, VecDeque};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{AccountAddress, ExternalAddress};
use crate::crypto::Key;
use crate::envelope::CHANGE_RATE;
use crate::error::{Result, WalletError};
use crate::transaction::MAX_UTXO_OUT;

pub const SOFT_SIZE_LIMIT: u64 = 25_600;
pub const HARD_SIZE_LIMIT: u64 = 28_672;
pub const MAX_TX_SIZE: usize = 32_768;
pub const DFS_TOTAL_TRIES: usize = 1_000_000;

pub const GAS_PRICE: u128 = 100_000_000_000;
pub const DEFAULT_UTXO_GAS: u64 = 0x7a120;
pub const DEFAULT_RING_SIZE: usize = 11;
pub const SHORT_RING_SIZE: usize = 1;

const ACCOUNT_GAS_PER_COIN: u128 = 50_000;
const ACCOUNT_GAS_MIN: u128 = 500_000;
const ACCOUNT_GAS_MAX: u128 = 5_000_000_000;
const COIN: u128 = 1_000_000_000_000_000_000;

/// Fee of a UTXO-input transaction for a node-quoted gas amount.
pub fn utxo_fee(gas: u64) -> u128 {
    u128::from(gas) * GAS_PRICE
}

/// Fee of moving `value` atomic units to or from an account.
pub fn account_fee(value: u128) -> u128 {
    if value == 0 {
        return 0;
    }
    let coins = value.div_ceil(COIN);
    let gas = coins.saturating_mul(ACCOUNT_GAS_PER_COIN).clamp(ACCOUNT_GAS_MIN, ACCOUNT_GAS_MAX);
    gas * GAS_PRICE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Utxo {
        address: AccountAddress,
        is_subaddress: bool,
        amount: u128,
        remark: Key,
        is_change: bool,
    },
    Account {
        to: ExternalAddress,
        amount: u128,
        data: Vec<u8>,
    },
}

impl Destination {
    pub fn amount(&self) -> u128 {
        match self {
            Destination::Utxo { amount, .. } | Destination::Account { amount, .. } => *amount,
        }
    }

    fn amount_mut(&mut self) -> &mut u128 {
        match self {
            Destination::Utxo { amount, .. } | Destination::Account { amount, .. } => amount,
        }
    }

    pub fn is_utxo(&self) -> bool {
        matches!(self, Destination::Utxo { .. })
    }

    pub fn is_change(&self) -> bool {
        matches!(self, Destination::Utxo { is_change: true, .. })
    }

    /// Copy of this destination carrying a different amount.
    fn with_amount(&self, amount: u128) -> Destination {
        let mut d = self.clone();
        *d.amount_mut() = amount;
        d
    }

    fn spend_public(&self) -> Option<Key> {
        match self {
            Destination::Utxo { address, .. } => Some(address.spend_public),
            Destination::Account { .. } => None,
        }
    }
}

/// A spendable output as selection sees it. Amounts are atomic units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Index into the wallet's owned outputs.
    pub transfer: usize,
    pub sub_index: u32,
    pub height: u64,
    pub amount: u128,
}

/// The inputs and outputs of one transaction to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub inputs: Vec<Candidate>,
    pub outputs: Vec<Destination>,
}

/// What a destination list costs when paid from UTXO inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Need {
    pub amount: u128,
    pub has_utxo_out: bool,
}

/// Validates amounts and returns `Σ dests + utxo_fee + account_fee(Σ account dests)`.
pub fn check_dests(dests: &[Destination], utxo_fee: u128) -> Result<Need> {
    if dests.is_empty() {
        return Err(WalletError::OutputEmpty);
    }
    let mut total: u128 = 0;
    let mut account_total: u128 = 0;
    let mut has_utxo_out = false;
    for d in dests {
        let amount = d.amount();
        if amount < CHANGE_RATE || amount % CHANGE_RATE != 0 {
            return Err(WalletError::OutputAmountInvalid);
        }
        total = total.checked_add(amount).ok_or(WalletError::DestOverflow)?;
        match d {
            Destination::Utxo { .. } => has_utxo_out = true,
            Destination::Account { .. } => account_total += amount,
        }
    }
    let amount = total
        .checked_add(utxo_fee)
        .and_then(|v| v.checked_add(account_fee(account_total)))
        .ok_or(WalletError::DestOverflow)?;
    Ok(Need { amount, has_utxo_out })
}

/// Estimated serialised size in bytes.
pub fn estimate_tx_size(inputs: usize, outputs: usize, ring_size: usize) -> u64 {
    let (i, o, r) = (inputs as u64, outputs as u64, ring_size as u64);
    let log_out = (o.max(1).next_power_of_two().trailing_zeros()) as u64;
    let mut size = i * (r * 8 + 32);
    size += o * 64;
    size += 64 + o * 32 + 1;
    size += 32 * i;
    size += 96 * o;
    size += 64 * o;
    size += 8;
    size += (2 * (6 + log_out) + 9) * 32;
    size += if ring_size == 1 { i * 64 } else { i * (64 * r + 32) };
    size
}

/// Ring size for `inputs` spends when the chain knows `max_global + 1`
/// outputs: `ring_size` when the chain holds at least `inputs · ring_size`
/// outputs, otherwise 1.
pub fn ring_size_for(inputs: usize, max_global: Option<u64>, ring_size: usize) -> usize {
    let wanted = (inputs as u64).saturating_mul(ring_size as u64);
    match max_global {
        Some(max) if max.saturating_add(1) >= wanted => ring_size,
        _ => SHORT_RING_SIZE,
    }
}

fn sum(items: &[Candidate]) -> u128 {
    items.iter().map(|c| c.amount).sum()
}

/// Picks a subset of `pool` covering `target`.
pub fn coin_selection(pool: &[Candidate], target: u128) -> Result<Vec<Candidate>> {
    if sum(pool) < target {
        return Err(WalletError::BalanceNotEnough);
    }
    let min_large = pool.iter().filter(|c| c.amount >= target).min_by_key(|c| c.amount).copied();
    let small: Vec<Candidate> = pool.iter().filter(|c| c.amount < target).copied().collect();

    if let Some(l) = min_large {
        if l.amount == target {
            return Ok(vec![l]);
        }
    }
    let small_sum = sum(&small);
    if small_sum == target {
        return Ok(small);
    }
    if small_sum < target {
        return min_large.map(|l| vec![l]).ok_or(WalletError::BalanceNotEnough);
    }

    match select_dfs(&small, target) {
        Ok(exact) => {
            debug!(inputs = exact.len(), "exact match found");
            Ok(exact)
        }
        Err(_) => {
            let srd = select_srd(&small, target)?;
            let total = sum(&srd);
            match min_large {
                Some(l) if total != target && total < l.amount => Ok(vec![l]),
                _ => Ok(srd),
            }
        }
    }
}

/// Branch-and-bound search for a subset summing exactly to `target`.
pub fn select_dfs(pool: &[Candidate], target: u128) -> Result<Vec<Candidate>> {
    let mut sorted = pool.to_vec();
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
    let n = sorted.len();
    // remaining[i] = Σ sorted[i..]
    let mut remaining = vec![0u128; n + 1];
    for i in (0..n).rev() {
        remaining[i] = remaining[i + 1] + sorted[i].amount;
    }

    let mut included = vec![false; n];
    let mut selected: u128 = 0;
    let mut depth = 0usize;
    for _ in 0..DFS_TOTAL_TRIES {
        if selected == target {
            break;
        }
        if selected > target || depth == n || selected + remaining[depth] < target {
            // walk back to the last included item and exclude it
            loop {
                if depth == 0 {
                    return Err(WalletError::ExactMatchFail);
                }
                depth -= 1;
                if included[depth] {
                    included[depth] = false;
                    selected -= sorted[depth].amount;
                    depth += 1;
                    break;
                }
            }
            continue;
        }
        // skip an item equal to an excluded predecessor; that branch was tried
        if depth > 0 && !included[depth - 1] && sorted[depth].amount == sorted[depth - 1].amount {
            depth += 1;
            continue;
        }
        included[depth] = true;
        selected += sorted[depth].amount;
        depth += 1;
    }
    if selected != target {
        return Err(WalletError::ExactMatchFail);
    }
    Ok(sorted.iter().zip(&included).filter(|(_, inc)| **inc).map(|(c, _)| *c).collect())
}

/// Single random draw: shuffle and accumulate until `target` is covered.
pub fn select_srd(pool: &[Candidate], target: u128) -> Result<Vec<Candidate>> {
    let mut shuffled = pool.to_vec();
    shuffled.sort_by(|a, b| b.height.cmp(&a.height));
    if shuffled.len() > 2 {
        shuffled.shuffle(&mut rand::thread_rng());
    }
    let mut total = 0u128;
    let mut out = Vec::new();
    for c in shuffled {
        total += c.amount;
        out.push(c);
        if total >= target {
            return Ok(out);
        }
    }
    Err(WalletError::BalanceNotEnough)
}

/// Pays `amount` of `dest` into `paid`, folding account payments to the same
/// recipient into one entry.
fn pay_into(paid: &mut Vec<Destination>, dest: &Destination, amount: u128) {
    if let Destination::Account { to, .. } = dest {
        let existing = paid.iter_mut().find(|p| matches!(p, Destination::Account { to: t, .. } if t == to));
        if let Some(p) = existing {
            *p.amount_mut() += amount;
            return;
        }
    }
    paid.push(dest.with_amount(amount));
}

/// Splits `dests` across the selected inputs in order. Stealth destinations
/// paid from two inputs appear twice; [`merge_dests`] folds them back.
pub fn pay_dests(selected: &[Candidate], dests: &[Destination]) -> Result<Vec<Destination>> {
    let mut queue: VecDeque<Destination> = dests.iter().cloned().collect();
    let mut paid = Vec::with_capacity(dests.len());
    for c in selected {
        let mut avail = c.amount;
        while avail > 0 {
            let Some(front) = queue.front_mut() else {
                break;
            };
            let pay = front.amount().min(avail);
            pay_into(&mut paid, front, pay);
            avail -= pay;
            *front.amount_mut() -= pay;
            if front.amount() == 0 {
                queue.pop_front();
            }
        }
    }
    if !queue.is_empty() {
        return Err(WalletError::BalanceNotEnough);
    }
    Ok(paid)
}

/// Folds stealth destinations that share a spend key until at most
/// [`MAX_UTXO_OUT`] remain.
pub fn merge_dests(dests: Vec<Destination>) -> Result<Vec<Destination>> {
    let utxo_count = dests.iter().filter(|d| d.is_utxo()).count();
    if utxo_count <= MAX_UTXO_OUT {
        return Ok(dests);
    }

    let mut per_key: HashMap<Key, usize> = HashMap::new();
    for d in &dests {
        if let Some(k) = d.spend_public() {
            *per_key.entry(k).or_default() += 1;
        }
    }
    let mut new_dests = Vec::with_capacity(dests.len());
    let mut mergeable = Vec::new();
    for d in dests {
        match d.spend_public() {
            Some(k) if per_key[&k] > 1 => mergeable.push(d),
            _ => new_dests.push(d),
        }
    }
    mergeable.sort_by(|a, b| b.amount().cmp(&a.amount()));
    let mut dup_keys = per_key.values().filter(|c| **c > 1).count();
    let mut nodup = new_dests.iter().filter(|d| d.is_utxo()).count();

    while mergeable.len() > dup_keys && mergeable.len() + nodup > MAX_UTXO_OUT {
        let Some(smallest) = mergeable.pop() else {
            break;
        };
        let key = smallest.spend_public();
        if let Some(other) = mergeable.iter_mut().find(|d| d.spend_public() == key && !d.is_change()) {
            *other.amount_mut() += smallest.amount();
        } else {
            new_dests.push(smallest);
            dup_keys = dup_keys.saturating_sub(1);
            nodup += 1;
        }
    }
    new_dests.extend(mergeable);
    if new_dests.iter().filter(|d| d.is_utxo()).count() > MAX_UTXO_OUT {
        return Err(WalletError::DestsMergeFail);
    }
    Ok(new_dests)
}

/// Splits a payment into packets for one token's spendable pool.
pub struct Selector {
    pub utxo_fee: u128,
    pub max_global: Option<u64>,
    pub ring_size: usize,
    pub change: AccountAddress,
    pub change_is_subaddress: bool,
}

impl Selector {
    pub fn ring_size(&self, inputs: usize) -> usize {
        ring_size_for(inputs, self.max_global, self.ring_size)
    }

    fn check_tx_size(&self, inputs: usize, has_utxo_out: bool) -> bool {
        let ring = self.ring_size(inputs);
        if !has_utxo_out && estimate_tx_size(inputs, 1, ring) <= HARD_SIZE_LIMIT {
            return true;
        }
        let outputs = if inputs < MAX_UTXO_OUT { inputs + 1 } else { MAX_UTXO_OUT };
        estimate_tx_size(inputs, outputs, ring) <= HARD_SIZE_LIMIT
    }

    /// Selects inputs for `dests` and returns the packets to build.
    ///
    /// A single packet is tried first. When it is too large, or its outputs
    /// cannot be paid and merged, the pool is packetised greedily instead.
    pub fn select(&self, pool: &[Candidate], dests: &[Destination]) -> Result<Vec<Packet>> {
        let need = check_dests(dests, self.utxo_fee)?;
        let mut selected = coin_selection(pool, need.amount)?;
        if !need.has_utxo_out && sum(&selected) > need.amount {
            selected = coin_selection(pool, need.amount + self.utxo_fee)?;
        }
        if !self.check_tx_size(selected.len(), need.has_utxo_out) {
            debug!(inputs = selected.len(), "selection too big, packetising");
            return self.direct_selection(pool, dests);
        }
        let single = pay_dests(&selected, dests).and_then(|paid| self.change_and_merge(&selected, paid));
        match single {
            Ok(outputs) => Ok(vec![Packet { inputs: selected, outputs }]),
            Err(e) => {
                debug!(inputs = selected.len(), "single packet rejected ({e}), packetising");
                self.direct_selection(pool, dests)
            }
        }
    }

    /// Greedy packetisation, largest outputs first.
    pub fn direct_selection(&self, pool: &[Candidate], dests: &[Destination]) -> Result<Vec<Packet>> {
        let mut sorted = pool.to_vec();
        sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
        let mut queue: VecDeque<Destination> = dests.iter().cloned().collect();

        let mut packets: Vec<(Vec<Candidate>, Vec<Destination>)> = Vec::new();
        let mut selected: Vec<Candidate> = Vec::new();
        let mut paid: Vec<Destination> = Vec::new();
        let mut adding_fee = false;
        let mut need: Option<Need> = None;
        let mut output_cnt = 0usize;

        for c in sorted {
            if queue.is_empty() && !adding_fee {
                break;
            }
            selected.push(c);
            let mut avail = c.amount;
            if !adding_fee {
                while avail > 0 {
                    let Some(front) = queue.front_mut() else {
                        break;
                    };
                    let utxo_outs = paid.iter().filter(|d| d.is_utxo()).count() + usize::from(front.is_utxo());
                    output_cnt = utxo_outs.min(MAX_UTXO_OUT);
                    let ring = self.ring_size(selected.len());
                    if estimate_tx_size(selected.len(), output_cnt, ring) > SOFT_SIZE_LIMIT {
                        adding_fee = true;
                        break;
                    }
                    let pay = front.amount().min(avail);
                    pay_into(&mut paid, front, pay);
                    avail -= pay;
                    *front.amount_mut() -= pay;
                    if front.amount() == 0 {
                        queue.pop_front();
                    }
                }
                if !adding_fee && !queue.is_empty() {
                    continue;
                }
            }

            let n = match need {
                Some(n) => n,
                None => {
                    let n = check_dests(&paid, self.utxo_fee)?;
                    need = Some(n);
                    n
                }
            };
            if estimate_tx_size(selected.len(), output_cnt, self.ring_size(selected.len())) > HARD_SIZE_LIMIT {
                return Err(WalletError::TxTooBig);
            }
            let total = sum(&selected);
            let finished = if n.has_utxo_out {
                total >= n.amount
            } else {
                total == n.amount || total >= n.amount + self.utxo_fee
            };
            if finished {
                packets.push((std::mem::take(&mut selected), std::mem::take(&mut paid)));
                adding_fee = false;
                need = None;
            } else if queue.is_empty() {
                // everything is paid but this packet's fee is not covered yet
                adding_fee = true;
            }
        }
        if !queue.is_empty() || adding_fee {
            return Err(WalletError::BalanceNotEnough);
        }
        debug!(packets = packets.len(), "direct selection done");
        packets
            .into_iter()
            .map(|(inputs, paid)| {
                let outputs = self.change_and_merge(&inputs, paid)?;
                Ok(Packet { inputs, outputs })
            })
            .collect()
    }

    /// Adds a change output for whatever the inputs carry beyond the need,
    /// then merges stealth outputs under the cap.
    pub fn change_and_merge(&self, inputs: &[Candidate], mut dests: Vec<Destination>) -> Result<Vec<Destination>> {
        let Need { amount: mut need, has_utxo_out } = check_dests(&dests, self.utxo_fee)?;
        let total = sum(inputs);
        if total < need {
            return Err(WalletError::BalanceNotEnough);
        }
        // a change output turns an account-only tx into a stealth one
        if !has_utxo_out && total > need {
            need += self.utxo_fee;
            if total < need {
                return Err(WalletError::BalanceNotEnough);
            }
        }
        if total > need {
            dests.push(Destination::Utxo {
                address: self.change,
                is_subaddress: self.change_is_subaddress,
                amount: total - need,
                remark: [0u8; 32],
                is_change: true,
            });
        }
        merge_dests(dests)
    }
}
