//! One opened account: keys, the owned-output store and the scan cursor,
//! plus the operations that need all three.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::address::{self, ExternalAddress};
use crate::builder::{self, AddInfo, BuiltTx, Recipient, Source};
use crate::config;
use crate::crypto::{self, Key, SecretKey};
use crate::envelope;
use crate::error::{Result, WalletError};
use crate::keys::{AccountKeys, SubaddressTable};
use crate::node::{Block, NodeClient};
use crate::scanner::{self, BlockDelta, BlockSummary, OwnedOutput, ScanContext, ScanState};
use crate::selection::{self, Candidate, Destination, Selector};
use crate::storage::{KeySpace, Store};
use crate::transaction::{AccountSigner, TokenId, Transaction, NATIVE_TOKEN};

/// Address an account is bound to when none is configured: the low 20 bytes
/// of `keccak(spend_public)`.
pub fn default_external_address(keys: &AccountKeys) -> ExternalAddress {
    let h = crypto::keccak256(&keys.spend_public());
    let mut out = [0u8; 20];
    out.copy_from_slice(&h[12..]);
    out
}

/// What one refresh pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub remote_height: u64,
    pub blocks: u64,
    pub found: u64,
    pub spent: u64,
    pub rewinds: u64,
}

pub struct Wallet<N: NodeClient> {
    store: Arc<Store>,
    node: Arc<N>,
    keys: AccountKeys,
    external: ExternalAddress,
    space: KeySpace,
    table: SubaddressTable,
    state: ScanState,
    cfg: config::Wallet,
}

impl<N: NodeClient> Wallet<N> {
    /// Derives the keys from `root` and loads whatever the store holds for
    /// this account.
    pub fn open(
        store: Arc<Store>,
        node: Arc<N>,
        root: Zeroizing<Key>,
        external: Option<ExternalAddress>,
        cfg: config::Wallet,
    ) -> Result<Self> {
        let keys = AccountKeys::from_root(&root);
        let external = external.unwrap_or_else(|| default_external_address(&keys));
        let space = KeySpace::new(&external);

        let local_height = store.get::<u64>(&space.local_height())?.unwrap_or(0);
        let g_out_index = store.get_json::<BTreeMap<String, u64>>(&space.g_out_index())?.unwrap_or_default();
        let count = store.get::<u64>(&space.transfers_count())?.unwrap_or(0);
        let mut transfers = Vec::with_capacity(count as usize);
        for n in 0..count as usize {
            let t = store.get::<OwnedOutput>(&space.transfer(n))?.ok_or(WalletError::OutputNotFound)?;
            transfers.push(t);
        }
        let sub_count = store.get::<u32>(&space.sub_count())?.unwrap_or(1).max(1);
        let mut table = SubaddressTable::new(cfg.max_sub_accounts);
        table.expand(&keys, sub_count)?;

        let state = ScanState::from_parts(local_height, g_out_index, transfers);
        info!(
            account = %address::external_to_string(&external),
            local_height,
            outputs = state.transfers.len(),
            subaddresses = sub_count,
            "wallet opened"
        );
        Ok(Wallet { store, node, keys, external, space, table, state, cfg })
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.keys
    }

    pub fn external(&self) -> ExternalAddress {
        self.external
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn local_height(&self) -> u64 {
        self.state.local_height
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    /// Base58 address of subaddress `index`, materialising it when needed.
    pub fn address(&mut self, index: u32) -> Result<String> {
        let wanted = index.checked_add(1).ok_or(WalletError::SubaccountTooLarge(u64::from(index)))?;
        if wanted > self.table.len() {
            self.table.expand(&self.keys, wanted)?;
            self.store.put(&self.space.sub_count(), &self.table.len())?;
        }
        let addr = self.table.get(index).ok_or(WalletError::SubaccountTooLarge(u64::from(index)))?;
        Ok(addr.to_base58(index != 0))
    }

    pub fn subaddress_count(&self) -> u32 {
        self.table.len()
    }

    /// Atomic units of `token` held by every subaddress with a balance.
    pub fn balances(&self, token: &TokenId) -> Vec<(u32, u128)> {
        let mut out: Vec<(u32, u128)> = self
            .state
            .balances()
            .filter(|(_, t, v)| t == token && *v > 0)
            .map(|(s, _, v)| (s, envelope::from_commit_units(v)))
            .collect();
        out.sort_unstable();
        out
    }

    pub fn balance(&self, token: &TokenId) -> u128 {
        self.state.total_balance(token) * envelope::CHANGE_RATE
    }

    // -------------------------------------------------------------------------
    // refresh

    /// Scans every block up to the node's tip, committing one batch per block.
    pub async fn refresh_once(&mut self) -> Result<RefreshReport> {
        let remote = self.node.block_number().await?;
        let mut report = RefreshReport { remote_height: remote, ..Default::default() };
        while self.state.local_height <= remote {
            let height = self.state.local_height;
            let block = self.node.get_block(height).await?;
            match self.process_block(&block) {
                Ok((found, spent)) => {
                    report.blocks += 1;
                    report.found += found;
                    report.spent += spent;
                }
                Err(WalletError::BlockParentMismatch(h)) => {
                    warn!(height = h, "block parent mismatch, rewinding one block");
                    self.rewind_one()?;
                    report.rewinds += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    fn process_block(&mut self, block: &Block) -> Result<(u64, u64)> {
        let height = self.state.local_height;
        if block.height != height {
            return Err(WalletError::DaemonDataErr(format!("asked block {height}, got {}", block.height)));
        }
        if height > 0 {
            if let Some(prev) = self.store.get::<Key>(&self.space.block_hash(height - 1))? {
                if prev != block.parent_hash {
                    return Err(WalletError::BlockParentMismatch(height));
                }
            }
        }
        let ctx = ScanContext {
            keys: &self.keys,
            table: &self.table,
            external: self.external,
            short_ecdh: self.cfg.short_ecdh,
        };
        let delta = scanner::scan_block(block, &ctx, &self.state)?;
        let counts = (delta.found.len() as u64, delta.spent.len() as u64);
        self.commit(block, delta)?;
        Ok(counts)
    }

    /// Persists a scanned block and only then applies it in memory.
    fn commit(&mut self, block: &Block, delta: BlockDelta) -> Result<()> {
        let records = self.state.staged_records(&delta);
        let count = (self.state.transfers.len() + delta.found.len()) as u64;
        let mut batch = self.store.batch();
        for (n, record) in &records {
            batch.put(&self.space.transfer(*n), record);
        }
        batch.put(&self.space.transfers_count(), &count);
        batch.put_json(&self.space.g_out_index(), &delta.g_out_index);
        batch.put(&self.space.local_height(), &(delta.height + 1));
        batch.put(&self.space.sub_count(), &self.table.len());
        batch.put(&self.space.block_hash(delta.height), &block.hash);
        batch.put(&self.space.block_txs(delta.height), &delta.summary);
        for (hash, raw) in &delta.txs {
            batch.put_raw(&self.space.utxo_tx(hash), raw);
        }
        self.store.write_batch(batch)?;
        if !delta.is_empty() {
            debug!(height = delta.height, found = delta.found.len(), spent = delta.spent.len(), "block committed");
        }
        self.state.apply(delta);
        Ok(())
    }

    /// Forgets the last scanned block.
    fn rewind_one(&mut self) -> Result<()> {
        let Some(height) = self.state.local_height.checked_sub(1) else {
            return Ok(());
        };
        let summary = self
            .store
            .get::<BlockSummary>(&self.space.block_txs(height))?
            .ok_or(WalletError::BlockNotFound(height))?;
        let old_count = self.state.transfers.len();
        let mut next = self.state.clone();
        let restored = next.rewind(height, summary.g_out_start.clone());

        let mut batch = self.store.batch();
        for n in next.transfers.len()..old_count {
            batch.delete(&self.space.transfer(n));
        }
        for n in restored {
            batch.put(&self.space.transfer(n), &next.transfers[n]);
        }
        for tx in &summary.txs {
            batch.delete(&self.space.utxo_tx(&tx.hash));
        }
        batch.put(&self.space.transfers_count(), &(next.transfers.len() as u64));
        batch.put_json(&self.space.g_out_index(), &next.g_out_index);
        batch.put(&self.space.local_height(), &height);
        batch.delete(&self.space.block_hash(height));
        batch.delete(&self.space.block_txs(height));
        self.store.write_batch(batch)?;
        self.state = next;
        info!(height, "rewound one block");
        Ok(())
    }

    /// Drops every owned output and the cursor; the next refresh starts at 0.
    pub fn rescan(&mut self) -> Result<()> {
        let prefix = self.space.prefix().to_string();
        let mut batch = self.store.batch();
        for key in self.store.keys_with_prefix(&prefix)? {
            let suffix = &key[prefix.len()..];
            if suffix.starts_with("transfers_") || suffix.starts_with("blockHash_") || suffix.starts_with("blockTxs_") {
                batch.delete(&key);
            }
        }
        batch.put(&self.space.transfers_count(), &0u64);
        batch.put(&self.space.local_height(), &0u64);
        batch.put_json(&self.space.g_out_index(), &BTreeMap::<String, u64>::new());
        self.store.write_batch(batch)?;
        self.state = ScanState::default();
        info!("rescan scheduled from height 0");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // transactions

    async fn reject_contracts(&self, dests: &[Destination]) -> Result<()> {
        for d in dests {
            if let Destination::Account { to, .. } = d {
                if !self.node.get_code(*to).await?.is_empty() {
                    return Err(WalletError::OutputContractNotSupported);
                }
            }
        }
        Ok(())
    }

    async fn utxo_fee(&self) -> u128 {
        match self.node.get_utxo_gas().await {
            Ok(gas) => selection::utxo_fee(gas),
            Err(e) => {
                warn!("utxo gas query failed, using configured gas: {e}");
                selection::utxo_fee(self.cfg.utxo_gas)
            }
        }
    }

    /// Builds and signs the transactions paying `dests` from the given
    /// subaddresses (all funded ones when empty). Spent inputs are marked
    /// locally; the caller submits the returned transactions.
    pub async fn create_utxo_transactions(
        &mut self,
        subaddrs: &[u32],
        dests: Vec<Destination>,
        token: TokenId,
        extra: Vec<u8>,
    ) -> Result<Vec<BuiltTx>> {
        if token != NATIVE_TOKEN {
            return Err(WalletError::UtxoTokenUnsupported(address::external_to_string(&token)));
        }
        self.reject_contracts(&dests).await?;

        let funded: Vec<(u32, u128)> = self.balances(&token);
        let subaddrs: Vec<u32> = if subaddrs.is_empty() {
            funded.iter().map(|(s, _)| *s).collect()
        } else {
            subaddrs.to_vec()
        };
        let change_sub = funded
            .iter()
            .filter(|(s, _)| subaddrs.contains(s))
            .max_by_key(|(_, v)| *v)
            .map_or(0, |(s, _)| *s);
        let change = *self.table.get(change_sub).ok_or(WalletError::SubaccountTooLarge(u64::from(change_sub)))?;

        let pool: Vec<Candidate> = self
            .state
            .unspent(&token, &subaddrs)
            .into_iter()
            .map(|(transfer, o)| Candidate { transfer, sub_index: o.sub_index, height: o.height, amount: o.atomic_amount() })
            .collect();
        let max_global = self.state.max_global_index(&token);
        let selector = Selector {
            utxo_fee: self.utxo_fee().await,
            max_global,
            ring_size: self.cfg.ring_size,
            change,
            change_is_subaddress: change_sub != 0,
        };
        let packets = selector.select(&pool, &dests)?;
        info!(packets = packets.len(), inputs = pool.len(), "coin selection done");

        let mut jobs: Vec<(Vec<Source>, Vec<Destination>)> = Vec::with_capacity(packets.len());
        for packet in packets {
            let outputs: Vec<OwnedOutput> = packet.inputs.iter().map(|c| self.state.transfers[c.transfer].clone()).collect();
            let ring_size = selector.ring_size(outputs.len());
            let sources = builder::fetch_sources(
                self.node.as_ref(),
                token,
                outputs,
                ring_size,
                max_global.unwrap_or(0),
                self.cfg.output_page_rings,
            )
            .await?;
            jobs.push((sources, packet.outputs));
        }

        let short_ecdh = self.cfg.short_ecdh;
        let keys = &self.keys;
        let built: Vec<BuiltTx> = jobs
            .par_iter()
            .map(|(sources, outputs)| {
                builder::build_utxo_tx(keys, token, sources, outputs, extra.clone(), short_ecdh, change_sub)
            })
            .collect::<Result<_>>()?;

        let spent: Vec<usize> = jobs
            .iter()
            .flat_map(|(sources, _)| sources.iter())
            .filter_map(|s| self.state.find_key_image(&s.output.key_image))
            .collect();
        self.persist_built(&built, &spent)?;
        Ok(built)
    }

    /// Builds an account-input transaction signed by `signer`.
    pub async fn create_account_transaction(
        &mut self,
        signer: &dyn AccountSigner,
        dests: Vec<Destination>,
        token: TokenId,
        extra: Vec<u8>,
    ) -> Result<BuiltTx> {
        if token != NATIVE_TOKEN {
            return Err(WalletError::UtxoTokenUnsupported(address::external_to_string(&token)));
        }
        selection::check_dests(&dests, 0)?;
        self.reject_contracts(&dests).await?;

        let from = signer.address();
        let total: u128 = dests.iter().map(Destination::amount).sum();
        let need = total.checked_add(selection::account_fee(total)).ok_or(WalletError::DestOverflow)?;
        if self.node.get_token_balance(from, token).await? < need {
            return Err(WalletError::BalanceNotEnough);
        }
        let nonce = self.node.get_transaction_count(from).await?;
        let built = builder::build_account_tx(signer, nonce, token, &dests, extra, self.cfg.short_ecdh)?;
        self.persist_built(std::slice::from_ref(&built), &[])?;
        Ok(built)
    }

    fn persist_built(&mut self, built: &[BuiltTx], spent: &[usize]) -> Result<()> {
        let mut next = self.state.clone();
        for &idx in spent {
            next.mark_spent(idx, 0);
        }
        let mut batch = self.store.batch();
        for b in built {
            batch.put_raw(&self.space.tx_keys(&b.hash), b.tx_key.as_bytes());
            batch.put_json(&self.space.add_info(&b.hash), &b.add_info);
            batch.put_raw(&self.space.utxo_tx(&b.hash), &b.tx.to_bytes()?);
        }
        for &idx in spent {
            batch.put(&self.space.transfer(idx), &next.transfers[idx]);
        }
        self.store.write_batch(batch)?;
        self.state = next;
        Ok(())
    }

    pub async fn submit(&self, tx: &Transaction) -> Result<Key> {
        let hash = self.node.send_raw_utxo_transaction(tx.to_bytes()?).await?;
        info!(tx = %hex::encode(hash), "transaction submitted");
        Ok(hash)
    }

    pub fn get_transaction(&self, hash: &Key) -> Result<Transaction> {
        let raw = self.store.get_raw(&self.space.utxo_tx(hash))?.ok_or(WalletError::TxNotFound)?;
        Transaction::from_bytes(&raw)
    }

    pub fn get_add_info(&self, hash: &Key) -> Result<AddInfo> {
        self.store.get_json(&self.space.add_info(hash))?.ok_or(WalletError::AddInfoNotFound)
    }

    pub fn get_proof_key(&self, hash: &Key, recipient: &Recipient) -> Result<Key> {
        let tx = self.get_transaction(hash)?;
        if tx.has_account_input() {
            return Err(WalletError::ProofNotNeeded);
        }
        let raw = self.store.get_raw(&self.space.tx_keys(hash))?.ok_or(WalletError::TxKeyNotFound)?;
        let bytes: Zeroizing<Key> =
            Zeroizing::new(raw.as_slice().try_into().map_err(|_| WalletError::Inner("tx key has wrong length".into()))?);
        builder::get_proof_key(&tx, &SecretKey::from_bytes(*bytes), recipient)
    }

    /// Amount `tx` pays `recipient`, proven by `key`.
    pub fn check_proof_key(&self, tx: &Transaction, recipient: &Recipient, key: &Key) -> Result<u128> {
        builder::check_proof_key(tx, recipient, key, self.cfg.short_ecdh)
    }

    pub fn close(&self) -> Result<()> {
        self.store.flush()
    }
}
