// In-memory chain standing in for the node in wallet tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tempfile::TempDir;
use zeroize::Zeroizing;

use ctcwallet::{
    address::{AccountAddress, ExternalAddress},
    builder,
    config,
    crypto::{self, Key},
    node::{Block, BlockTx, CallRequest, NodeClient},
    rct::CtKey,
    selection::Destination,
    storage::Store,
    transaction::{AccountSigner, TokenId, Transaction, NATIVE_TOKEN},
    wallet::Wallet,
    Result, WalletError,
};

pub const ROOT_A: &str = "b0ef6bd527b9b23b9ceef70dc8b4cd1ee83ca14541964e764ad23f5151204f0f";
pub const ROOT_B: &str = "e71ac677e45aee758083c3504b146e3df2d44a3bee720267baf85f622b44cdc8";
pub const COIN: u128 = 1_000_000_000_000_000_000;

pub fn root(hex: &str) -> Zeroizing<Key> {
    Zeroizing::new(crypto::key_from_hex(hex).expect("valid root"))
}

pub struct TestSigner(pub ExternalAddress);

impl AccountSigner for TestSigner {
    fn address(&self) -> ExternalAddress {
        self.0
    }

    fn sign(&self, prefix_hash: &Key) -> Result<Vec<u8>> {
        Ok(prefix_hash.to_vec())
    }
}

pub const FAUCET: ExternalAddress = [0xfa; 20];

#[derive(Default)]
pub struct Chain {
    pub blocks: Vec<Block>,
    pub submitted: Vec<Transaction>,
    pub balances: HashMap<ExternalAddress, u128>,
    pub contracts: HashSet<ExternalAddress>,
    pub nonces: HashMap<ExternalAddress, u64>,
}

pub struct MockNode {
    pub chain: Mutex<Chain>,
    pub utxo_gas: u64,
}

fn block_hash(height: u64, parent: &Key, txs: &[BlockTx]) -> Key {
    let mut buf = height.to_le_bytes().to_vec();
    buf.extend_from_slice(parent);
    for t in txs {
        buf.extend_from_slice(&t.hash);
    }
    crypto::keccak256(&buf)
}

impl MockNode {
    pub fn new() -> Self {
        let genesis = Block { height: 0, hash: block_hash(0, &[0u8; 32], &[]), parent_hash: [0u8; 32], timestamp: 0, txs: vec![] };
        let chain = Chain { blocks: vec![genesis], ..Default::default() };
        MockNode { chain: Mutex::new(chain), utxo_gas: 0x7a120 }
    }

    /// Appends a block holding `txs`; every tx must pass stateless verification.
    pub fn mine(&self, txs: Vec<(Transaction, Option<ExternalAddress>)>) -> Block {
        let mut chain = self.chain.lock().expect("chain lock");
        let parent = chain.blocks.last().expect("genesis").clone();
        let block = Self::make_block(parent.height + 1, parent.hash, txs, 1);
        chain.blocks.push(block.clone());
        block
    }

    /// Replaces the tip with a block holding `txs`.
    pub fn replace_tip(&self, txs: Vec<(Transaction, Option<ExternalAddress>)>) -> Block {
        let mut chain = self.chain.lock().expect("chain lock");
        let old = chain.blocks.pop().expect("tip");
        let block = Self::make_block(old.height, old.parent_hash, txs, 2);
        chain.blocks.push(block.clone());
        block
    }

    fn make_block(height: u64, parent: Key, txs: Vec<(Transaction, Option<ExternalAddress>)>, salt: u64) -> Block {
        let txs: Vec<BlockTx> = txs
            .into_iter()
            .map(|(tx, from)| {
                tx.verify().expect("mined transaction verifies");
                BlockTx { hash: tx.hash().expect("hash"), from, tx }
            })
            .collect();
        let hash = block_hash(height * 1000 + salt, &parent, &txs);
        Block { height, hash, parent_hash: parent, timestamp: height * 10, txs }
    }

    pub fn height(&self) -> u64 {
        self.chain.lock().expect("chain lock").blocks.len() as u64 - 1
    }

    /// Every stealth output of `token` in chain order.
    pub fn outputs(&self, token: &TokenId) -> Vec<CtKey> {
        let chain = self.chain.lock().expect("chain lock");
        let mut out = Vec::new();
        for b in &chain.blocks {
            for t in &b.txs {
                if t.tx.token_id != *token {
                    continue;
                }
                for (j, _, _) in t.tx.utxo_outputs() {
                    out.push(t.tx.rct_sig.base.out_pk[j]);
                }
            }
        }
        out
    }

    pub fn take_submitted(&self) -> Vec<Transaction> {
        std::mem::take(&mut self.chain.lock().expect("chain lock").submitted)
    }
}

impl NodeClient for MockNode {
    fn block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.height()) })
    }

    fn get_block(&self, height: u64) -> BoxFuture<'_, Result<Block>> {
        Box::pin(async move {
            let chain = self.chain.lock().expect("chain lock");
            chain.blocks.get(height as usize).cloned().ok_or(WalletError::BlockNotFound(height))
        })
    }

    fn get_outputs(&self, token: TokenId, indices: Vec<u64>) -> BoxFuture<'_, Result<Vec<CtKey>>> {
        Box::pin(async move {
            let all = self.outputs(&token);
            indices
                .iter()
                .map(|i| all.get(*i as usize).copied().ok_or(WalletError::OutputNotFound))
                .collect()
        })
    }

    fn get_token_balance(&self, addr: ExternalAddress, _token: TokenId) -> BoxFuture<'_, Result<u128>> {
        Box::pin(async move { Ok(self.chain.lock().expect("chain lock").balances.get(&addr).copied().unwrap_or(0)) })
    }

    fn get_transaction_count(&self, addr: ExternalAddress) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.chain.lock().expect("chain lock").nonces.get(&addr).copied().unwrap_or(0)) })
    }

    fn get_code(&self, addr: ExternalAddress) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            let is_contract = self.chain.lock().expect("chain lock").contracts.contains(&addr);
            Ok(if is_contract { vec![0x60, 0x80] } else { Vec::new() })
        })
    }

    fn estimate_gas(&self, _call: CallRequest) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(21_000) })
    }

    fn get_utxo_gas(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.utxo_gas) })
    }

    fn send_raw_utxo_transaction(&self, raw: Vec<u8>) -> BoxFuture<'_, Result<Key>> {
        Box::pin(async move {
            let tx = Transaction::from_bytes(&raw)?;
            tx.verify().map_err(|e| WalletError::SubmitFail(e.to_string()))?;
            let hash = tx.hash()?;
            self.chain.lock().expect("chain lock").submitted.push(tx);
            Ok(hash)
        })
    }

    fn chain_version(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok("mock/1".to_string()) })
    }
}

/// A funding transaction paying `amount` from the faucet account to `to`.
pub fn fund(to: AccountAddress, is_subaddress: bool, amount: u128) -> (Transaction, Option<ExternalAddress>) {
    let dest = Destination::Utxo { address: to, is_subaddress, amount, remark: [7u8; 32], is_change: false };
    let built = builder::build_account_tx(&TestSigner(FAUCET), 0, NATIVE_TOKEN, &[dest], Vec::new(), false)
        .expect("funding tx builds");
    (built.tx, Some(FAUCET))
}

pub struct TestWallet {
    pub dir: TempDir,
    pub store: Arc<Store>,
    pub wallet: Wallet<MockNode>,
}

pub fn open_wallet(node: Arc<MockNode>, root_hex: &str) -> TestWallet {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(Store::open(dir.path().join("wallet_db").to_str().expect("utf8 path")).expect("Failed to open store"));
    let wallet = Wallet::open(store.clone(), node, root(root_hex), None, config::Wallet::default()).expect("wallet opens");
    TestWallet { dir, store, wallet }
}
