//! Stealth-address key algebra: account keys, derivations, one-time
//! addresses, key images and the subaddress lookup table. Also the 25-word
//! mnemonic form of a root secret.

use std::collections::HashMap;

use curve25519_dalek::scalar::Scalar;
use once_cell::sync::Lazy;
use zeroize::Zeroizing;

use crate::address::AccountAddress;
use crate::crypto::{self, Key, SecretKey};
use crate::error::{Result, WalletError};

const SUBADDR_DOMAIN: &[u8] = b"SubAddr\0";

/// `(sc_reduce(seed), sc_reduce(seed)·G)`.
pub fn generate_keys(seed: &Key) -> (SecretKey, Key) {
    let sk = SecretKey::from_scalar(&crypto::sc_reduce(seed));
    let pk = sk.public_key();
    (sk, pk)
}

/// Spend and view key pairs of one wallet, derived from the root secret.
pub struct AccountKeys {
    spend: SecretKey,
    view: SecretKey,
    spend_public: Key,
    view_public: Key,
}

impl AccountKeys {
    pub fn from_root(root: &Key) -> Self {
        let (spend, spend_public) = generate_keys(root);
        let view_seed = Zeroizing::new(crypto::keccak256(spend.as_bytes()));
        let (view, view_public) = generate_keys(&view_seed);
        AccountKeys { spend, view, spend_public, view_public }
    }

    /// Account behind a 25-word mnemonic.
    pub fn from_words(words: &str) -> Result<Self> {
        let root = Zeroizing::new(words_to_key(words)?);
        Ok(Self::from_root(&root))
    }

    pub fn spend_secret(&self) -> &SecretKey {
        &self.spend
    }

    pub fn view_secret(&self) -> &SecretKey {
        &self.view
    }

    pub fn spend_public(&self) -> Key {
        self.spend_public
    }

    pub fn view_public(&self) -> Key {
        self.view_public
    }

    pub fn main_address(&self) -> AccountAddress {
        AccountAddress { spend_public: self.spend_public, view_public: self.view_public }
    }

    /// Public keys of subaddress `index`; index 0 is the main address.
    pub fn subaddress(&self, index: u32) -> Result<AccountAddress> {
        if index == 0 {
            return Ok(self.main_address());
        }
        let m = subaddress_secret(&self.view, index);
        let spend_point = crypto::decompress(&self.spend_public)? + crypto::base_mul(&m);
        let view_point = self.view.scalar() * spend_point;
        Ok(AccountAddress {
            spend_public: crypto::compress(&spend_point),
            view_public: crypto::compress(&view_point),
        })
    }

    /// Spend secret of subaddress `index`: `b + m_i` (or `b` for the main address).
    pub fn subaddress_spend_secret(&self, index: u32) -> SecretKey {
        if index == 0 {
            return self.spend.clone();
        }
        SecretKey::from_scalar(&(self.spend.scalar() + subaddress_secret(&self.view, index)))
    }
}

/// `m_i = H_s("SubAddr\0" ‖ a ‖ major ‖ minor)` with major account 0.
pub fn subaddress_secret(view: &SecretKey, index: u32) -> Scalar {
    crypto::hash_to_scalar_parts(&[
        SUBADDR_DOMAIN,
        view.as_bytes(),
        &0u32.to_le_bytes(),
        &index.to_le_bytes(),
    ])
}

/// `D = 8·a·R`.
pub fn generate_key_derivation(tx_public: &Key, secret: &SecretKey) -> Result<Key> {
    let r = crypto::decompress(tx_public)?;
    Ok(crypto::compress(&(secret.scalar() * r).mul_by_cofactor()))
}

/// `H_s(D ‖ varint(i))`.
pub fn derivation_to_scalar(derivation: &Key, index: u64) -> Scalar {
    crypto::hash_to_scalar_parts(&[derivation, &crypto::varint(index)])
}

/// One-time address `H_s(D ‖ i)·G + B`.
pub fn derive_public_key(derivation: &Key, index: u64, base: &Key) -> Result<Key> {
    let b = crypto::decompress(base)?;
    let s = derivation_to_scalar(derivation, index);
    Ok(crypto::compress(&(crypto::base_mul(&s) + b)))
}

/// `H_s(D ‖ i) + b`.
pub fn derive_secret_key(derivation: &Key, index: u64, base: &SecretKey) -> SecretKey {
    SecretKey::from_scalar(&(derivation_to_scalar(derivation, index) + base.scalar()))
}

/// Recovers the spend public key an output was sent to: `P − H_s(D ‖ i)·G`.
pub fn derive_subaddress_public_key(out_key: &Key, derivation: &Key, index: u64) -> Result<Key> {
    let p = crypto::decompress(out_key)?;
    let s = derivation_to_scalar(derivation, index);
    Ok(crypto::compress(&(p - crypto::base_mul(&s))))
}

/// `x·H_p(P)`.
pub fn generate_key_image(out_key: &Key, secret: &SecretKey) -> Key {
    crypto::compress(&(secret.scalar() * crypto::hash_to_point(out_key)))
}

// -----------------------------------------------------------------------------
// Mnemonic
// -----------------------------------------------------------------------------

const SEED_WORDS: usize = 24;
const PREFIX_LEN: usize = 3;

static ENGLISH: Lazy<Vec<&'static str>> = Lazy::new(|| include_str!("english.txt").split_whitespace().collect());

/// Word index by unique prefix, so truncated words decode too.
static ENGLISH_PREFIXES: Lazy<HashMap<&'static str, u64>> =
    Lazy::new(|| ENGLISH.iter().enumerate().map(|(i, &w)| (prefix(w), i as u64)).collect());

fn prefix(word: &str) -> &str {
    match word.char_indices().nth(PREFIX_LEN) {
        Some((end, _)) => &word[..end],
        None => word,
    }
}

fn checksum_index(words: &[&str]) -> usize {
    let joined: String = words.iter().map(|w| prefix(w)).collect();
    crc32fast::hash(joined.as_bytes()) as usize % words.len()
}

/// Encodes a root secret as 24 words plus a checksum word.
///
/// Every 4 bytes (little-endian) become three words `w1, w2, w3` with
/// `w1 = x mod n`, `w2 = (x/n + w1) mod n`, `w3 = (x/n² + w2) mod n`.
pub fn key_to_words(key: &Key) -> String {
    let list = &*ENGLISH;
    let n = list.len() as u64;
    let mut words: Vec<&str> = Vec::with_capacity(SEED_WORDS + 1);
    for chunk in key.chunks_exact(4) {
        let x = u64::from(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        let w1 = x % n;
        let w2 = (x / n + w1) % n;
        let w3 = (x / n / n + w2) % n;
        words.extend([list[w1 as usize], list[w2 as usize], list[w3 as usize]]);
    }
    let check = words[checksum_index(&words)];
    words.push(check);
    words.join(" ")
}

/// Decodes a 25-word mnemonic (or 24 words without checksum) back to the
/// root secret. Words match on their first three letters.
pub fn words_to_key(text: &str) -> Result<Key> {
    let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    if words.len() != SEED_WORDS && words.len() != SEED_WORDS + 1 {
        return Err(WalletError::ArgsInvalid(format!("mnemonic has {} words, want 25", words.len())));
    }
    let n = ENGLISH.len() as u64;
    let indices = words[..SEED_WORDS]
        .iter()
        .map(|w| {
            ENGLISH_PREFIXES
                .get(prefix(w))
                .copied()
                .ok_or_else(|| WalletError::ArgsInvalid(format!("unknown mnemonic word '{w}'")))
        })
        .collect::<Result<Vec<u64>>>()?;

    let mut key = [0u8; 32];
    for (i, t) in indices.chunks_exact(3).enumerate() {
        let (w1, w2, w3) = (t[0], t[1], t[2]);
        let x = w1 + n * ((n - w1 + w2) % n) + n * n * ((n - w2 + w3) % n);
        let x = u32::try_from(x).map_err(|_| WalletError::InvalidKey)?;
        if u64::from(x) % n != w1 {
            return Err(WalletError::InvalidKey);
        }
        key[4 * i..4 * i + 4].copy_from_slice(&x.to_le_bytes());
    }

    if let Some(check) = words.get(SEED_WORDS) {
        let seed: Vec<&str> = words[..SEED_WORDS].iter().map(String::as_str).collect();
        if prefix(seed[checksum_index(&seed)]) != prefix(check) {
            return Err(WalletError::ArgsInvalid("mnemonic checksum mismatch".into()));
        }
    }
    Ok(key)
}

/// Maps subaddress spend public keys to their index, grown on demand.
pub struct SubaddressTable {
    by_spend: HashMap<Key, u32>,
    addresses: Vec<AccountAddress>,
    limit: u32,
}

impl SubaddressTable {
    pub fn new(limit: u32) -> Self {
        SubaddressTable { by_spend: HashMap::new(), addresses: Vec::new(), limit }
    }

    /// Make sure subaddresses `0..count` are materialised.
    pub fn expand(&mut self, keys: &AccountKeys, count: u32) -> Result<()> {
        if count > self.limit {
            return Err(WalletError::SubaccountTooLarge(u64::from(count)));
        }
        for index in self.addresses.len() as u32..count {
            let addr = keys.subaddress(index)?;
            self.by_spend.insert(addr.spend_public, index);
            self.addresses.push(addr);
        }
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.addresses.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&AccountAddress> {
        self.addresses.get(index as usize)
    }

    pub fn index_of(&self, spend_public: &Key) -> Option<u32> {
        self.by_spend.get(spend_public).copied()
    }

    /// Subaddress test of one output: returns the matching derivation position
    /// and the owning subaddress index.
    pub fn recognize(&self, out_key: &Key, derivations: &[Key], out_index: u64) -> Option<(usize, u32)> {
        derivations.iter().enumerate().find_map(|(k, d)| {
            let base = derive_subaddress_public_key(out_key, d, out_index).ok()?;
            self.index_of(&base).map(|idx| (k, idx))
        })
    }
}
