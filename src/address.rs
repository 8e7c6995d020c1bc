use serde::{Deserialize, Serialize};

use crate::crypto::{self, Key};
use crate::error::{Result, WalletError};

pub const MAIN_ADDRESS_PREFIX: u8 = 0x3c;
pub const SUBADDRESS_PREFIX: u8 = 0x50;

const CHECKSUM_LEN: usize = 4;
const RAW_LEN: usize = 1 + 32 + 32 + CHECKSUM_LEN;

/// Public spend/view pair identifying a stealth recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAddress {
    pub spend_public: Key,
    pub view_public: Key,
}

/// A decoded base58 address and whether it names a subaddress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedAddress {
    pub address: AccountAddress,
    pub is_subaddress: bool,
}

impl AccountAddress {
    /// `base58(prefix ‖ spend ‖ view ‖ sha256(prefix ‖ spend ‖ view)[..4])`.
    pub fn to_base58(&self, is_subaddress: bool) -> String {
        let mut raw = Vec::with_capacity(RAW_LEN);
        raw.push(if is_subaddress { SUBADDRESS_PREFIX } else { MAIN_ADDRESS_PREFIX });
        raw.extend_from_slice(&self.spend_public);
        raw.extend_from_slice(&self.view_public);
        let check = crypto::sha256(&raw);
        raw.extend_from_slice(&check[..CHECKSUM_LEN]);
        bs58::encode(raw).into_string()
    }
}

pub fn decode_address(s: &str) -> Result<ParsedAddress> {
    let raw = bs58::decode(s.trim())
        .into_vec()
        .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
    if raw.len() != RAW_LEN {
        return Err(WalletError::InvalidAddress(format!("length {}", raw.len())));
    }
    let (body, check) = raw.split_at(RAW_LEN - CHECKSUM_LEN);
    if crypto::sha256(body)[..CHECKSUM_LEN] != *check {
        return Err(WalletError::InvalidAddress("checksum mismatch".into()));
    }
    let is_subaddress = match body[0] {
        MAIN_ADDRESS_PREFIX => false,
        SUBADDRESS_PREFIX => true,
        p => return Err(WalletError::InvalidAddress(format!("unknown prefix {p:#x}"))),
    };
    let mut spend_public = [0u8; 32];
    let mut view_public = [0u8; 32];
    spend_public.copy_from_slice(&body[1..33]);
    view_public.copy_from_slice(&body[33..65]);
    if !crypto::check_key(&spend_public) || !crypto::check_key(&view_public) {
        return Err(WalletError::InvalidAddress("keys are not curve points".into()));
    }
    Ok(ParsedAddress { address: AccountAddress { spend_public, view_public }, is_subaddress })
}

/// 20-byte account (ethereum-style) address.
pub type ExternalAddress = [u8; 20];

pub fn parse_external(s: &str) -> Result<ExternalAddress> {
    let bytes = hex::decode(s.trim().trim_start_matches("0x"))
        .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::InvalidAddress(format!("{s} is not a 20-byte address")))
}

pub fn external_to_string(a: &ExternalAddress) -> String {
    format!("0x{}", hex::encode(a))
}
