//! Transactions mixing plaintext account inputs/outputs with stealth UTXO
//! inputs/outputs, their TLV form, hashes and the stateless verification
//! counterpart of the builder.

use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use crate::address::ExternalAddress;
use crate::crypto::{self, Key};
use crate::envelope;
use crate::error::{Result, WalletError};
use crate::rct::{self, RctSig};
use crate::ringsig::KeyImage;
use crate::tlv::{self, Codec, RecordReader, RecordWriter};

/// Token identifier; the native coin is the zero address.
pub type TokenId = ExternalAddress;

pub const NATIVE_TOKEN: TokenId = [0u8; 20];

/// Cap on stealth outputs per transaction.
pub const MAX_UTXO_OUT: usize = 16;

const KIND_ACCOUNT: u8 = 1;
const KIND_UTXO: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Input {
    /// Plaintext spend from an externally signed account.
    Account { nonce: u64, amount: u128, cf: Key, commit: Key },
    /// Ring spend of a stealth output; offsets are relative.
    Utxo { key_offsets: Vec<u64>, key_image: Key },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Output {
    Account { to: ExternalAddress, amount: u128, data: Vec<u8>, commit: Key },
    Utxo { otaddr: Key, remark: Key },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub token_id: TokenId,
    pub r_key: Key,
    pub add_keys: Vec<Key>,
    /// Atomic units of the native coin.
    pub fee: u128,
    pub extra: Vec<u8>,
    /// External signature over the prefix hash; empty for UTXO-input txs.
    pub signature: Vec<u8>,
    pub rct_sig: RctSig,
}

/// Signs account inputs on behalf of the keystore.
pub trait AccountSigner: Send + Sync {
    fn address(&self) -> ExternalAddress;
    fn sign(&self, prefix_hash: &Key) -> Result<Vec<u8>>;
}

impl Input {
    pub fn is_account(&self) -> bool {
        matches!(self, Input::Account { .. })
    }

    pub fn key_image(&self) -> Option<KeyImage> {
        match self {
            Input::Utxo { key_image, .. } => Some(KeyImage(*key_image)),
            Input::Account { .. } => None,
        }
    }
}

impl Output {
    pub fn is_utxo(&self) -> bool {
        matches!(self, Output::Utxo { .. })
    }
}

/// Delta-encodes ring member indices; `offsets` must be sorted ascending.
pub fn absolute_to_relative(offsets: &[u64]) -> Result<Vec<u64>> {
    let mut prev = 0u64;
    offsets
        .iter()
        .map(|o| {
            let r = o
                .checked_sub(prev)
                .ok_or_else(|| WalletError::ArgsInvalid("key offsets not ascending".into()))?;
            prev = *o;
            Ok(r)
        })
        .collect()
}

pub fn relative_to_absolute(offsets: &[u64]) -> Result<Vec<u64>> {
    let mut acc = 0u64;
    offsets
        .iter()
        .map(|o| {
            acc = acc.checked_add(*o).ok_or_else(|| WalletError::TransInvalid("key offset overflow".into()))?;
            Ok(acc)
        })
        .collect()
}

/// `commit = cf·G + units·H` of an account input.
pub fn account_input_commit(cf: &Scalar, amount: u128) -> Result<Key> {
    let units = envelope::to_commit_units(amount)?;
    Ok(crypto::compress(&crypto::commit(cf, &Scalar::from(units))))
}

/// `commit = units·H` of an account output.
pub fn account_output_commit(amount: u128) -> Result<Key> {
    let units = envelope::to_commit_units(amount)?;
    Ok(crypto::scalarmult_h(&crypto::d2h(units)))
}

impl Transaction {
    pub fn utxo_inputs(&self) -> impl Iterator<Item = (&Vec<u64>, &Key)> {
        self.inputs.iter().filter_map(|i| match i {
            Input::Utxo { key_offsets, key_image } => Some((key_offsets, key_image)),
            Input::Account { .. } => None,
        })
    }

    pub fn key_images(&self) -> Vec<KeyImage> {
        self.inputs.iter().filter_map(Input::key_image).collect()
    }

    pub fn has_account_input(&self) -> bool {
        self.inputs.iter().any(Input::is_account)
    }

    /// Stealth outputs in order, with their position among stealth outputs.
    pub fn utxo_outputs(&self) -> impl Iterator<Item = (usize, &Key, &Key)> {
        self.outputs
            .iter()
            .filter_map(|o| match o {
                Output::Utxo { otaddr, remark } => Some((otaddr, remark)),
                Output::Account { .. } => None,
            })
            .enumerate()
            .map(|(i, (p, r))| (i, p, r))
    }

    fn write_prefix(&self, w: &mut RecordWriter<'_>) -> Result<()> {
        w.raw(1, &tlv::records(&self.inputs)?)?
            .raw(2, &tlv::records(&self.outputs)?)?
            .field(3, &self.token_id)?
            .field(4, &self.r_key)?
            .raw(5, &tlv::key_v(&self.add_keys)?)?
            .field(6, &self.fee)?
            .field(7, &self.extra)?;
        Ok(())
    }

    /// Keccak of the prefix fields; the message every signature binds.
    pub fn prefix_hash(&self) -> Result<Key> {
        let mut out = Vec::new();
        self.write_prefix(&mut RecordWriter::new(&mut out))?;
        Ok(crypto::keccak256(&out))
    }

    pub fn hash(&self) -> Result<Key> {
        Ok(crypto::keccak256(&tlv::encode(self)?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        tlv::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        tlv::decode(bytes)
    }

    /// Everything that can be checked without chain state: shape, plaintext
    /// commitments, range proofs, ring signatures and the commitment balance.
    pub fn verify(&self) -> Result<()> {
        let invalid = |m: &str| WalletError::TransInvalid(m.to_string());
        let accounts_in = self.inputs.iter().filter(|i| i.is_account()).count();
        if accounts_in > 0 && accounts_in != self.inputs.len() {
            return Err(WalletError::MixInputUnsupported);
        }
        if accounts_in > 1 {
            return Err(invalid("more than one account input"));
        }
        if self.outputs.iter().filter(|o| !o.is_utxo()).count() > 1 {
            return Err(invalid("more than one account output"));
        }
        let utxo_out: Vec<&Key> = self.utxo_outputs().map(|(_, p, _)| p).collect();
        if utxo_out.len() > MAX_UTXO_OUT {
            return Err(WalletError::DestsOverLimit);
        }

        let base = &self.rct_sig.base;
        if base.message != self.prefix_hash()? {
            return Err(invalid("rct message is not the prefix hash"));
        }
        if u128::from(base.txn_fee) * envelope::CHANGE_RATE != self.fee {
            return Err(invalid("fee mismatch"));
        }
        if base.out_pk.len() != utxo_out.len() || base.out_pk.iter().zip(&utxo_out).any(|(c, p)| c.dest != **p) {
            return Err(invalid("output keys do not match outPk"));
        }

        let mut extra_in = Vec::new();
        let mut extra_out = Vec::new();
        for input in &self.inputs {
            if let Input::Account { amount, cf, commit, .. } = input {
                let cf = crypto::sc_canonical(cf).ok_or_else(|| invalid("account input cf"))?;
                if account_input_commit(&cf, *amount)? != *commit {
                    return Err(invalid("account input commitment"));
                }
                extra_in.push(*commit);
            }
        }
        for output in &self.outputs {
            if let Output::Account { amount, commit, .. } = output {
                if account_output_commit(*amount)? != *commit {
                    return Err(invalid("account output commitment"));
                }
                extra_out.push(*commit);
            }
        }
        for ((offsets, _), ring) in self.utxo_inputs().zip(&base.mix_ring) {
            if offsets.len() != ring.len() {
                return Err(invalid("ring size does not match key offsets"));
            }
        }
        if accounts_in == 1 && self.signature.is_empty() {
            return Err(WalletError::SignFail("account input is unsigned".into()));
        }
        rct::ver_rct_simple(&self.rct_sig, &self.key_images(), &extra_in, &extra_out)
    }
}

impl Codec for Input {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        let kind = match self {
            Input::Account { nonce, amount, cf, commit } => {
                RecordWriter::new(&mut body)
                    .field(1, nonce)?
                    .field(2, amount)?
                    .field(3, cf)?
                    .field(4, commit)?;
                KIND_ACCOUNT
            }
            Input::Utxo { key_offsets, key_image } => {
                RecordWriter::new(&mut body)
                    .raw(1, &tlv::Packed(key_offsets.as_slice()).bytes()?)?
                    .field(2, key_image)?;
                KIND_UTXO
            }
        };
        RecordWriter::new(out).field(1, &kind)?.raw(2, &body)?;
        Ok(())
    }

    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        let kind: u8 = r.get(1)?;
        let inner = r.bytes(2)?;
        match kind {
            KIND_ACCOUNT => {
                let mut f = RecordReader::parse(&inner, &[1, 2, 3, 4])?;
                Ok(Input::Account { nonce: f.get(1)?, amount: f.get(2)?, cf: f.get(3)?, commit: f.get(4)? })
            }
            KIND_UTXO => {
                let mut f = RecordReader::parse(&inner, &[1, 2])?;
                Ok(Input::Utxo { key_offsets: tlv::unpack(&f.bytes(1)?, 8)?, key_image: f.get(2)? })
            }
            k => Err(WalletError::Tlv(format!("unknown input kind {k}"))),
        }
    }
}

impl Codec for Output {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        let kind = match self {
            Output::Account { to, amount, data, commit } => {
                RecordWriter::new(&mut body)
                    .field(1, to)?
                    .field(2, amount)?
                    .field(3, data)?
                    .field(4, commit)?;
                KIND_ACCOUNT
            }
            Output::Utxo { otaddr, remark } => {
                RecordWriter::new(&mut body).field(1, otaddr)?.field(2, remark)?;
                KIND_UTXO
            }
        };
        RecordWriter::new(out).field(1, &kind)?.raw(2, &body)?;
        Ok(())
    }

    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        let kind: u8 = r.get(1)?;
        let inner = r.bytes(2)?;
        match kind {
            KIND_ACCOUNT => {
                let mut f = RecordReader::parse(&inner, &[1, 2, 3, 4])?;
                Ok(Output::Account { to: f.get(1)?, amount: f.get(2)?, data: f.get(3)?, commit: f.get(4)? })
            }
            KIND_UTXO => {
                let mut f = RecordReader::parse(&inner, &[1, 2])?;
                Ok(Output::Utxo { otaddr: f.get(1)?, remark: f.get(2)? })
            }
            k => Err(WalletError::Tlv(format!("unknown output kind {k}"))),
        }
    }
}

impl Codec for Transaction {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut w = RecordWriter::new(out);
        self.write_prefix(&mut w)?;
        w.field(8, &self.signature)?.field(9, &self.rct_sig)?;
        Ok(())
    }

    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3, 4, 5, 6, 7, 8, 9])?;
        Ok(Transaction {
            inputs: tlv::read_records(&r.bytes(1)?)?,
            outputs: tlv::read_records(&r.bytes(2)?)?,
            token_id: r.get(3)?,
            r_key: r.get(4)?,
            add_keys: tlv::read_key_v(&r.bytes(5)?)?,
            fee: r.get(6)?,
            extra: r.get(7)?,
            signature: r.get(8)?,
            rct_sig: r.get(9)?,
        })
    }
}
