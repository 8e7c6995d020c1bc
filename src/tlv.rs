//! Tag-length-value codec for confidential transaction structures.
//!
//! A frame is `tag (u16 LE) ‖ len (u16 LE) ‖ value`. A record is a sequence of
//! frames in ascending tag order, every field present. Values longer than
//! [`MAX_FRAME`] are split over consecutive frames with the same tag; a frame
//! of exactly `MAX_FRAME` bytes always announces a continuation. Integers
//! inside values are big-endian, curve keys are copied as-is.

use std::collections::BTreeMap;

use crate::address::AccountAddress;
use crate::crypto::Key;
use crate::error::{Result, WalletError};
use crate::rct::{
    BoroSig, Bulletproof, CtKey, EcdhTuple, MgSig, MultisigKLRki, RangeSig, RctConfig, RctSig, RctSigBase,
    RctSigPrunable, RctType,
};
use crate::ringsig::Signature;

pub const MAX_FRAME: usize = 0xffff;
const HEADER: usize = 4;

/// Width of a [`CtKey`] record.
pub const CTKEY_LEN: usize = 2 * (HEADER + 32);
/// Width of an [`EcdhTuple`] record.
pub const ECDH_LEN: usize = 3 * (HEADER + 32);

fn err(msg: impl Into<String>) -> WalletError {
    WalletError::Tlv(msg.into())
}

/// A value with a canonical TLV body.
pub trait Codec: Sized {
    fn write(&self, out: &mut Vec<u8>) -> Result<()>;
    fn read(body: &[u8]) -> Result<Self>;
}

pub fn encode<T: Codec>(v: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    v.write(&mut out)?;
    Ok(out)
}

pub fn decode<T: Codec>(bytes: &[u8]) -> Result<T> {
    T::read(bytes)
}

fn write_frames(out: &mut Vec<u8>, tag: u16, value: &[u8]) {
    for chunk in value.chunks(MAX_FRAME) {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    if value.len() % MAX_FRAME == 0 {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }
}

/// Builds one record; callers add fields in ascending tag order.
pub struct RecordWriter<'a> {
    out: &'a mut Vec<u8>,
    last: Option<u16>,
}

impl<'a> RecordWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        RecordWriter { out, last: None }
    }

    pub fn raw(&mut self, tag: u16, value: &[u8]) -> Result<&mut Self> {
        if self.last.is_some_and(|l| l >= tag) {
            return Err(err(format!("tag {tag} written out of order")));
        }
        self.last = Some(tag);
        write_frames(self.out, tag, value);
        Ok(self)
    }

    pub fn field<T: Codec>(&mut self, tag: u16, v: &T) -> Result<&mut Self> {
        let mut buf = Vec::new();
        v.write(&mut buf)?;
        self.raw(tag, &buf)
    }
}

/// Splits a record body into its fields, joining split frames.
pub struct RecordReader {
    fields: BTreeMap<u16, Vec<u8>>,
}

impl RecordReader {
    pub fn parse(body: &[u8], known: &[u16]) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let mut pos = 0usize;
        let mut last: Option<u16> = None;
        while pos < body.len() {
            let (tag, mut value, next) = read_frame(body, pos)?;
            pos = next;
            let mut chunk_len = value.len();
            while chunk_len == MAX_FRAME {
                let (t, more, next) = read_frame(body, pos)?;
                if t != tag {
                    return Err(err(format!("split frame {tag} interrupted by {t}")));
                }
                pos = next;
                chunk_len = more.len();
                value.extend_from_slice(&more);
            }
            if !known.contains(&tag) {
                return Err(err(format!("unknown tag {tag}")));
            }
            if last.is_some_and(|l| l >= tag) {
                return Err(err(format!("tag {tag} out of order")));
            }
            last = Some(tag);
            fields.insert(tag, value);
        }
        Ok(RecordReader { fields })
    }

    pub fn bytes(&mut self, tag: u16) -> Result<Vec<u8>> {
        self.fields.remove(&tag).ok_or_else(|| err(format!("missing tag {tag}")))
    }

    pub fn get<T: Codec>(&mut self, tag: u16) -> Result<T> {
        let b = self.bytes(tag)?;
        T::read(&b)
    }
}

fn read_frame(body: &[u8], pos: usize) -> Result<(u16, Vec<u8>, usize)> {
    if body.len() < pos + HEADER {
        return Err(err("short frame header"));
    }
    let tag = u16::from_le_bytes([body[pos], body[pos + 1]]);
    let len = u16::from_le_bytes([body[pos + 2], body[pos + 3]]) as usize;
    let start = pos + HEADER;
    if body.len() < start + len {
        return Err(err(format!("frame {tag} overruns its record")));
    }
    Ok((tag, body[start..start + len].to_vec(), start + len))
}

// -----------------------------------------------------------------------------
// Primitives
// -----------------------------------------------------------------------------

fn fixed<const N: usize>(body: &[u8]) -> Result<[u8; N]> {
    body.try_into().map_err(|_| err(format!("expected {N} bytes, got {}", body.len())))
}

impl<const N: usize> Codec for [u8; N] {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(self);
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        fixed::<N>(body)
    }
}

impl Codec for u8 {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(*self);
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        Ok(fixed::<1>(body)?[0])
    }
}

impl Codec for u64 {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(fixed(body)?))
    }
}

impl Codec for i32 {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        Ok(i32::from_be_bytes(fixed(body)?))
    }
}

impl Codec for u128 {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        Ok(u128::from_be_bytes(fixed(body)?))
    }
}

impl Codec for Vec<u8> {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(self);
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        Ok(body.to_vec())
    }
}

// -----------------------------------------------------------------------------
// Arrays
// -----------------------------------------------------------------------------

/// Fixed-width elements, concatenated without framing.
pub struct Packed<'a, T>(pub &'a [T]);

impl<T: Codec> Packed<'_, T> {
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for item in self.0 {
            item.write(&mut out)?;
        }
        Ok(out)
    }
}

pub fn unpack<T: Codec>(body: &[u8], width: usize) -> Result<Vec<T>> {
    if body.len() % width != 0 {
        return Err(err(format!("array length {} not a multiple of {width}", body.len())));
    }
    body.chunks(width).map(T::read).collect()
}

/// Variable-width elements, each framed with its index as tag.
pub fn indexed<T>(items: &[T], mut f: impl FnMut(&T, &mut Vec<u8>) -> Result<()>) -> Result<Vec<u8>> {
    if items.len() > usize::from(u16::MAX) {
        return Err(err("list too long"));
    }
    let mut out = Vec::new();
    let mut w = RecordWriter::new(&mut out);
    for (i, item) in items.iter().enumerate() {
        let mut buf = Vec::new();
        f(item, &mut buf)?;
        w.raw(i as u16, &buf)?;
    }
    Ok(out)
}

pub fn unindex<T>(body: &[u8], mut f: impl FnMut(&[u8]) -> Result<T>) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        let (tag, mut value, next) = read_frame(body, pos)?;
        pos = next;
        let mut chunk_len = value.len();
        while chunk_len == MAX_FRAME {
            let (t, more, next) = read_frame(body, pos)?;
            if t != tag {
                return Err(err("split list element interrupted"));
            }
            pos = next;
            chunk_len = more.len();
            value.extend_from_slice(&more);
        }
        if usize::from(tag) != items.len() {
            return Err(err(format!("list element {tag} out of sequence")));
        }
        items.push(f(&value)?);
    }
    Ok(items)
}

pub fn key_v(keys: &[Key]) -> Result<Vec<u8>> {
    Packed(keys).bytes()
}

pub fn read_key_v(body: &[u8]) -> Result<Vec<Key>> {
    unpack(body, 32)
}

fn key_m(rows: &[Vec<Key>]) -> Result<Vec<u8>> {
    indexed(rows, |row, out| {
        out.extend_from_slice(&key_v(row)?);
        Ok(())
    })
}

fn read_key_m(body: &[u8]) -> Result<Vec<Vec<Key>>> {
    unindex(body, read_key_v)
}

pub fn records<T: Codec>(items: &[T]) -> Result<Vec<u8>> {
    indexed(items, |item, out| item.write(out))
}

pub fn read_records<T: Codec>(body: &[u8]) -> Result<Vec<T>> {
    unindex(body, T::read)
}

// -----------------------------------------------------------------------------
// Records
// -----------------------------------------------------------------------------

impl Codec for CtKey {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out).field(1, &self.dest)?.field(2, &self.mask)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        Ok(CtKey { dest: r.get(1)?, mask: r.get(2)? })
    }
}

impl Codec for EcdhTuple {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out)
            .field(1, &self.mask)?
            .field(2, &self.amount)?
            .field(3, &self.sender_pk)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3])?;
        Ok(EcdhTuple { mask: r.get(1)?, amount: r.get(2)?, sender_pk: r.get(3)? })
    }
}

impl Codec for BoroSig {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out)
            .field(1, &self.ee)?
            .raw(2, &key_v(&self.s0)?)?
            .raw(3, &key_v(&self.s1)?)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3])?;
        Ok(BoroSig { ee: r.get(1)?, s0: read_key_v(&r.bytes(2)?)?, s1: read_key_v(&r.bytes(3)?)? })
    }
}

impl Codec for RangeSig {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out).field(1, &self.asig)?.raw(2, &key_v(&self.ci)?)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        Ok(RangeSig { asig: r.get(1)?, ci: read_key_v(&r.bytes(2)?)? })
    }
}

impl Codec for MgSig {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out)
            .field(1, &self.cc)?
            .raw(2, &key_v(&self.ii)?)?
            .raw(3, &key_m(&self.ss)?)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3])?;
        Ok(MgSig { cc: r.get(1)?, ii: read_key_v(&r.bytes(2)?)?, ss: read_key_m(&r.bytes(3)?)? })
    }
}

impl Codec for Bulletproof {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out)
            .raw(1, &key_v(&self.v)?)?
            .field(2, &self.a)?
            .field(3, &self.s)?
            .field(4, &self.t1)?
            .field(5, &self.t2)?
            .field(6, &self.taux)?
            .field(7, &self.mu)?
            .raw(8, &key_v(&self.l)?)?
            .raw(9, &key_v(&self.r)?)?
            .field(10, &self.a_final)?
            .field(11, &self.b)?
            .field(12, &self.t)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])?;
        Ok(Bulletproof {
            v: read_key_v(&r.bytes(1)?)?,
            a: r.get(2)?,
            s: r.get(3)?,
            t1: r.get(4)?,
            t2: r.get(5)?,
            taux: r.get(6)?,
            mu: r.get(7)?,
            l: read_key_v(&r.bytes(8)?)?,
            r: read_key_v(&r.bytes(9)?)?,
            a_final: r.get(10)?,
            b: r.get(11)?,
            t: r.get(12)?,
        })
    }
}

impl Codec for Signature {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out).field(1, &self.c)?.field(2, &self.r)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        Ok(Signature { c: r.get(1)?, r: r.get(2)? })
    }
}

impl Codec for RctConfig {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out).field(1, &self.bp_version)?.field(2, &self.range_proof_type)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        Ok(RctConfig { bp_version: r.get(1)?, range_proof_type: r.get(2)? })
    }
}

impl Codec for RctSigBase {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mix_ring = indexed(&self.mix_ring, |ring, out| {
            out.extend_from_slice(&Packed(ring.as_slice()).bytes()?);
            Ok(())
        })?;
        RecordWriter::new(out)
            .field(1, &(self.rct_type as u8))?
            .field(2, &self.message)?
            .raw(3, &mix_ring)?
            .raw(4, &key_v(&self.pseudo_outs)?)?
            .raw(5, &Packed(self.ecdh_info.as_slice()).bytes()?)?
            .raw(6, &Packed(self.out_pk.as_slice()).bytes()?)?
            .field(7, &self.txn_fee)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3, 4, 5, 6, 7])?;
        Ok(RctSigBase {
            rct_type: RctType::try_from(r.get::<u8>(1)?)?,
            message: r.get(2)?,
            mix_ring: unindex(&r.bytes(3)?, |b| unpack(b, CTKEY_LEN))?,
            pseudo_outs: read_key_v(&r.bytes(4)?)?,
            ecdh_info: unpack(&r.bytes(5)?, ECDH_LEN)?,
            out_pk: unpack(&r.bytes(6)?, CTKEY_LEN)?,
            txn_fee: r.get(7)?,
        })
    }
}

impl Codec for RctSigPrunable {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out)
            .raw(1, &records(&self.range_sigs)?)?
            .raw(2, &records(&self.bulletproofs)?)?
            .raw(3, &records(&self.mgs)?)?
            .raw(4, &key_v(&self.pseudo_outs)?)?
            .raw(5, &records(&self.ss)?)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3, 4, 5])?;
        Ok(RctSigPrunable {
            range_sigs: read_records(&r.bytes(1)?)?,
            bulletproofs: read_records(&r.bytes(2)?)?,
            mgs: read_records(&r.bytes(3)?)?,
            pseudo_outs: read_key_v(&r.bytes(4)?)?,
            ss: read_records(&r.bytes(5)?)?,
        })
    }
}

impl Codec for RctSig {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out).field(1, &self.prunable)?.field(2, &self.base)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        Ok(RctSig { prunable: r.get(1)?, base: r.get(2)? })
    }
}

impl Codec for AccountAddress {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out).field(1, &self.spend_public)?.field(2, &self.view_public)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2])?;
        Ok(AccountAddress { spend_public: r.get(1)?, view_public: r.get(2)? })
    }
}

/// Address plus both secret keys, the export form of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKeyRecord {
    pub address: AccountAddress,
    pub spend_secret: Key,
    pub view_secret: Key,
}

impl Codec for AccountKeyRecord {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out)
            .field(1, &self.address)?
            .field(2, &self.spend_secret)?
            .field(3, &self.view_secret)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3])?;
        Ok(AccountKeyRecord { address: r.get(1)?, spend_secret: r.get(2)?, view_secret: r.get(3)? })
    }
}

impl Codec for MultisigKLRki {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        RecordWriter::new(out)
            .field(1, &self.k)?
            .field(2, &self.ki)?
            .field(3, &self.l)?
            .field(4, &self.r)?;
        Ok(())
    }
    fn read(body: &[u8]) -> Result<Self> {
        let mut r = RecordReader::parse(body, &[1, 2, 3, 4])?;
        Ok(MultisigKLRki { k: r.get(1)?, ki: r.get(2)?, l: r.get(3)?, r: r.get(4)? })
    }
}
