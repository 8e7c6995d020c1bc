// TLV Codec Tests
// Frame layout, split values, strict parsing and full transaction encoding.

use ctcwallet::{
    address::{AccountAddress, ExternalAddress},
    builder,
    crypto::{self, Key},
    keys::AccountKeys,
    rct::{BoroSig, CtKey, MultisigKLRki, RangeSig, RctConfig},
    selection::Destination,
    tlv::{self, AccountKeyRecord, RecordReader, RecordWriter, CTKEY_LEN, MAX_FRAME},
    transaction::{self, AccountSigner, Transaction, NATIVE_TOKEN},
    Result, WalletError,
};

struct EchoSigner;

impl AccountSigner for EchoSigner {
    fn address(&self) -> ExternalAddress {
        [0x11; 20]
    }

    fn sign(&self, prefix_hash: &Key) -> Result<Vec<u8>> {
        Ok(prefix_hash.to_vec())
    }
}

#[test]
fn test_frame_layout() {
    println!("🧪 Testing the byte layout of a record...");
    let ct = CtKey { dest: [0xaa; 32], mask: [0xbb; 32] };
    let bytes = tlv::encode(&ct).expect("encode");
    assert_eq!(bytes.len(), CTKEY_LEN);
    assert_eq!(&bytes[..4], &[1, 0, 32, 0], "tag 1, length 32, little-endian");
    assert_eq!(&bytes[4..36], &[0xaa; 32]);
    assert_eq!(&bytes[36..40], &[2, 0, 32, 0]);
    assert_eq!(tlv::decode::<CtKey>(&bytes).expect("decode"), ct);

    let mut out = Vec::new();
    RecordWriter::new(&mut out).field(3, &0x0102u64).expect("write");
    assert_eq!(out, vec![3, 0, 8, 0, 0, 0, 0, 0, 0, 0, 1, 2], "integers are big-endian");
    println!("  ✅ Frames are tag ‖ len ‖ value");
}

#[test]
fn test_split_frames() {
    println!("🧪 Testing values longer than one frame...");
    for len in [MAX_FRAME - 1, MAX_FRAME, MAX_FRAME + 10, 2 * MAX_FRAME] {
        let value: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        RecordWriter::new(&mut out).raw(1, &value).expect("write").raw(2, b"tail").expect("write");

        let frames = len / MAX_FRAME + 1;
        assert_eq!(out.len(), len + 4 * frames + 4 + 4, "len {len} uses {frames} frames");
        let mut r = RecordReader::parse(&out, &[1, 2]).expect("parse");
        assert_eq!(r.bytes(1).expect("field 1"), value);
        assert_eq!(r.bytes(2).expect("field 2"), b"tail".to_vec());
    }
    println!("  ✅ A full frame always announces a continuation");

    // : empty values still produce one frame
    let mut out = Vec::new();
    RecordWriter::new(&mut out).raw(7, &[]).expect("write");
    assert_eq!(out, vec![7, 0, 0, 0]);
}

#[test]
fn test_exact_frame_gets_empty_terminator() {
    println!("🧪 Testing a value of exactly one full frame...");
    let value = vec![0x5a; MAX_FRAME];
    let mut out = Vec::new();
    RecordWriter::new(&mut out).raw(4, &value).expect("write");

    // : full frame, then an empty frame closing the value
    assert_eq!(out.len(), 4 + MAX_FRAME + 4);
    assert_eq!(&out[..4], &[4, 0, 0xff, 0xff]);
    assert_eq!(&out[4 + MAX_FRAME..], &[4, 0, 0, 0]);
    let mut r = RecordReader::parse(&out, &[4]).expect("parse");
    assert_eq!(r.bytes(4).expect("field 4"), value);

    // : without the terminator the value is incomplete
    assert!(RecordReader::parse(&out[..4 + MAX_FRAME], &[4]).is_err());
    println!("  ✅ Full frame is followed by a zero-length frame");
}

#[test]
fn test_proof_and_key_records() {
    println!("🧪 Testing config, Borromean, key and multisig records...");
    let cfg = RctConfig { bp_version: 2, range_proof_type: 4 };
    let bytes = tlv::encode(&cfg).expect("encode config");
    assert_eq!(bytes, vec![1, 0, 4, 0, 0, 0, 0, 2, 2, 0, 1, 0, 4]);
    assert_eq!(tlv::decode::<RctConfig>(&bytes).expect("decode config"), cfg);
    let negative = RctConfig { bp_version: -1, range_proof_type: 0 };
    assert_eq!(tlv::decode::<RctConfig>(&tlv::encode(&negative).expect("encode")).expect("decode"), negative);

    let key = |b: u8| -> Key { [b; 32] };
    let boro = BoroSig { s0: (0..64).map(key).collect(), s1: (64..128).map(key).collect(), ee: key(0xee) };
    let boro_bytes = tlv::encode(&boro).expect("encode borromean");
    assert_eq!(tlv::decode::<BoroSig>(&boro_bytes).expect("decode borromean"), boro);

    let range = RangeSig { asig: boro.clone(), ci: (200..255).map(key).collect() };
    let range_bytes = tlv::encode(&range).expect("encode range");
    assert_eq!(tlv::decode::<RangeSig>(&range_bytes).expect("decode range"), range);
    assert!(tlv::decode::<RangeSig>(&boro_bytes).is_err(), "a Borromean body is not a range record");

    let empty = RangeSig::default();
    assert_eq!(tlv::decode::<RangeSig>(&tlv::encode(&empty).expect("encode")).expect("decode"), empty);

    let keys = AccountKeys::from_root(&crypto::keccak256(b"exported account"));
    let export = AccountKeyRecord {
        address: AccountAddress { spend_public: key(1), view_public: key(2) },
        spend_secret: key(3),
        view_secret: key(4),
    };
    let export_bytes = tlv::encode(&export).expect("encode account");
    assert_eq!(export_bytes.len(), 4 + CTKEY_LEN + 2 * (4 + 32));
    assert_eq!(tlv::decode::<AccountKeyRecord>(&export_bytes).expect("decode account"), export);
    let real = AccountKeyRecord {
        address: keys.main_address(),
        spend_secret: *keys.spend_secret().as_bytes(),
        view_secret: *keys.view_secret().as_bytes(),
    };
    assert_eq!(tlv::decode::<AccountKeyRecord>(&tlv::encode(&real).expect("encode")).expect("decode"), real);

    let klrki = MultisigKLRki { k: key(9), ki: key(10), l: key(11), r: key(12) };
    let klrki_bytes = tlv::encode(&klrki).expect("encode multisig");
    assert_eq!(klrki_bytes.len(), 4 * (4 + 32));
    assert_eq!(&klrki_bytes[108..112], &[4, 0, 32, 0]);
    assert_eq!(tlv::decode::<MultisigKLRki>(&klrki_bytes).expect("decode multisig"), klrki);
    assert!(tlv::decode::<MultisigKLRki>(&klrki_bytes[..CTKEY_LEN]).is_err(), "all four fields required");
    println!("  ✅ Records decode to the values written");
}

#[test]
fn test_strict_parsing() {
    println!("🧪 Testing malformed records are rejected...");
    let ct = tlv::encode(&CtKey { dest: [1; 32], mask: [2; 32] }).expect("encode");

    assert!(matches!(RecordReader::parse(&ct, &[1]), Err(WalletError::Tlv(_))), "unknown tag");
    assert!(tlv::decode::<CtKey>(&ct[..ct.len() - 1]).is_err(), "truncated value");
    assert!(tlv::decode::<CtKey>(&ct[..2]).is_err(), "truncated header");

    let mut swapped = ct[36..].to_vec();
    swapped.extend_from_slice(&ct[..36]);
    assert!(tlv::decode::<CtKey>(&swapped).is_err(), "descending tags");

    let mut out = Vec::new();
    let mut w = RecordWriter::new(&mut out);
    w.raw(2, b"x").expect("write");
    assert!(w.raw(1, b"y").is_err(), "writer enforces ascending tags");

    let mut short = Vec::new();
    RecordWriter::new(&mut short).field(1, &[9u8; 31]).expect("write").field(2, &[9u8; 32]).expect("write");
    assert!(tlv::decode::<CtKey>(&short).is_err(), "keys are exactly 32 bytes");
    println!("  ✅ Unknown, missing and misordered fields fail");
}

#[test]
fn test_transaction_encoding() {
    println!("🧪 Testing a signed transaction survives encoding...");
    let keys = AccountKeys::from_root(&crypto::keccak256(b"tlv test account"));
    let dests = vec![
        Destination::Utxo {
            address: keys.main_address(),
            is_subaddress: false,
            amount: 7 * 10u128.pow(17),
            remark: [3; 32],
            is_change: false,
        },
        Destination::Account { to: [0x55; 20], amount: 10u128.pow(18), data: b"memo".to_vec() },
    ];
    let built = builder::build_account_tx(&EchoSigner, 4, NATIVE_TOKEN, &dests, b"extra".to_vec(), false)
        .expect("build");

    let raw = built.tx.to_bytes().expect("encode");
    let decoded = Transaction::from_bytes(&raw).expect("decode");
    assert_eq!(decoded, built.tx);
    assert_eq!(decoded.hash().expect("hash"), built.hash);
    decoded.verify().expect("decoded tx still verifies");
    println!("  ✅ {} byte transaction decodes identically", raw.len());

    // : the prefix hash ignores the signature, the full hash does not
    let mut resigned = decoded.clone();
    resigned.signature = vec![0; 65];
    assert_eq!(resigned.prefix_hash().expect("prefix"), decoded.prefix_hash().expect("prefix"));
    assert_ne!(resigned.hash().expect("hash"), decoded.hash().expect("hash"));

    let mut tampered = decoded;
    tampered.fee += 10_000_000_000;
    assert!(tampered.verify().is_err(), "fee is part of the signed prefix");
}

#[test]
fn test_key_offsets() {
    println!("🧪 Testing ring member offset encoding...");
    let absolute = vec![3, 10, 10, 250, 1_000_000];
    let relative = transaction::absolute_to_relative(&absolute).expect("ascending");
    assert_eq!(relative, vec![3, 7, 0, 240, 999_750]);
    assert_eq!(transaction::relative_to_absolute(&relative).expect("sum"), absolute);

    // : descending indices are rejected instead of wrapping
    assert!(matches!(transaction::absolute_to_relative(&[10, 9]), Err(WalletError::ArgsInvalid(_))));
    assert!(transaction::relative_to_absolute(&[u64::MAX, 1]).is_err());
    println!("  ✅ Offsets round-trip and misordering fails");
}
