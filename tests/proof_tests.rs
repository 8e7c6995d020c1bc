// Signature and Range Proof Tests
// Ring signatures, MLSAG input signatures and bulletproof range limits.

use curve25519_dalek::scalar::Scalar;
use ctcwallet::{
    bulletproof,
    crypto::{self, Key, SecretKey},
    envelope, keys, mlsag,
    rct::CtKey,
    ringsig::{self, CryptoNoteRing, KeyImage, RingSignatureScheme},
};

fn k(hex: &str) -> Key {
    crypto::key_from_hex(hex).expect("valid hex key")
}

#[test]
fn test_ring_signature_vector() {
    println!("🧪 Testing single-member ring signature against a known key...");
    let hash = k("2c2516a09841352ca35aab502a33cb544dd603634419d10767b844d57f0d570f");
    let image = KeyImage(k("9797bc0f8df768f44ea13e18c0335f821a215cf971909f2e16eb3c27f79e2d1e"));
    let public = k("a848fa34a9eb4f3e03e195ee02dd9bd3aa29c21562d5e4cd24ed85223c32ff7b");
    let secret = SecretKey::from_bytes(k("95898948acd114cb712a6e4c7a2bdd91cb9b9e3690380acf8a8b1e5f9b73960d"));

    assert_eq!(keys::generate_key_image(&public, &secret), image.0);
    let sig = ringsig::generate_ring_signature(&hash, &image, &[public], &secret, 0).expect("sign");
    assert!(ringsig::check_ring_signature(&hash, &image, &[public], &sig));
    println!("  ✅ Signature verifies");

    // : any other message fails
    let mut other = hash;
    other[0] ^= 1;
    assert!(!ringsig::check_ring_signature(&other, &image, &[public], &sig));

    // : a signature under the wrong image fails
    let wrong = KeyImage(keys::generate_key_image(&public, &SecretKey::random()));
    assert!(!ringsig::check_ring_signature(&hash, &wrong, &[public], &sig));
    println!("  ✅ Forgeries rejected");
}

#[test]
fn test_ring_signature_with_decoys() {
    println!("🧪 Testing ring signatures over a ring of five...");
    let secret = SecretKey::random();
    let mut ring: Vec<Key> = (0..5).map(|_| SecretKey::random().public_key()).collect();
    ring[2] = secret.public_key();
    let message = crypto::keccak256(b"ring message");

    let scheme = CryptoNoteRing;
    let (sig, image) = scheme.sign(&message, &ring, &secret, 2).expect("sign");
    assert!(scheme.verify(&message, &ring, &sig, &image));
    assert!(!scheme.verify(&message, &ring[..4], &sig[..4].to_vec(), &image));
    assert!(scheme.sign(&message, &ring, &secret, 9).is_err());
    println!("  ✅ Five-member ring verifies, truncated ring does not");
}

#[test]
fn test_mlsag_simple_input() {
    println!("🧪 Testing MLSAG over a ring with commitments...");
    let message = crypto::keccak256(b"pre-mlsag hash");
    let amount = 5_000u64;

    let secret = SecretKey::random();
    let in_mask = crypto::random_scalar();
    let real = CtKey { dest: secret.public_key(), mask: crypto::gen_c(&in_mask.to_bytes(), amount) };
    let mut ring: Vec<CtKey> = (0..4)
        .map(|i| CtKey {
            dest: SecretKey::random().public_key(),
            mask: crypto::gen_c(&crypto::random_scalar().to_bytes(), 100 + i),
        })
        .collect();
    ring.insert(1, real);

    let pseudo_mask = crypto::random_scalar();
    let pseudo_out = crypto::compress(&crypto::commit(&pseudo_mask, &Scalar::from(amount)));
    let sig = mlsag::prove_rct_mg_simple(&message, &ring, &secret, &in_mask, &pseudo_mask, &pseudo_out, 1)
        .expect("sign");
    assert_eq!(sig.ii, vec![keys::generate_key_image(&real.dest, &secret)]);
    assert!(mlsag::ver_rct_mg_simple(&message, &sig, &ring, &pseudo_out));
    println!("  ✅ Input signature verifies and links to the key image");

    // : a pseudo output committing to another amount breaks the balance row
    let inflated = crypto::compress(&crypto::commit(&pseudo_mask, &Scalar::from(amount + 1)));
    assert!(!mlsag::ver_rct_mg_simple(&message, &sig, &ring, &inflated));
    let mut moved = ring.clone();
    moved.swap(0, 1);
    assert!(!mlsag::ver_rct_mg_simple(&message, &sig, &moved, &pseudo_out));
    println!("  ✅ Tampered rings rejected");
}

fn amount_key(v: u128) -> Key {
    let mut k = [0u8; 32];
    k[..16].copy_from_slice(&v.to_le_bytes());
    k
}

#[test]
fn test_bulletproof_range_limits() {
    println!("🧪 Testing bulletproof range boundaries...");
    let mask = || vec![crypto::random_scalar()];

    let ok = bulletproof::prove(&[envelope::amount_to_key(1_000_000_000_000_000_000)], &mask(), 64).expect("prove");
    assert_eq!(bulletproof::proof_bits(&ok), Some(64));
    assert!(bulletproof::verify(&[&ok]));
    println!("  ✅ 1e18 proves in 64 bits");

    let over = bulletproof::prove(&[amount_key(1u128 << 64)], &mask(), 64).expect("prove");
    assert!(!bulletproof::verify(&[&over]), "2^64 is out of the 64-bit range");

    let max128 = bulletproof::prove(&[amount_key(u128::MAX)], &mask(), 128).expect("prove");
    assert_eq!(bulletproof::proof_bits(&max128), Some(128));
    assert!(bulletproof::verify(&[&max128]));

    let mut two_128 = [0u8; 32];
    two_128[16] = 1;
    let over128 = bulletproof::prove(&[two_128], &mask(), 128).expect("prove");
    assert!(!bulletproof::verify(&[&over128]), "2^128 is out of the 128-bit range");
    println!("  ✅ 128-bit range is [0, 2^128)");

    // : one bad proof fails the whole batch
    assert!(bulletproof::verify(&[&ok, &max128]));
    assert!(!bulletproof::verify(&[&ok, &over]));
    assert!(bulletproof::prove(&[amount_key(1)], &mask(), 32).is_err());
}

#[test]
fn test_aggregated_bulletproof() {
    println!("🧪 Testing aggregated proofs over three outputs...");
    let amounts: Vec<Key> = [1u64, 2_000, u64::MAX].iter().map(|a| envelope::amount_to_key(*a)).collect();
    let masks: Vec<Scalar> = (0..3).map(|_| crypto::random_scalar()).collect();
    let bp = bulletproof::prove(&amounts, &masks, 64).expect("prove");
    assert_eq!(bp.v.len(), 3);
    assert_eq!(bp.l.len(), 8, "padded to four outputs: log2(4·64)");
    assert!(bulletproof::verify(&[&bp]));

    let mut tampered = bp.clone();
    tampered.v.swap(0, 1);
    assert!(!bulletproof::verify(&[&tampered]));
    println!("  ✅ Aggregated proof verifies");
}
