//! Bulletproof range proofs over 64- or 128-bit amounts, with batched
//! verification.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::{IsIdentity, MultiscalarMul, VartimeMultiscalarMul};
use once_cell::sync::Lazy;

use crate::crypto::{self, Key, H, H_BYTES, INV_EIGHT};
use crate::error::{Result, WalletError};
use crate::rct::Bulletproof;

/// Upper bound on aggregated commitments per proof.
pub const MAX_OUTPUTS: usize = 16;
const MAX_BITS: usize = 128;
const MAX_MN: usize = MAX_OUTPUTS * MAX_BITS;

struct Generators {
    g: Vec<EdwardsPoint>,
    h: Vec<EdwardsPoint>,
}

static GENERATORS: Lazy<Generators> = Lazy::new(|| {
    let mut g = Vec::with_capacity(MAX_MN);
    let mut h = Vec::with_capacity(MAX_MN);
    for i in 0..MAX_MN as u64 {
        h.push(get_exponent(2 * i));
        g.push(get_exponent(2 * i + 1));
    }
    Generators { g, h }
});

fn get_exponent(index: u64) -> EdwardsPoint {
    let mut data = H_BYTES.to_vec();
    data.extend_from_slice(b"bulletproof");
    crypto::write_varint(index, &mut data);
    crypto::hash_to_point(&crypto::keccak256(&data))
}

/// Fiat-Shamir state: every challenge is `H_s(previous ‖ items…)`.
struct Transcript(Key);

impl Transcript {
    fn start(v: &[Key]) -> Self {
        let parts: Vec<&[u8]> = v.iter().map(|k| &k[..]).collect();
        Transcript(crypto::hash_to_scalar_parts(&parts).to_bytes())
    }

    fn mash(&mut self, items: &[&Key]) -> Scalar {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(items.len() + 1);
        parts.push(&self.0);
        parts.extend(items.iter().map(|k| &k[..]));
        let s = crypto::hash_to_scalar_parts(&parts);
        self.0 = s.to_bytes();
        s
    }

    /// `z` is hashed from `y` alone.
    fn rehash(&mut self) -> Scalar {
        let s = crypto::hash_to_scalar(&self.0);
        self.0 = s.to_bytes();
        s
    }
}

fn bit(amount: &Key, i: usize) -> Scalar {
    Scalar::from(u64::from((amount[i / 8] >> (i % 8)) & 1))
}

fn powers(base: &Scalar, n: usize) -> Vec<Scalar> {
    let mut out = Vec::with_capacity(n);
    let mut acc = Scalar::ONE;
    for _ in 0..n {
        out.push(acc);
        acc *= base;
    }
    out
}

fn inner(a: &[Scalar], b: &[Scalar]) -> Scalar {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn scaled(p: EdwardsPoint) -> Key {
    crypto::compress(&(p * *INV_EIGHT))
}

fn two_pow_minus_one(bits: usize) -> Scalar {
    let mut k = [0u8; 32];
    for i in 0..bits {
        k[i / 8] |= 1 << (i % 8);
    }
    Scalar::from_bytes_mod_order(k)
}

/// Prove that every `amounts[i]` (little-endian) lies in `[0, 2^bits)`.
/// The returned proof carries `V = (mask·G + amount·H)/8`.
pub fn prove(amounts: &[Key], masks: &[Scalar], bits: usize) -> Result<Bulletproof> {
    if bits != 64 && bits != 128 {
        return Err(WalletError::ArgsInvalid(format!("unsupported range size {bits}")));
    }
    if amounts.is_empty() || amounts.len() > MAX_OUTPUTS || amounts.len() != masks.len() {
        return Err(WalletError::ArgsInvalid("bad bulletproof dimensions".into()));
    }
    let m = amounts.len().next_power_of_two();
    let mn = m * bits;
    let gens = &*GENERATORS;
    let (gi, hi) = (&gens.g[..mn], &gens.h[..mn]);

    let v: Vec<Key> = amounts
        .iter()
        .zip(masks)
        .map(|(a, gamma)| scaled(crypto::commit(gamma, &crypto::sc_reduce(a))))
        .collect();

    let mut a_l = vec![Scalar::ZERO; mn];
    let mut a_r = vec![-Scalar::ONE; mn];
    for (j, amount) in amounts.iter().enumerate() {
        for i in 0..bits {
            let b = bit(amount, i);
            a_l[j * bits + i] = b;
            a_r[j * bits + i] = b - Scalar::ONE;
        }
    }

    'attempt: loop {
        let mut ts = Transcript::start(&v);

        let alpha = crypto::random_scalar();
        let a_pt = scaled(
            EdwardsPoint::multiscalar_mul(a_l.iter().chain(&a_r), gi.iter().chain(hi)) + crypto::base_mul(&alpha),
        );

        let s_l: Vec<Scalar> = (0..mn).map(|_| crypto::random_scalar()).collect();
        let s_r: Vec<Scalar> = (0..mn).map(|_| crypto::random_scalar()).collect();
        let rho = crypto::random_scalar();
        let s_pt = scaled(
            EdwardsPoint::multiscalar_mul(s_l.iter().chain(&s_r), gi.iter().chain(hi)) + crypto::base_mul(&rho),
        );

        let y = ts.mash(&[&a_pt, &s_pt]);
        if y == Scalar::ZERO {
            continue;
        }
        let z = ts.rehash();
        if z == Scalar::ZERO {
            continue;
        }

        let y_pow = powers(&y, mn);
        let z_pow = powers(&z, m + 2);
        let two_pow = powers(&Scalar::from(2u64), bits);

        let l0: Vec<Scalar> = a_l.iter().map(|x| x - z).collect();
        let r0: Vec<Scalar> = (0..mn)
            .map(|i| (a_r[i] + z) * y_pow[i] + z_pow[2 + i / bits] * two_pow[i % bits])
            .collect();
        let r1: Vec<Scalar> = (0..mn).map(|i| s_r[i] * y_pow[i]).collect();

        let t1 = inner(&l0, &r1) + inner(&s_l, &r0);
        let t2 = inner(&s_l, &r1);

        let tau1 = crypto::random_scalar();
        let tau2 = crypto::random_scalar();
        let t1_pt = scaled(crypto::commit(&tau1, &t1));
        let t2_pt = scaled(crypto::commit(&tau2, &t2));

        let x = ts.mash(&[&z.to_bytes(), &t1_pt, &t2_pt]);
        if x == Scalar::ZERO {
            continue;
        }

        let mut taux = tau1 * x + tau2 * x * x;
        for (j, gamma) in masks.iter().enumerate() {
            taux += z_pow[j + 2] * gamma;
        }
        let mu = x * rho + alpha;

        let mut a_vec: Vec<Scalar> = (0..mn).map(|i| l0[i] + s_l[i] * x).collect();
        let mut b_vec: Vec<Scalar> = (0..mn).map(|i| r0[i] + r1[i] * x).collect();
        let t = inner(&a_vec, &b_vec);

        let x_ip = ts.mash(&[&x.to_bytes(), &taux.to_bytes(), &mu.to_bytes(), &t.to_bytes()]);
        if x_ip == Scalar::ZERO {
            continue;
        }
        let u = *H * x_ip;

        let y_inv = y.invert();
        let y_inv_pow = powers(&y_inv, mn);
        let mut g_prime: Vec<EdwardsPoint> = gi.to_vec();
        let mut h_prime: Vec<EdwardsPoint> = hi.iter().zip(&y_inv_pow).map(|(p, s)| p * s).collect();

        let mut ls = Vec::new();
        let mut rs = Vec::new();
        let mut n = mn;
        while n > 1 {
            n /= 2;
            let c_l = inner(&a_vec[..n], &b_vec[n..2 * n]);
            let c_r = inner(&a_vec[n..2 * n], &b_vec[..n]);

            let l_pt = scaled(
                EdwardsPoint::multiscalar_mul(
                    a_vec[..n].iter().chain(&b_vec[n..2 * n]),
                    g_prime[n..2 * n].iter().chain(&h_prime[..n]),
                ) + u * c_l,
            );
            let r_pt = scaled(
                EdwardsPoint::multiscalar_mul(
                    a_vec[n..2 * n].iter().chain(&b_vec[..n]),
                    g_prime[..n].iter().chain(&h_prime[n..2 * n]),
                ) + u * c_r,
            );

            let w = ts.mash(&[&l_pt, &r_pt]);
            if w == Scalar::ZERO {
                continue 'attempt;
            }
            let w_inv = w.invert();
            ls.push(l_pt);
            rs.push(r_pt);

            for i in 0..n {
                g_prime[i] = EdwardsPoint::vartime_multiscalar_mul([w_inv, w], [g_prime[i], g_prime[n + i]]);
                h_prime[i] = EdwardsPoint::vartime_multiscalar_mul([w, w_inv], [h_prime[i], h_prime[n + i]]);
                a_vec[i] = w * a_vec[i] + w_inv * a_vec[n + i];
                b_vec[i] = w_inv * b_vec[i] + w * b_vec[n + i];
            }
            g_prime.truncate(n);
            h_prime.truncate(n);
            a_vec.truncate(n);
            b_vec.truncate(n);
        }

        return Ok(Bulletproof {
            v,
            a: a_pt,
            s: s_pt,
            t1: t1_pt,
            t2: t2_pt,
            taux: taux.to_bytes(),
            mu: mu.to_bytes(),
            l: ls,
            r: rs,
            a_final: a_vec[0].to_bytes(),
            b: b_vec[0].to_bytes(),
            t: t.to_bytes(),
        });
    }
}

/// Range size in bits implied by the proof's dimensions, if valid.
pub fn proof_bits(bp: &Bulletproof) -> Option<usize> {
    if bp.v.is_empty() || bp.v.len() > MAX_OUTPUTS || bp.l.len() != bp.r.len() {
        return None;
    }
    let log_m = bp.v.len().next_power_of_two().trailing_zeros() as usize;
    match bp.l.len().checked_sub(log_m)? {
        6 => Some(64),
        7 => Some(128),
        _ => None,
    }
}

/// Accumulates the verification equations of several proofs into one
/// multi-exponentiation.
struct Batch {
    gi: Vec<Scalar>,
    hi: Vec<Scalar>,
    g: Scalar,
    h: Scalar,
    scalars: Vec<Scalar>,
    points: Vec<EdwardsPoint>,
}

fn canonical(k: &Key) -> Option<Scalar> {
    crypto::sc_canonical(k)
}

fn point(k: &Key) -> Option<EdwardsPoint> {
    crypto::decompress(k).ok()
}

impl Batch {
    fn add(&mut self, bp: &Bulletproof) -> Option<()> {
        let bits = proof_bits(bp)?;
        let m = bp.v.len().next_power_of_two();
        let mn = m * bits;
        let rounds = bp.l.len();

        let taux = canonical(&bp.taux)?;
        let mu = canonical(&bp.mu)?;
        let a = canonical(&bp.a_final)?;
        let b = canonical(&bp.b)?;
        let t = canonical(&bp.t)?;

        let mut ts = Transcript::start(&bp.v);
        let y = ts.mash(&[&bp.a, &bp.s]);
        let z = ts.rehash();
        let x = ts.mash(&[&z.to_bytes(), &bp.t1, &bp.t2]);
        let x_ip = ts.mash(&[&x.to_bytes(), &bp.taux, &bp.mu, &bp.t]);
        if y == Scalar::ZERO || z == Scalar::ZERO || x == Scalar::ZERO || x_ip == Scalar::ZERO {
            return None;
        }
        let mut w = Vec::with_capacity(rounds);
        for (l, r) in bp.l.iter().zip(&bp.r) {
            let wk = ts.mash(&[l, r]);
            if wk == Scalar::ZERO {
                return None;
            }
            w.push(wk);
        }

        let eight = Scalar::from(8u64);
        let wy = crypto::random_scalar();
        let wz = crypto::random_scalar();

        let y_pow = powers(&y, mn);
        let z_pow = powers(&z, m + 3);
        let two_pow = powers(&Scalar::from(2u64), bits);
        let sum_y: Scalar = y_pow.iter().sum();
        let ip12 = two_pow_minus_one(bits);
        let mut delta = (z - z * z) * sum_y;
        for j in 1..=m {
            delta -= z_pow[j + 2] * ip12;
        }

        // t·H + taux·G == Σ z^(j+2)·V_j + x·T1 + x²·T2 + δ·H
        self.g += wy * taux;
        self.h += wy * (t - delta);
        for (j, v) in bp.v.iter().enumerate() {
            self.scalars.push(-(wy * z_pow[j + 2] * eight));
            self.points.push(point(v)?);
        }
        self.scalars.push(-(wy * x * eight));
        self.points.push(point(&bp.t1)?);
        self.scalars.push(-(wy * x * x * eight));
        self.points.push(point(&bp.t2)?);

        // inner-product argument
        let w_inv: Vec<Scalar> = w.iter().map(|s| s.invert()).collect();
        let y_inv = y.invert();
        let y_inv_pow = powers(&y_inv, mn);

        self.scalars.push(wz * eight);
        self.points.push(point(&bp.a)?);
        self.scalars.push(wz * x * eight);
        self.points.push(point(&bp.s)?);
        self.g -= wz * mu;
        self.h += wz * (t - a * b) * x_ip;
        for k in 0..rounds {
            self.scalars.push(wz * w[k] * w[k] * eight);
            self.points.push(point(&bp.l[k])?);
            self.scalars.push(wz * w_inv[k] * w_inv[k] * eight);
            self.points.push(point(&bp.r[k])?);
        }

        for i in 0..mn {
            let mut s = Scalar::ONE;
            let mut s_inv = Scalar::ONE;
            for k in 0..rounds {
                if (i >> (rounds - 1 - k)) & 1 == 1 {
                    s *= w[k];
                    s_inv *= w_inv[k];
                } else {
                    s *= w_inv[k];
                    s_inv *= w[k];
                }
            }
            let g_scalar = a * s + z;
            let h_scalar = b * s_inv * y_inv_pow[i] - z - z_pow[2 + i / bits] * two_pow[i % bits] * y_inv_pow[i];
            self.gi[i] -= wz * g_scalar;
            self.hi[i] -= wz * h_scalar;
        }
        Some(())
    }

    fn check(self) -> bool {
        let gens = &*GENERATORS;
        let scalars = self.gi.iter().chain(&self.hi).chain(&self.scalars).chain([&self.g, &self.h]);
        let points = gens
            .g
            .iter()
            .chain(&gens.h)
            .chain(&self.points)
            .chain([&ED25519_BASEPOINT_POINT, &*H]);
        EdwardsPoint::vartime_multiscalar_mul(scalars, points).is_identity()
    }
}

/// Verify a set of proofs in one batch. Any malformed proof fails the batch.
pub fn verify(proofs: &[&Bulletproof]) -> bool {
    if proofs.is_empty() {
        return true;
    }
    let mut batch = Batch {
        gi: vec![Scalar::ZERO; MAX_MN],
        hi: vec![Scalar::ZERO; MAX_MN],
        g: Scalar::ZERO,
        h: Scalar::ZERO,
        scalars: Vec::new(),
        points: Vec::new(),
    };
    for bp in proofs {
        if batch.add(bp).is_none() {
            return false;
        }
    }
    batch.check()
}

/// Serialized size of a proof over `outputs` commitments, used by the
/// builder's size estimate.
pub fn proof_size(outputs: usize, bits: usize) -> usize {
    let m = outputs.max(1).next_power_of_two();
    let log_mn = (m * bits).trailing_zeros() as usize;
    (2 * log_mn + 9) * 32
}
