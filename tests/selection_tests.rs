// Coin Selection Tests
// Fees, destination checks, exact-match search and packetisation under size caps.

use ctcwallet::{
    address::AccountAddress,
    selection::{self, Candidate, Destination, Selector},
    WalletError,
};

const COIN: u128 = 1_000_000_000_000_000_000;
const FEE: u128 = 50_000_000_000_000_000;

fn addr(tag: u8) -> AccountAddress {
    AccountAddress { spend_public: [tag; 32], view_public: [tag.wrapping_add(100); 32] }
}

fn stealth(tag: u8, amount: u128) -> Destination {
    Destination::Utxo { address: addr(tag), is_subaddress: false, amount, remark: [0; 32], is_change: false }
}

fn pool(amounts: &[u128]) -> Vec<Candidate> {
    amounts
        .iter()
        .enumerate()
        .map(|(i, a)| Candidate { transfer: i, sub_index: 0, height: i as u64, amount: *a })
        .collect()
}

fn total(cs: &[Candidate]) -> u128 {
    cs.iter().map(|c| c.amount).sum()
}

fn selector(max_global: Option<u64>) -> Selector {
    Selector {
        utxo_fee: FEE,
        max_global,
        ring_size: selection::DEFAULT_RING_SIZE,
        change: addr(0xcc),
        change_is_subaddress: false,
    }
}

#[test]
fn test_fees() {
    println!("🧪 Testing fee schedules...");
    assert_eq!(selection::utxo_fee(selection::DEFAULT_UTXO_GAS), FEE);

    assert_eq!(selection::account_fee(0), 0);
    assert_eq!(selection::account_fee(1), FEE, "minimum gas applies");
    assert_eq!(selection::account_fee(10 * COIN), FEE);
    assert_eq!(selection::account_fee(11 * COIN), 550_000 * selection::GAS_PRICE);
    assert_eq!(selection::account_fee(11 * COIN - 1), 550_000 * selection::GAS_PRICE, "coins round up");
    assert_eq!(selection::account_fee(u128::MAX), 5_000_000_000 * selection::GAS_PRICE, "maximum gas applies");
    println!("  ✅ UTXO and account fees match");
}

#[test]
fn test_check_dests() {
    println!("🧪 Testing destination validation...");
    assert!(matches!(selection::check_dests(&[], FEE), Err(WalletError::OutputEmpty)));
    assert!(matches!(
        selection::check_dests(&[stealth(1, 9_999_999_999)], FEE),
        Err(WalletError::OutputAmountInvalid)
    ));
    assert!(matches!(
        selection::check_dests(&[stealth(1, 15_000_000_000)], FEE),
        Err(WalletError::OutputAmountInvalid)
    ));

    let need = selection::check_dests(&[stealth(1, COIN)], FEE).expect("valid");
    assert_eq!(need.amount, COIN + FEE);
    assert!(need.has_utxo_out);

    let account = Destination::Account { to: [9; 20], amount: 2 * COIN, data: Vec::new() };
    let need = selection::check_dests(&[account.clone()], FEE).expect("valid");
    assert_eq!(need.amount, 2 * COIN + FEE + selection::account_fee(2 * COIN));
    assert!(!need.has_utxo_out);

    let need = selection::check_dests(&[account, stealth(1, COIN)], FEE).expect("valid");
    assert_eq!(need.amount, 3 * COIN + FEE + selection::account_fee(2 * COIN));
    println!("  ✅ Amount rules and need computation hold");
}

#[test]
fn test_size_estimate_and_ring_size() {
    println!("🧪 Testing size estimation and ring size choice...");
    assert_eq!(selection::estimate_tx_size(1, 2, 11), 2209);
    assert!(selection::estimate_tx_size(2, 2, 11) > selection::estimate_tx_size(1, 2, 11));
    assert!(selection::estimate_tx_size(1, 2, 1) < selection::estimate_tx_size(1, 2, 11));

    assert_eq!(selection::ring_size_for(2, None, 11), 1);
    // : max_global is an index, so Some(21) means 22 outputs on chain
    assert_eq!(selection::ring_size_for(2, Some(20), 11), 1);
    assert_eq!(selection::ring_size_for(2, Some(21), 11), 11);
    assert_eq!(selection::ring_size_for(1, Some(9), 11), 1);
    assert_eq!(selection::ring_size_for(1, Some(10), 11), 11);
    println!("  ✅ Full rings only with enough decoys");
}

#[test]
fn test_coin_selection() {
    println!("🧪 Testing input selection strategies...");

    // : an output equal to the target wins
    let p = pool(&[4 * COIN, 10 * COIN, 20 * COIN]);
    assert_eq!(total(&selection::coin_selection(&p, 10 * COIN).expect("select")), 10 * COIN);

    // : small outputs summing exactly to the target
    let p = pool(&[4 * COIN, 6 * COIN, 9 * COIN, 20 * COIN]);
    let picked = selection::coin_selection(&p, 10 * COIN).expect("select");
    let mut amounts: Vec<u128> = picked.iter().map(|c| c.amount).collect();
    amounts.sort_unstable();
    assert_eq!(amounts, vec![4 * COIN, 6 * COIN], "exact match found by search");

    // : small outputs cannot cover it, the smallest large one does
    let p = pool(&[3 * COIN, 7 * COIN, 20 * COIN, 30 * COIN]);
    assert_eq!(selection::coin_selection(&p, 11 * COIN).expect("select"), vec![p[2]]);

    // : no exact match and a random draw beats the large output
    let p = pool(&[4 * COIN, 4 * COIN, 4 * COIN]);
    let picked = selection::coin_selection(&p, 10 * COIN).expect("select");
    assert_eq!(picked.len(), 3);

    // : a random draw that overshoots loses to a single large output
    let p = pool(&[4 * COIN, 4 * COIN, 4 * COIN, 50 * COIN]);
    assert_eq!(selection::coin_selection(&p, 10 * COIN).expect("select"), vec![p[3]]);

    assert!(matches!(
        selection::coin_selection(&pool(&[COIN, COIN]), 3 * COIN),
        Err(WalletError::BalanceNotEnough)
    ));
    println!("  ✅ Exact, single and random strategies behave");
}

#[test]
fn test_exact_search() {
    println!("🧪 Testing the exact-match search...");
    let p = pool(&[5, 5, 5, 3, 3, 2].map(|v| v * COIN));
    let found = selection::select_dfs(&p, 11 * COIN).expect("5 + 3 + 3");
    assert_eq!(total(&found), 11 * COIN);

    assert!(matches!(selection::select_dfs(&p, 24 * COIN), Err(WalletError::ExactMatchFail)));
    let evens = pool(&[2, 4, 6, 8].map(|v| v * COIN));
    assert!(matches!(selection::select_dfs(&evens, 7 * COIN), Err(WalletError::ExactMatchFail)));
    println!("  ✅ Search finds sums and gives up cleanly");
}

#[test]
fn test_merge_dests() {
    println!("🧪 Testing destination merging under the output cap...");
    let same: Vec<Destination> = (1..=17).map(|i| stealth(1, i * COIN)).collect();
    let sum: u128 = same.iter().map(Destination::amount).sum();
    let merged = selection::merge_dests(same).expect("mergeable");
    assert_eq!(merged.len(), 16);
    assert_eq!(merged.iter().map(Destination::amount).sum::<u128>(), sum);

    let distinct: Vec<Destination> = (1..=17).map(|i| stealth(i, COIN)).collect();
    assert!(matches!(selection::merge_dests(distinct), Err(WalletError::DestsMergeFail)));

    let few = vec![stealth(1, COIN), stealth(1, COIN)];
    assert_eq!(selection::merge_dests(few.clone()).expect("untouched"), few);
    println!("  ✅ Only shared spend keys are merged");
}

#[test]
fn test_select_adds_change() {
    println!("🧪 Testing single-packet selection with change...");
    let s = selector(None);
    let p = pool(&[COIN, 2 * COIN]);
    let packets = s.select(&p, &[stealth(1, 3 * COIN / 2)]).expect("select");
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].inputs, vec![p[1]]);
    let change = packets[0].outputs.iter().find(|d| d.is_change()).expect("change output");
    assert_eq!(change.amount(), 2 * COIN - 3 * COIN / 2 - FEE);
    assert!(matches!(change, Destination::Utxo { address, .. } if *address == addr(0xcc)));
    println!("  ✅ Change goes back to the change address");
}

#[test]
fn test_account_only_change_pays_extra_fee() {
    println!("🧪 Testing account-only payments...");
    let s = selector(None);
    let pay = Destination::Account { to: [7; 20], amount: COIN, data: Vec::new() };
    let account_fee = selection::account_fee(COIN);

    let exact = pool(&[COIN + FEE + account_fee]);
    let packets = s.select(&exact, &[pay.clone()]).expect("exact");
    assert_eq!(packets[0].outputs, vec![pay.clone()], "no change output");

    let p = pool(&[2 * COIN]);
    let packets = s.select(&p, &[pay]).expect("with change");
    let change = packets[0].outputs.iter().find(|d| d.is_change()).expect("change output");
    assert_eq!(change.amount(), 2 * COIN - COIN - account_fee - 2 * FEE, "change output adds a UTXO fee");
    println!("  ✅ A change output costs one more UTXO fee");
}

#[test]
fn test_direct_selection_packetises() {
    println!("🧪 Testing packetisation of a payment from many small outputs...");
    let s = selector(Some(10_000));
    let p = pool(&[COIN / 10; 60]);
    let packets = s.select(&p, &[stealth(1, 5 * COIN)]).expect("packetised");
    assert!(packets.len() > 1, "one transaction would exceed the size cap");

    let mut paid = 0u128;
    let mut used = 0usize;
    for packet in &packets {
        let outs: u128 = packet.outputs.iter().map(Destination::amount).sum();
        assert_eq!(total(&packet.inputs), outs + FEE, "each packet pays exactly one fee");
        assert!(packet.outputs.iter().filter(|d| d.is_utxo()).count() <= 16);
        let ring = s.ring_size(packet.inputs.len());
        assert!(selection::estimate_tx_size(packet.inputs.len(), 16, ring) <= selection::HARD_SIZE_LIMIT);
        paid += packet.outputs.iter().filter(|d| !d.is_change()).map(Destination::amount).sum::<u128>();
        used += packet.inputs.len();
    }
    assert_eq!(paid, 5 * COIN);
    assert!(used <= 60);
    println!("  ✅ {} packets pay the full amount", packets.len());

    let short = pool(&[COIN / 10; 40]);
    assert!(matches!(s.select(&short, &[stealth(1, 5 * COIN)]), Err(WalletError::BalanceNotEnough)));
}

#[test]
fn test_select_falls_back_when_outputs_cannot_merge() {
    println!("🧪 Testing fallback to packetisation when one packet cannot hold the outputs...");
    let s = selector(None);
    let p = pool(&[17 * COIN + FEE]);

    // : seventeen distinct spend keys cannot be folded under the output cap
    let distinct: Vec<Destination> = (1..=17).map(|t| stealth(t, COIN)).collect();
    assert!(matches!(s.select(&p, &distinct), Err(WalletError::DestsMergeFail)));
    assert!(matches!(s.direct_selection(&p, &distinct), Err(WalletError::DestsMergeFail)));

    // : a shared key lets the single packet succeed
    let mut shared = distinct.clone();
    shared[16] = stealth(1, COIN);
    let packets = s.select(&p, &shared).expect("merged packet");
    assert_eq!(packets.len(), 1);
    assert!(packets[0].outputs.iter().filter(|d| d.is_utxo()).count() <= 16);
    let paid: u128 = packets[0].outputs.iter().filter(|d| !d.is_change()).map(Destination::amount).sum();
    assert_eq!(paid, 17 * COIN);
    assert!(!packets[0].outputs.iter().any(Destination::is_change));
    println!("  ✅ Merge failures go through the greedy path");
}
