// Library interface for the ctcwallet light wallet
// The binary, tests and embedding services all go through these modules.

pub mod error;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod address;
pub mod envelope;
pub mod bulletproof;
pub mod ringsig;
pub mod mlsag;
pub mod rct;
pub mod tlv;
pub mod transaction;
pub mod storage;
pub mod node;
pub mod scanner;
pub mod selection;
pub mod builder;
pub mod wallet;
pub mod sync;
pub mod metrics;

pub use error::{Result, WalletError};
pub use keys::AccountKeys;
pub use address::{AccountAddress, ExternalAddress};
pub use storage::Store;
pub use transaction::Transaction;
pub use wallet::Wallet;
