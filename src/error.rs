use thiserror::Error;

/// Every failure the wallet core can report. Callers match on the variant;
/// RPC-style front ends use [`WalletError::code`].
#[derive(Debug, Error)]
pub enum WalletError {
    // caller errors
    #[error("invalid arguments: {0}")]
    ArgsInvalid(String),
    #[error("password is empty")]
    PasswdEmpty,
    #[error("destination amount overflow")]
    DestOverflow,
    #[error("transaction type not supported")]
    TxTypeUnsupported,
    #[error("proof key not needed for account-input transactions")]
    ProofNotNeeded,
    #[error("no transfer to the given address in transaction")]
    NoTransInTx,
    #[error("wallet not open")]
    WalletNotOpen,
    #[error("subaccount index {0} exceeds the configured limit")]
    SubaccountTooLarge(u64),
    #[error("token {0} is not supported for utxo transfers")]
    UtxoTokenUnsupported(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid key")]
    InvalidKey,

    // selection-time rejects
    #[error("balance not enough")]
    BalanceNotEnough,
    #[error("no exact match found")]
    ExactMatchFail,
    #[error("destinations cannot be merged under the output cap")]
    DestsMergeFail,
    #[error("too many destinations")]
    DestsOverLimit,
    #[error("transaction too big")]
    TxTooBig,
    #[error("mixing account and utxo inputs is not supported")]
    MixInputUnsupported,
    #[error("token fee not enough")]
    TokenFeeNotEnough,

    // destination validation
    #[error("no outputs")]
    OutputEmpty,
    #[error("output amount invalid")]
    OutputAmountInvalid,
    #[error("output amount overflow")]
    OutputAmountOverflow,
    #[error("contract outputs are not supported")]
    OutputContractNotSupported,

    // construction / verification
    #[error("signing failed: {0}")]
    SignFail(String),
    #[error("account input construction failed")]
    NewAinFail,
    #[error("utxo input construction failed: {0}")]
    NewUinFail(String),
    #[error("utxo transaction signing failed: {0}")]
    UinTransSignFail(String),
    #[error("transaction invalid: {0}")]
    TransInvalid(String),
    #[error("output query returned mismatched index")]
    OutputQueryMismatch,

    // node interaction
    #[error("no connection to daemon: {0}")]
    NoConnectionToDaemon(String),
    #[error("daemon body error: {0}")]
    DaemonBodyErr(String),
    #[error("daemon returned error code {code}: {message}")]
    DaemonCodeErr { code: i64, message: String },
    #[error("daemon data error: {0}")]
    DaemonDataErr(String),
    #[error("submit failed: {0}")]
    SubmitFail(String),

    // lookups
    #[error("block parent mismatch at height {0}")]
    BlockParentMismatch(u64),
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("output not found")]
    OutputNotFound,
    #[error("transaction not found")]
    TxNotFound,
    #[error("tx key not found")]
    TxKeyNotFound,
    #[error("address info not found")]
    AddInfoNotFound,

    // storage
    #[error("save {what} failed: {reason}")]
    Save { what: &'static str, reason: String },
    #[error("batch save failed: {0}")]
    BatchSaveFail(String),
    #[error("batch commit failed: {0}")]
    BatchCommitFail(String),

    #[error("tlv: {0}")]
    Tlv(String),
    #[error("inner error: {0}")]
    Inner(String),
}

impl WalletError {
    /// Stable identifier for the error kind.
    pub fn code(&self) -> &'static str {
        use WalletError::*;
        match self {
            ArgsInvalid(_) => "args-invalid",
            PasswdEmpty => "passwd-empty",
            DestOverflow => "dest-overflow",
            TxTypeUnsupported => "tx-type-unsupported",
            ProofNotNeeded => "proof-not-needed",
            NoTransInTx => "no-trans-in-tx",
            WalletNotOpen => "wallet-not-open",
            SubaccountTooLarge(_) => "subaccount-too-large",
            UtxoTokenUnsupported(_) => "utxo-token-unsupported",
            InvalidAddress(_) => "invalid-address",
            InvalidKey => "invalid-key",
            BalanceNotEnough => "balance-not-enough",
            ExactMatchFail => "exact-match-fail",
            DestsMergeFail => "dests-merge-fail",
            DestsOverLimit => "dests-over-limit",
            TxTooBig => "tx-too-big",
            MixInputUnsupported => "mix-input-unsupported",
            TokenFeeNotEnough => "token-fee-not-enough",
            OutputEmpty => "output-empty",
            OutputAmountInvalid => "output-amount-invalid",
            OutputAmountOverflow => "output-amount-overflow",
            OutputContractNotSupported => "output-contract-not-supported",
            SignFail(_) => "sign-fail",
            NewAinFail => "new-ain-fail",
            NewUinFail(_) => "new-uin-fail",
            UinTransSignFail(_) => "uin-trans-sign-fail",
            TransInvalid(_) => "trans-invalid",
            OutputQueryMismatch => "output-query-mismatch",
            NoConnectionToDaemon(_) => "no-connection-to-daemon",
            DaemonBodyErr(_) => "daemon-body-err",
            DaemonCodeErr { .. } => "daemon-code-err",
            DaemonDataErr(_) => "daemon-data-err",
            SubmitFail(_) => "submit-fail",
            BlockParentMismatch(_) => "block-parent-mismatch",
            BlockNotFound(_) => "block-not-found",
            OutputNotFound => "output-not-found",
            TxNotFound => "tx-not-found",
            TxKeyNotFound => "txkey-not-found",
            AddInfoNotFound => "addinfo-not-found",
            Save { .. } => "save-fail",
            BatchSaveFail(_) => "batch-save-fail",
            BatchCommitFail(_) => "batch-commit-fail",
            Tlv(_) => "tlv",
            Inner(_) => "inner",
        }
    }

    /// Errors after which the refresh loop for the account stops.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WalletError::BatchCommitFail(_)
                | WalletError::BatchSaveFail(_)
                | WalletError::Save { .. }
                | WalletError::Inner(_)
        )
    }

    pub(crate) fn save(what: &'static str, reason: impl ToString) -> Self {
        WalletError::Save { what, reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
