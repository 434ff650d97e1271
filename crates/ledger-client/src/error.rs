use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient funds: signer balance is {balance} lamports")]
    InsufficientFunds { balance: u64 },

    #[error("RPC error: {0}")]
    Transport(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Transaction failed on-chain: {0}")]
    TransactionFailed(String),

    #[error("Transaction {signature} not confirmed within {secs}s")]
    ConfirmationTimeout { signature: String, secs: u64 },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Ledger unreachable")]
    Unreachable,
}
