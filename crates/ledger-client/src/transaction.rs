//! Memo transaction construction
//!
//! One Memo program instruction with the fee payer attached as its signer
//! account, built and signed with the Solana SDK types.

use solana_hash::Hash;
use solana_instruction::{AccountMeta, Instruction};
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use solana_transaction::Transaction;
use std::str::FromStr;

use crate::LedgerError;

/// Memo program v2
pub const MEMO_PROGRAM_ID: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

/// Largest packet the cluster accepts
pub const PACKET_DATA_SIZE: usize = 1232;

pub fn memo_program_id() -> Result<Pubkey, LedgerError> {
    Pubkey::from_str(MEMO_PROGRAM_ID)
        .map_err(|e| LedgerError::Encoding(format!("memo program id: {}", e)))
}

/// Memo instruction signed by `signer`
pub fn memo_instruction(memo: &[u8], signer: &Pubkey) -> Result<Instruction, LedgerError> {
    Ok(Instruction::new_with_bytes(
        memo_program_id()?,
        memo,
        vec![AccountMeta::new_readonly(*signer, true)],
    ))
}

/// Build and sign a memo transaction paid for by `keypair`
pub fn memo_transaction(
    keypair: &Keypair,
    recent_blockhash: Hash,
    memo: &[u8],
) -> Result<Transaction, LedgerError> {
    let payer = keypair.pubkey();
    let instruction = memo_instruction(memo, &payer)?;
    let tx = Transaction::new_signed_with_payer(
        &[instruction],
        Some(&payer),
        &[keypair],
        recent_blockhash,
    );

    // compact-u16 signature count (one byte here), signatures, message
    let size = 1 + 64 * tx.signatures.len() + tx.message_data().len();
    if size > PACKET_DATA_SIZE {
        return Err(LedgerError::Encoding(format!(
            "transaction is {} bytes, limit is {}",
            size, PACKET_DATA_SIZE
        )));
    }

    Ok(tx)
}
