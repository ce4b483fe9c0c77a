//! ABI binding for the payment contract's `PaymentReceived` event.

use common::{ChainAddress, TransactionId, TxHash};
use domain::RawPayment;
use ethers::contract::EthEvent;
use ethers::types::{Address, H256, Log, U256};

use crate::error::{ChainError, Result};

/// `PaymentReceived(uint256 indexed transactionId, address indexed sender,
/// uint256 amount, address token, string currency)`
#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "PaymentReceived")]
pub struct PaymentReceivedLog {
    #[ethevent(indexed)]
    pub transaction_id: U256,
    #[ethevent(indexed)]
    pub sender: Address,
    pub amount: U256,
    pub token: Address,
    pub currency: String,
}

/// Topic-0 of `PaymentReceived`.
pub fn payment_received_topic() -> H256 {
    PaymentReceivedLog::signature()
}

/// Topic encoding of an indexed `uint256` transaction id.
pub fn transaction_id_topic(id: TransactionId) -> Result<H256> {
    let id = u64::try_from(id.as_i64())
        .map_err(|_| ChainError::OutOfRange(format!("transaction id {id}")))?;
    Ok(H256::from_low_u64_be(id))
}

/// Topic encoding of an indexed `address`: left-padded to 32 bytes.
pub fn address_topic(address: &ChainAddress) -> Result<H256> {
    let address = to_eth_address(address)?;
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    Ok(H256::from(bytes))
}

pub fn to_eth_address(address: &ChainAddress) -> Result<Address> {
    address
        .as_str()
        .parse()
        .map_err(|_| ChainError::Decode(format!("address {address}")))
}

pub fn to_eth_hash(hash: &TxHash) -> Result<H256> {
    hash.as_str()
        .parse()
        .map_err(|_| ChainError::Decode(format!("hash {hash}")))
}

pub fn from_eth_address(address: Address) -> Result<ChainAddress> {
    Ok(ChainAddress::parse(&format!("{address:#x}"))?)
}

pub fn from_eth_hash(hash: H256) -> Result<TxHash> {
    Ok(TxHash::parse(&format!("{hash:#x}"))?)
}

/// Decodes a `PaymentReceived` log into its raw, unscaled fields.
///
/// Logs flagged as removed by a reorg are rejected.
pub fn decode_payment_log(log: Log) -> Result<RawPayment> {
    if log.removed == Some(true) {
        return Err(ChainError::RemovedLog);
    }

    let tx_hash = log
        .transaction_hash
        .ok_or(ChainError::MissingField("transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or(ChainError::MissingField("block number"))?
        .as_u64();
    let log_index = log.log_index.unwrap_or_default();
    if log_index > U256::from(u64::MAX) {
        return Err(ChainError::OutOfRange(format!("log index {log_index}")));
    }

    let decoded: PaymentReceivedLog =
        ethers::contract::parse_log(log).map_err(|e| ChainError::Decode(e.to_string()))?;

    if decoded.transaction_id > U256::from(u64::MAX) {
        return Err(ChainError::OutOfRange(format!(
            "transaction id {}",
            decoded.transaction_id
        )));
    }
    if decoded.amount > U256::from(u128::MAX) {
        return Err(ChainError::OutOfRange(format!("amount {}", decoded.amount)));
    }

    Ok(RawPayment {
        transaction_id: decoded.transaction_id.as_u64(),
        sender: from_eth_address(decoded.sender)?,
        raw_amount: decoded.amount.as_u128(),
        token_address: from_eth_address(decoded.token)?,
        currency: decoded.currency,
        tx_hash: from_eth_hash(tx_hash)?,
        block_number,
        log_index: log_index.as_u64(),
    })
}
