use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ChainAddress, RetryPolicy, TxHash};
use domain::{PaymentEvent, TokenRegistry};
use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::types::{Address, BlockId, BlockNumber, Filter, Log, U64, U256};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::client::{ChainClient, PaymentFilter, Receipt};
use crate::error::{ChainError, Result};
use crate::event::{
    address_topic, decode_payment_log, payment_received_topic, to_eth_address, to_eth_hash,
    transaction_id_topic,
};

/// Connection settings for [`EthChainClient`].
#[derive(Debug, Clone)]
pub struct EthClientConfig {
    pub http_url: String,
    /// Required for live subscriptions only.
    pub ws_url: Option<String>,
    pub contract_address: ChainAddress,
    /// Budget for each RPC call.
    pub retry: RetryPolicy,
}

/// [`ChainClient`] backed by an ethers HTTP provider for queries and a
/// websocket provider for log subscriptions.
pub struct EthChainClient {
    http: Provider<Http>,
    ws_url: Option<String>,
    contract: Address,
    tokens: TokenRegistry,
    retry: RetryPolicy,
}

impl EthChainClient {
    pub fn new(config: EthClientConfig, tokens: TokenRegistry) -> Result<Self> {
        let http = Provider::<Http>::try_from(config.http_url.as_str())
            .map_err(|e| ChainError::InvalidUrl(format!("{}: {e}", config.http_url)))?;

        Ok(Self {
            http,
            ws_url: config.ws_url,
            contract: to_eth_address(&config.contract_address)?,
            tokens,
            retry: config.retry,
        })
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    fn base_filter(&self) -> Filter {
        Filter::new()
            .address(self.contract)
            .topic0(payment_received_topic())
    }

    fn build_filter(&self, filter: &PaymentFilter) -> Result<Filter> {
        let mut eth_filter = self.base_filter().from_block(filter.from_block);
        if let Some(to) = filter.to_block {
            eth_filter = eth_filter.to_block(to);
        }
        if let Some(id) = filter.transaction_id {
            eth_filter = eth_filter.topic1(transaction_id_topic(id)?);
        }
        if let Some(ref sender) = filter.sender {
            eth_filter = eth_filter.topic2(address_topic(sender)?);
        }
        Ok(eth_filter)
    }

    fn decode(&self, log: Log) -> Result<PaymentEvent> {
        if log.address != self.contract {
            return Err(ChainError::Decode(format!(
                "log from unexpected contract {:#x}",
                log.address
            )));
        }
        Ok(decode_payment_log(log)?.decode(&self.tokens)?)
    }

    /// Decodes logs, skipping the ones that are not valid payments.
    fn decode_all(&self, logs: Vec<Log>) -> Vec<PaymentEvent> {
        let mut events: Vec<_> = logs
            .into_iter()
            .filter_map(|log| {
                let tx_hash = log.transaction_hash;
                match self.decode(log) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        metrics::counter!("reconciler_undecodable_logs_total").increment(1);
                        tracing::warn!(?tx_hash, error = %e, "Skipping undecodable payment log");
                        None
                    }
                }
            })
            .collect();
        events.sort_by_key(|e| e.position());
        events
    }
}

#[async_trait]
impl ChainClient for EthChainClient {
    #[tracing::instrument(skip(self), fields(hash = %hash))]
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>> {
        let eth_hash = to_eth_hash(hash)?;
        let receipt = self
            .retry
            .retry(
                "eth_getTransactionReceipt",
                || async {
                    self.http
                        .get_transaction_receipt(eth_hash)
                        .await
                        .map_err(ChainError::from)
                },
                ChainError::is_transient,
            )
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        // Receipts of pending transactions carry no block yet
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };

        Ok(Some(Receipt {
            tx_hash: hash.clone(),
            block_number: block_number.as_u64(),
            success: receipt.status == Some(U64::one()),
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn get_payment_events(&self, filter: &PaymentFilter) -> Result<Vec<PaymentEvent>> {
        let eth_filter = self.build_filter(filter)?;
        let logs = self
            .retry
            .retry(
                "eth_getLogs",
                || async { self.http.get_logs(&eth_filter).await.map_err(ChainError::from) },
                ChainError::is_transient,
            )
            .await?;

        tracing::debug!(logs = logs.len(), "Fetched payment logs");
        Ok(self.decode_all(logs))
    }

    async fn latest_block(&self) -> Result<u64> {
        let block = self
            .retry
            .retry(
                "eth_blockNumber",
                || async { self.http.get_block_number().await.map_err(ChainError::from) },
                ChainError::is_transient,
            )
            .await?;
        Ok(block.as_u64())
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<DateTime<Utc>>> {
        let id = BlockId::Number(BlockNumber::Number(U64::from(block)));
        let fetched = self
            .retry
            .retry(
                "eth_getBlockByNumber",
                || async { self.http.get_block(id).await.map_err(ChainError::from) },
                ChainError::is_transient,
            )
            .await?;

        let Some(fetched) = fetched else {
            return Ok(None);
        };
        if fetched.timestamp > U256::from(i64::MAX as u64) {
            return Err(ChainError::OutOfRange(format!(
                "timestamp {} of block {block}",
                fetched.timestamp
            )));
        }
        Ok(DateTime::from_timestamp(fetched.timestamp.low_u64() as i64, 0))
    }

    async fn stream_payments(&self, sink: mpsc::Sender<PaymentEvent>) -> Result<()> {
        let ws_url = self
            .ws_url
            .as_deref()
            .ok_or_else(|| ChainError::Connection("no websocket endpoint configured".into()))?;

        let provider = Provider::<Ws>::connect(ws_url).await?;
        let filter = self.base_filter();
        let mut stream = provider.subscribe_logs(&filter).await?;
        tracing::info!(contract = %format!("{:#x}", self.contract), "Subscribed to PaymentReceived logs");

        while let Some(log) = stream.next().await {
            let tx_hash = log.transaction_hash;
            match self.decode(log) {
                Ok(event) => {
                    sink.send(event).await.map_err(|_| ChainError::SinkClosed)?;
                }
                Err(e) => {
                    metrics::counter!("reconciler_undecodable_logs_total").increment(1);
                    tracing::warn!(?tx_hash, error = %e, "Skipping undecodable live log");
                }
            }
        }

        tracing::warn!("PaymentReceived subscription ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::TransactionId;
    use ethers::types::{H256, ValueOrArray};

    use super::*;

    fn client() -> EthChainClient {
        EthChainClient::new(
            EthClientConfig {
                http_url: "http://localhost:8545".to_string(),
                ws_url: None,
                contract_address: ChainAddress::parse(&format!("0x{}", "9".repeat(40))).unwrap(),
                retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            },
            TokenRegistry::new(),
        )
        .unwrap()
    }

    #[test]
    fn invalid_http_url_is_rejected() {
        let result = EthChainClient::new(
            EthClientConfig {
                http_url: "not a url".to_string(),
                ws_url: None,
                contract_address: ChainAddress::zero(),
                retry: RetryPolicy::default(),
            },
            TokenRegistry::new(),
        );
        assert!(matches!(result, Err(ChainError::InvalidUrl(_))));
    }

    #[test]
    fn filter_sets_indexed_topics() {
        let sender = ChainAddress::parse(&format!("0x{}", "ab".repeat(20))).unwrap();
        let filter = client()
            .build_filter(&PaymentFilter::for_payment(TransactionId::new(42), sender).in_block(7))
            .unwrap();

        assert_eq!(
            filter.topics[0],
            Some(ValueOrArray::Value(Some(payment_received_topic())))
        );
        assert_eq!(
            filter.topics[1],
            Some(ValueOrArray::Value(Some(H256::from_low_u64_be(42))))
        );
        assert!(filter.topics[2].is_some());
        assert!(filter.topics[3].is_none());
    }

    #[tokio::test]
    async fn streaming_without_websocket_fails_to_connect() {
        let (tx, _rx) = mpsc::channel(1);
        let result = client().stream_payments(tx).await;
        assert!(matches!(result, Err(ChainError::Connection(_))));
    }

    #[test]
    fn logs_from_other_contracts_are_skipped() {
        use crate::event::tests::payment_log;
        use ethers::types::U256;

        let client = client();
        let mut ours = payment_log(1, Address::zero(), U256::one(), Address::zero(), "ETH");
        ours.address = client.contract;
        let theirs = payment_log(2, Address::zero(), U256::one(), Address::zero(), "ETH");

        let events = client.decode_all(vec![theirs, ours]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_id, TransactionId::new(1));
    }
}
