use std::str::FromStr;

use alloy::network::{Ethereum, ReceiptResponse};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::sol;
use async_trait::async_trait;
use tracing::debug;

use crate::chain::ChainClient;
use crate::error::CoordinatorError;
use crate::types::{ChainTxStatus, Network};

sol! {
    #[sol(rpc)]
    contract Erc20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// Read-only EVM client over an HTTP provider. Receipt presence drives
/// verification; allowance and balance reads go through ERC-20 view calls
/// and are never cached here, so the gate always compares fresh values.
pub struct EvmChainClient {
    provider: RootProvider<Ethereum>,
}

impl EvmChainClient {
    pub fn new(rpc_url: &str) -> Result<Self, CoordinatorError> {
        let url = url::Url::parse(rpc_url).map_err(|_| CoordinatorError::InvalidAddress {
            kind: "rpc url",
            value: rpc_url.to_string(),
        })?;
        Ok(Self {
            provider: RootProvider::new_http(url),
        })
    }

    fn parse_address(kind: &'static str, value: &str) -> Result<Address, CoordinatorError> {
        Address::from_str(value).map_err(|_| CoordinatorError::InvalidAddress {
            kind,
            value: value.to_string(),
        })
    }

    fn clamp_u256(value: U256) -> u64 {
        u64::try_from(value).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn network(&self) -> Network {
        Network::Evm
    }

    async fn transaction_status(&self, reference: &str) -> Result<ChainTxStatus, CoordinatorError> {
        let hash = B256::from_str(reference)
            .map_err(|_| CoordinatorError::InvalidReference(reference.to_string()))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash.into())
            .await
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;

        Ok(match receipt {
            Some(receipt) if receipt.status() => ChainTxStatus::Confirmed,
            Some(_) => ChainTxStatus::Failed,
            // No receipt yet: still in the mempool or not propagated
            None => ChainTxStatus::Pending,
        })
    }

    async fn token_allowance(
        &self,
        owner: &str,
        spender: &str,
        token: &str,
    ) -> Result<u64, CoordinatorError> {
        let owner = Self::parse_address("owner", owner)?;
        let spender = Self::parse_address("spender", spender)?;
        let token = Self::parse_address("token", token)?;

        let erc20 = Erc20::new(token, self.provider.clone());
        let allowance = erc20
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;

        debug!(%owner, %spender, %token, %allowance, "fetched allowance");
        Ok(Self::clamp_u256(allowance))
    }

    async fn token_balance(&self, owner: &str, token: &str) -> Result<u64, CoordinatorError> {
        let owner = Self::parse_address("owner", owner)?;
        let token = Self::parse_address("token", token)?;

        let erc20 = Erc20::new(token, self.provider.clone());
        let balance = erc20
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;

        Ok(Self::clamp_u256(balance))
    }
}
