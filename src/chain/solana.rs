use std::str::FromStr;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::TransactionConfirmationStatus;
use spl_associated_token_account::get_associated_token_address;
use tracing::debug;

use crate::chain::ChainClient;
use crate::error::CoordinatorError;
use crate::types::{ChainTxStatus, Network};

/// Read-only Solana client. Signature status lookups search transaction
/// history so references older than the recent-status cache still resolve.
pub struct SolanaChainClient {
    rpc: RpcClient,
}

impl SolanaChainClient {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed()),
        }
    }

    fn parse_pubkey(kind: &'static str, value: &str) -> Result<Pubkey, CoordinatorError> {
        Pubkey::from_str(value).map_err(|_| CoordinatorError::InvalidAddress {
            kind,
            value: value.to_string(),
        })
    }
}

#[async_trait]
impl ChainClient for SolanaChainClient {
    fn network(&self) -> Network {
        Network::Solana
    }

    async fn transaction_status(&self, reference: &str) -> Result<ChainTxStatus, CoordinatorError> {
        let signature = Signature::from_str(reference)
            .map_err(|_| CoordinatorError::InvalidReference(reference.to_string()))?;

        let statuses = self
            .rpc
            .get_signature_statuses_with_history(&[signature])
            .await
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;

        let status = match statuses.value.into_iter().next().flatten() {
            // The cluster has not seen the signature yet
            None => return Ok(ChainTxStatus::Pending),
            Some(status) => status,
        };

        if status.err.is_some() {
            return Ok(ChainTxStatus::Failed);
        }

        Ok(match status.confirmation_status {
            Some(TransactionConfirmationStatus::Confirmed)
            | Some(TransactionConfirmationStatus::Finalized) => ChainTxStatus::Confirmed,
            _ => ChainTxStatus::Pending,
        })
    }

    async fn token_allowance(
        &self,
        _owner: &str,
        _spender: &str,
        _token: &str,
    ) -> Result<u64, CoordinatorError> {
        Err(CoordinatorError::AllowanceUnsupported {
            network: Network::Solana,
        })
    }

    async fn token_balance(&self, owner: &str, token: &str) -> Result<u64, CoordinatorError> {
        let owner = Self::parse_pubkey("owner", owner)?;
        let mint = Self::parse_pubkey("token", token)?;
        let ata = get_associated_token_address(&owner, &mint);

        match self.rpc.get_token_account_balance(&ata).await {
            Ok(balance) => balance
                .amount
                .parse::<u64>()
                .map_err(|_| CoordinatorError::Rpc("unparseable token balance".to_string())),
            Err(err) => {
                // A missing associated token account reads as a zero balance
                debug!(%owner, %mint, %err, "token account lookup failed, treating as empty");
                Ok(0)
            }
        }
    }
}
