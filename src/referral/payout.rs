//! Bonus payout sender. The production sender pays both legs of the split
//! from the treasury in a single Solana transaction, so the referrer and the
//! platform wallet are credited atomically.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use tracing::info;

use crate::error::CoordinatorError;

#[async_trait]
pub trait BonusSender: Send + Sync {
    /// Transfers both legs of a bonus split and returns the transaction
    /// signature. A zero second-tier leg is skipped, not sent.
    async fn send_split(
        &self,
        referrer_wallet: &str,
        referrer_amount: u64,
        second_tier_amount: u64,
    ) -> Result<String, CoordinatorError>;
}

pub struct SolanaBonusSender {
    rpc: Arc<RpcClient>,
    treasury: Arc<Keypair>,
    bonus_mint: Pubkey,
    bonus_decimals: u8,
    platform_wallet: Pubkey,
}

impl SolanaBonusSender {
    pub fn new(
        rpc: Arc<RpcClient>,
        treasury: Arc<Keypair>,
        bonus_mint: &str,
        bonus_decimals: u8,
        platform_wallet: &str,
    ) -> Result<Self, CoordinatorError> {
        let bonus_mint = Pubkey::from_str(bonus_mint).map_err(|_| {
            CoordinatorError::InvalidAddress {
                kind: "bonus mint",
                value: bonus_mint.to_string(),
            }
        })?;
        let platform_wallet = Pubkey::from_str(platform_wallet).map_err(|_| {
            CoordinatorError::InvalidAddress {
                kind: "platform wallet",
                value: platform_wallet.to_string(),
            }
        })?;
        Ok(Self {
            rpc,
            treasury,
            bonus_mint,
            bonus_decimals,
            platform_wallet,
        })
    }

    fn transfer_instruction(
        &self,
        treasury_ata: &Pubkey,
        recipient_wallet: &Pubkey,
        amount: u64,
    ) -> Result<Instruction, CoordinatorError> {
        let recipient_ata = get_associated_token_address(recipient_wallet, &self.bonus_mint);
        spl_token::instruction::transfer_checked(
            &spl_token::id(),
            treasury_ata,
            &self.bonus_mint,
            &recipient_ata,
            &self.treasury.pubkey(),
            &[],
            amount,
            self.bonus_decimals,
        )
        .map_err(|e| CoordinatorError::SettlementTransferFailed {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl BonusSender for SolanaBonusSender {
    async fn send_split(
        &self,
        referrer_wallet: &str,
        referrer_amount: u64,
        second_tier_amount: u64,
    ) -> Result<String, CoordinatorError> {
        let referrer = Pubkey::from_str(referrer_wallet).map_err(|_| {
            CoordinatorError::InvalidAddress {
                kind: "payout wallet",
                value: referrer_wallet.to_string(),
            }
        })?;
        let treasury_ata = get_associated_token_address(&self.treasury.pubkey(), &self.bonus_mint);

        // Both transfers ride one transaction: either the whole split lands
        // or none of it does
        let mut instructions = vec![
            create_associated_token_account_idempotent(
                &self.treasury.pubkey(),
                &referrer,
                &self.bonus_mint,
                &spl_token::id(),
            ),
            self.transfer_instruction(&treasury_ata, &referrer, referrer_amount)?,
        ];
        if second_tier_amount > 0 {
            instructions.push(self.transfer_instruction(
                &treasury_ata,
                &self.platform_wallet,
                second_tier_amount,
            )?);
        }

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;
        let transaction = Transaction::new_signed_with_payer(
            &instructions,
            Some(&self.treasury.pubkey()),
            &[self.treasury.as_ref()],
            blockhash,
        );

        let signature = self
            .rpc
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|e| CoordinatorError::SettlementTransferFailed {
                reason: e.to_string(),
            })?;

        info!(%signature, referrer_amount, second_tier_amount, "bonus split sent");
        Ok(signature.to_string())
    }
}
