use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Token base units (SPL-style, 9 decimals)
pub const TOKEN_DECIMALS: u64 = 1_000_000_000; // 10^9

// Stable tokens (USDT/USDC) use 6 decimals on both chains
pub const STABLE_DECIMALS: u64 = 1_000_000;

// Native coin base units
pub const EVM_NATIVE_DECIMALS: u64 = 1_000_000_000_000_000_000; // wei, 10^18
pub const SOLANA_NATIVE_DECIMALS: u64 = 1_000_000_000; // lamports, 10^9

// Verification polling bounds: 30 attempts x 5s, roughly 150s worst case
pub const MAX_VERIFY_ATTEMPTS: u32 = 30;
pub const VERIFY_RETRY_INTERVAL_SECS: u64 = 5;

// Approvals cover 2x the purchase amount so the next purchase can skip the
// approval transaction entirely
pub const APPROVAL_HEADROOM_MULTIPLIER: u64 = 2;

// Referral rates
pub const REFERRAL_BONUS_RATE: Decimal = dec!(0.10); // flat 10% for presale referrals
pub const SECOND_TIER_PERCENT: u64 = 10; // share of every bonus sent to the platform wallet

// 5-level referral-tree rates, 15% total
pub const TIERED_REFERRAL_RATES: [Decimal; 5] =
    [dec!(0.08), dec!(0.03), dec!(0.02), dec!(0.01), dec!(0.01)];

// Purchase limits in USD (per transaction)
pub const PRESALE_MIN_PURCHASE_USD: Decimal = dec!(25.00); // $25.00
pub const PRESALE_MAX_PURCHASE_USD: Decimal = dec!(50000.00); // $50,000 per transaction

// Bonus pool cap in bonus-token base units (5% of 256M supply)
pub const REFERRAL_POOL_CAP: u64 = 12_800_000 * TOKEN_DECIMALS;

// Price cache TTL
pub const PRICE_CACHE_TTL_SECS: i64 = 300; // 5 minutes

// Fallback prices used when the oracle fetch fails
pub const FALLBACK_EVM_NATIVE_PRICE_USD: Decimal = dec!(2500.00); // ETH
pub const FALLBACK_SOLANA_NATIVE_PRICE_USD: Decimal = dec!(150.00); // SOL
pub const FALLBACK_STABLE_PRICE_USD: Decimal = dec!(1.00); // USDT/USDC are pegged
pub const FALLBACK_BONUS_TOKEN_PRICE_USD: Decimal = dec!(8.00);
