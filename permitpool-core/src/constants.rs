//! Protocol constants and Sepolia sandbox defaults.

// ═══════════════════════════════════════════════════════════════════════════════
// NETWORK DEFAULTS (Yellow clearnet sandbox on Sepolia)
// ═══════════════════════════════════════════════════════════════════════════════

/// Clearnet sandbox WebSocket endpoint.
pub const DEFAULT_WS_URL: &str = "wss://clearnet-sandbox.yellow.com/ws";

/// Public Sepolia RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "https://1rpc.io/sepolia";

/// Sepolia chain id.
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

/// Nitrolite custody contract on Sepolia.
pub const SEPOLIA_CUSTODY_ADDRESS: &str = "0x019B65A265EB3363822f2752141b3dF16131b262";

/// Nitrolite adjudicator contract on Sepolia.
pub const SEPOLIA_ADJUDICATOR_ADDRESS: &str = "0x7c7ccbc98469190849BCC6c926307794fDfB11F2";

/// `ytest.usd` token on Sepolia.
pub const SEPOLIA_TEST_TOKEN: &str = "0xDB9F293e3898c9E5536A3be1b0C56c89d2b32DEb";

/// Challenge period for channels, in seconds.
pub const DEFAULT_CHALLENGE_DURATION: u64 = 3600;

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Sandbox funding asset.
pub const DEFAULT_FUNDING_ASSET: &str = "ytest.usd";

/// Allowance granted to the session key.
pub const DEFAULT_ALLOWANCE_AMOUNT: &str = "1000000000";

/// Session key lifetime, in seconds.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Application name announced during auth and used as EIP-712 domain name.
pub const DEFAULT_APPLICATION: &str = "PermitPool";

/// Scope string granted to the session key.
pub const DEFAULT_SCOPE: &str = "permitpool.app";

/// Amount moved into the channel by the resize phase.
pub const DEFAULT_ALLOCATE_AMOUNT: u64 = 100;

/// Amount moved by the off-chain transfer phase.
pub const DEFAULT_TRANSFER_AMOUNT: &str = "50";

/// Watchdog window between phase transitions, in seconds.
pub const DEFAULT_WATCHDOG_SECS: u64 = 60;

/// Upper bound for one on-chain submit + confirmation leg, in seconds.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 180;

/// Attempts for the initial WebSocket connect.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

// ═══════════════════════════════════════════════════════════════════════════════
// LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Longest challenge string the account signer accepts.
pub const MAX_CHALLENGE_LEN: usize = 1024;

/// Primary type of the auth typed-data structure.
pub const AUTH_PRIMARY_TYPE: &str = "Policy";

/// Destination of the sandbox off-chain transfer.
pub const DEFAULT_TRANSFER_DESTINATION: &str = "0xc7E6827ad9DA2c89188fAEd836F9285E6bFdCCCC";
