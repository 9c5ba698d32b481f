//! Chain and node-wide constants.

/// Node software version advertised to peers.
pub const NODE_VERSION: &str = "2.0.0";

/// Smallest units per coin (six fractional digits).
pub const SMALLEST: u64 = 1_000_000;

/// Difficulty of the genesis block, in tenths.
pub const START_DIFFICULTY_TENTHS: u16 = 60;

/// Target seconds between blocks.
pub const BLOCK_TIME: u64 = 180;

/// Difficulty is recomputed every this many blocks.
pub const BLOCKS_PER_ADJUSTMENT: u64 = 512;

/// Hard cap on total supply, in coins.
pub const MAX_SUPPLY: u64 = 33_554_432;

/// Initial block reward, in coins.
pub const INITIAL_REWARD: u64 = 64;

/// Blocks between reward halvings.
pub const HALVING_INTERVAL: u64 = 262_144;

/// Subsidy ends permanently after this many halvings.
pub const MAX_HALVINGS: u64 = 64;

/// Maximum block content size in hex characters (2 MiB raw).
pub const MAX_BLOCK_SIZE_HEX: usize = 4_194_304;

/// Maximum aggregate transaction data per block, in hex characters.
pub const MAX_TX_DATA_SIZE: usize = 1_900_000;

/// Maximum pending transactions admitted to the mempool.
pub const MAX_MEMPOOL_SIZE: usize = 8_192;

/// Maximum depth of a chain reorganisation.
pub const MAX_REORG_DEPTH: u64 = 128;

/// Maximum blocks accepted in one bulk submission.
pub const MAX_BLOCKS_PER_SUBMISSION: usize = 512;

/// Maximum transaction hashes served per bulk fetch.
pub const MAX_TX_FETCH_LIMIT: usize = 512;

/// Maximum peers held in memory.
pub const MAX_PEERS: usize = 64;

/// Maximum peers persisted to disk.
pub const MAX_PEERS_COUNT: usize = 256;

/// Peers unseen for this long are pruned (seconds).
pub const PEER_INACTIVITY_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound on bytes per sync batch.
pub const MAX_BATCH_BYTES: usize = 20 * 1024 * 1024;

/// Outbound request timeout, in seconds.
pub const CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Accepted clock skew for signed peer requests, in seconds.
pub const ENVELOPE_MAX_SKEW_SECS: u64 = 30;

/// Interval between peer-discovery rounds, in seconds.
pub const DISCOVERY_INTERVAL_SECS: u64 = 60;

/// Interval between mempool garbage-collection rounds, in seconds.
pub const MEMPOOL_GC_INTERVAL_SECS: u64 = 600;

/// Predecessor hash sentinel of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
