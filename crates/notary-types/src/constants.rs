//! System-wide constants for the notary cluster.

/// Default tolerance applied by the time-window check (30 seconds).
pub const DEFAULT_TIME_TOLERANCE_MS: u64 = 30_000;

/// Lower bound of the randomized Raft election timeout.
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 300;

/// Upper bound of the randomized Raft election timeout.
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 600;

/// Interval between leader heartbeats (empty `AppendEntries`).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 100;

/// Maximum number of log entries shipped in one `AppendEntries` call.
pub const DEFAULT_MAX_ENTRIES_PER_APPEND: usize = 64;

/// How long the requester waits for a reply before trying another member.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5_000;

/// Maximum number of sends the requester makes before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Pause between requester attempts after a timeout or a leaderless reply.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Default address for notarisation sessions.
pub const DEFAULT_NOTARY_PORT: u16 = 10_010;

/// Default address for Raft peer traffic.
pub const DEFAULT_RAFT_PORT: u16 = 10_020;

/// Upper bound on a single length-prefixed frame on the wire (16 MiB).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// File holding persisted log entries, one JSON document per line.
pub const LOG_ENTRIES_FILE: &str = "raft-log.jsonl";

/// File holding the persisted Raft hard state (term and vote).
pub const HARD_STATE_FILE: &str = "raft-state.json";

/// Domain separator for transaction content hashes.
pub const TX_ID_DOMAIN: &[u8] = b"notary:tx:v1:";

/// Domain separator for the requester's signature over a transaction id.
pub const REQUEST_SIGNING_DOMAIN: &[u8] = b"notary:request:v1:";

/// Domain separator for the notary's attestation over a transaction id.
pub const ATTESTATION_SIGNING_DOMAIN: &[u8] = b"notary:attest:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name.
pub const SERVICE_NAME: &str = "notary";
