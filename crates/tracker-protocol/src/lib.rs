pub mod config;
pub mod error;
pub mod failure_counter;
pub mod wire;

/// Protocol version carried in logs only; the wire header has no version
/// byte (mirrors the fixed header used by the control protocol this core
/// speaks).
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum length of a group name, in bytes (null-padded on the wire).
pub const GROUP_NAME_MAX_LEN: usize = 16;

/// Maximum length of a storage server id, in bytes (null-padded on the wire).
pub const STORAGE_ID_MAX_SIZE: usize = 16;

/// Size of an ASCII `"ip:port"` field as carried by NOTIFY/COMMIT requests.
pub const IP_PORT_SIZE: usize = 22;

/// Width of one `PING_LEADER` response record: a group name followed by a
/// trunk server id, both null-padded to their max length.
pub const TRUNK_RECORD_SIZE: usize = GROUP_NAME_MAX_LEN + STORAGE_ID_MAX_SIZE;

/// Default tracker listening port, used when a config entry omits one.
pub const DEFAULT_TRACKER_PORT: u16 = 22122;

/// Upper bound of the election's jittered back-off, in whole seconds.
pub const MAX_SELECT_SLEEP_SECONDS: u64 = 10;

/// Cadence of the ping loop while following a leader.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 1000;

/// Consecutive ping failures that demote a leader back to "unknown".
pub const PING_FAILURE_DEMOTE_THRESHOLD: u32 = 3;
