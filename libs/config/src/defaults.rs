//! Default configuration values
//!
//! Values used when a configuration file omits a setting.

/// Exchange defaults
pub mod exchange {
    /// Reply deadline for ordinary requests (milliseconds)
    pub const REMOTE_REPLY_TIMEOUT_MS: u64 = 5_000;
}

/// Handshake defaults
pub mod handshake {
    /// Reply deadline for a single handshake attempt (milliseconds)
    pub const TIMEOUT_MS: u64 = 1_000;

    /// Attempts before a timing-out handshake fails permanently
    pub const MAX_TRIES: u32 = 3;

    /// Delay before each attempt (milliseconds)
    pub const RETRY_DELAY_MS: u64 = 0;
}

/// Health checker defaults
pub mod health {
    /// Pause between liveness probes (milliseconds)
    pub const INTERVAL_MS: u64 = 10_000;

    /// Reply deadline for a single probe (milliseconds)
    pub const TIMEOUT_MS: u64 = 2_000;

    /// Consecutive missed probes that mark a process INCOMM
    pub const MAX_MISSED: u32 = 2;
}

/// Teardown defaults
pub mod teardown {
    /// Reply deadline for `willTerm` / `term` (milliseconds)
    pub const TERM_ACK_TIMEOUT_MS: u64 = 2_000;

    /// Consecutive missed `term` acks that mark a process ROGUE
    pub const MAX_MISSED_TERM_ACKS: u32 = 2;
}
