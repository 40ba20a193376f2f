use std::fmt;
use std::time::Duration;

/// How long the client waits for a handshake reply before giving up, and how
/// long it waits for a FIN reply during teardown.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Steady-state idle timeout on the receiver; a recv timeout in this state is
/// treated as an implicit FIN.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// The three-phase connection lifecycle of `spec.md` §4.6. `Closed` is both
/// the state before a handshake begins and the state a clean or best-effort
/// teardown ends in; `Broken` is the supplemental terminal state entered on
/// handshake timeout or MAX_RETRIES exhaustion (see `SPEC_FULL.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    SynSent,
    SynRcvd,
    Established,
    FinSent,
    Broken,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynRcvd => "SYN_RECEIVED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinSent => "FIN_SENT",
            ConnectionState::Broken => "BROKEN",
        };
        f.write_str(s)
    }
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Broken)
    }
}
