//! Transport fault taxonomy and classification.
//!
//! Everything raised while moving bytes between an MCP client and a tool
//! handler is normalized into a [`Fault`] before any decision is made about
//! it. Classification itself is pure so the disconnect/session/fatal split
//! can be tested without a socket in sight.

use std::io;
use std::sync::OnceLock;

use regex::Regex;

/// OS error codes treated as "the peer is gone": EPIPE, ECONNRESET on BSD
/// platforms, and ECONNRESET on Linux.
pub const DISCONNECT_OS_CODES: [i32; 3] = [32, 54, 104];

const SESSION_NOT_FOUND_MARKER: &str = "Could not find session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The receiving end of a session channel is closed.
    ClosedResource,
    BrokenPipe,
    ConnectionReset,
    /// An OS-level error identified only by its errno.
    Os,
    /// A message was posted against a session id the registry does not know.
    SessionNotFound,
    Other,
}

/// Normalized description of a single transport fault: a kind, an optional
/// OS error code, and the original message text.
#[derive(Debug, Clone)]
pub struct Fault {
    pub kind: FaultKind,
    pub os_code: Option<i32>,
    pub message: String,
}

impl Fault {
    pub fn closed_resource(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::ClosedResource,
            os_code: None,
            message: message.into(),
        }
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self {
            kind: FaultKind::SessionNotFound,
            os_code: None,
            message: format!("{} {}", SESSION_NOT_FOUND_MARKER, session_id),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Other,
            os_code: None,
            message: message.into(),
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::BrokenPipe => FaultKind::BrokenPipe,
            io::ErrorKind::ConnectionReset => FaultKind::ConnectionReset,
            _ => match err.raw_os_error() {
                Some(code) if DISCONNECT_OS_CODES.contains(&code) => FaultKind::Os,
                _ => FaultKind::Other,
            },
        };
        Self {
            kind,
            os_code: err.raw_os_error(),
            message: err.to_string(),
        }
    }

    /// True for any fault meaning the peer's receiving end is gone.
    pub fn is_disconnect(&self) -> bool {
        match self.kind {
            FaultKind::ClosedResource | FaultKind::BrokenPipe | FaultKind::ConnectionReset => true,
            FaultKind::Os => self
                .os_code
                .map(|code| DISCONNECT_OS_CODES.contains(&code))
                .unwrap_or(false),
            FaultKind::SessionNotFound | FaultKind::Other => false,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Fault {}

/// A single raised object bundling faults from concurrent sub-tasks.
///
/// Classification requires every cause to be disconnect-class before the
/// aggregate may be swallowed; a partial match re-raises the whole thing
/// unchanged.
#[derive(Debug, Clone)]
pub struct AggregateFault {
    pub causes: Vec<Fault>,
}

impl AggregateFault {
    pub fn new(causes: Vec<Fault>) -> Self {
        Self { causes }
    }
}

impl std::fmt::Display for AggregateFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} fault(s):", self.causes.len())?;
        for cause in &self.causes {
            write!(f, " {};", cause.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFault {}

/// What the router does with a fault raised during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    /// Drop silently; there is no client left to tell.
    PeerDisconnected,
    /// Report with a reconnect hint.
    SessionExpired { session_id: String },
    /// Log loudly, answer 500, keep serving everything else.
    Fatal,
}

/// Map a normalized fault to its dispatch outcome.
pub fn classify(fault: &Fault) -> DispatchOutcome {
    if fault.is_disconnect() {
        return DispatchOutcome::PeerDisconnected;
    }
    if fault.kind == FaultKind::SessionNotFound || fault.message.contains(SESSION_NOT_FOUND_MARKER)
    {
        return DispatchOutcome::SessionExpired {
            session_id: extract_session_id(&fault.message),
        };
    }
    DispatchOutcome::Fatal
}

/// Classify a grouped fault. Returns `Some(PeerDisconnected)` only when
/// every cause is disconnect-class; otherwise `None`, and the caller must
/// propagate the aggregate unchanged.
pub fn classify_aggregate(aggregate: &AggregateFault) -> Option<DispatchOutcome> {
    if !aggregate.causes.is_empty() && aggregate.causes.iter().all(Fault::is_disconnect) {
        Some(DispatchOutcome::PeerDisconnected)
    } else {
        None
    }
}

/// Pull a UUID-shaped substring out of an error message, falling back to
/// `"unknown"` when none is present.
pub fn extract_session_id(message: &str) -> String {
    static UUID_RE: OnceLock<Regex> = OnceLock::new();
    let re = UUID_RE.get_or_init(|| {
        Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .expect("uuid pattern")
    });
    re.find(message)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
