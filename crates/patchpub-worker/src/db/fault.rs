//! Backend fault taxonomy
//!
//! Every database failure is reduced to a [`BackendFault`] and classified as
//! recoverable (retry on a fresh session) or fatal (stop). The classification
//! is a fixed catalog of transient signatures plus the driver's own notion of
//! a lost connection.

use thiserror::Error;

/// A failure reported by the metadata backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}{}", code_suffix(.code))]
pub struct BackendFault {
    pub message: String,
    /// SQLSTATE or vendor error code, when the backend reported one
    pub code: Option<String>,
    /// The driver considers the underlying connection unusable
    pub connection_lost: bool,
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl BackendFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            connection_lost: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            connection_lost: true,
        }
    }
}

impl From<sqlx::Error> for BackendFault {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        match &err {
            sqlx::Error::Database(db_err) => Self {
                code: db_err.code().map(|c| c.into_owned()),
                message,
                connection_lost: false,
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::connection_lost(message),
            _ => Self::new(message),
        }
    }
}

/// Outcome of classifying a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Recoverable,
    Fatal,
}

/// A known transient failure signature
#[derive(Debug, Clone, Copy)]
pub struct TransientSignature {
    pub code: &'static str,
    pub meaning: &'static str,
}

/// Faults whose code matches one of these are retried on a fresh session.
pub const TRANSIENT_SIGNATURES: &[TransientSignature] = &[
    TransientSignature { code: "DPI-1010", meaning: "not connected" },
    TransientSignature { code: "ORA-03113", meaning: "end-of-file on communication channel" },
    TransientSignature { code: "ORA-03114", meaning: "not connected to the database" },
    TransientSignature { code: "ORA-12514", meaning: "listener does not know the requested service" },
    TransientSignature { code: "ORA-12541", meaning: "no listener" },
    TransientSignature { code: "ORA-25408", meaning: "cannot safely replay call" },
    TransientSignature { code: "ORA-00028", meaning: "session has been killed" },
    TransientSignature { code: "08000", meaning: "connection exception" },
    TransientSignature { code: "08001", meaning: "unable to establish connection" },
    TransientSignature { code: "08003", meaning: "connection does not exist" },
    TransientSignature { code: "08004", meaning: "server rejected the connection" },
    TransientSignature { code: "08006", meaning: "connection failure" },
    TransientSignature { code: "57P01", meaning: "admin shutdown" },
    TransientSignature { code: "57P02", meaning: "crash shutdown" },
    TransientSignature { code: "57P03", meaning: "cannot connect now" },
];

/// Look up the transient signature a fault carries, by code or in its message.
pub fn transient_signature(fault: &BackendFault) -> Option<&'static TransientSignature> {
    TRANSIENT_SIGNATURES.iter().find(|sig| {
        fault.code.as_deref() == Some(sig.code) || fault.message.contains(sig.code)
    })
}

pub fn classify(fault: &BackendFault) -> FaultClass {
    if fault.connection_lost || transient_signature(fault).is_some() {
        FaultClass::Recoverable
    } else {
        FaultClass::Fatal
    }
}
