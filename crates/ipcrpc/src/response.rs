//! # Response
//!
//! The two response shapes, and the one place they are told apart.
//!
//! | shape                        | meaning                                        |
//! |------------------------------|------------------------------------------------|
//! | `[]`                         | transport failure (nothing came back)          |
//! | `[Null(msg)]`                | transport failure carrying `msg`               |
//! | `[UInt64(Ok), v1, .., vN]`   | success with return values `v1..vN`           |
//! | `[UInt64(code), String(m)]`  | application failure `code` with message `m`    |
//!
//! Anything else (a non-`UInt64` head, an unknown code) is reported as a transport
//! failure because the peer is not speaking the protocol.

use crate::error::ErrorCode;
use crate::value::Value;

/// The values returned for one call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response(Vec<Value>);

/// Why a call did not produce return values.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The channel or protocol failed; the remote operation may not have run.
    Transport(String),
    /// The remote operation ran and reported a failure.
    Remote { code: ErrorCode, message: String },
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport failure: {}", msg),
            Self::Remote { code, message } => write!(f, "remote error {}: {}", code, message),
        }
    }
}

impl std::error::Error for CallError {}

impl CallError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// The application error code, if the remote side produced one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Transport(_) => None,
            Self::Remote { code, .. } => Some(*code),
        }
    }
}

impl Response {
    /// Wraps values exactly as received.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// A locally or remotely synthesized transport failure: `[Null(message)]`.
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self(vec![Value::Null(Some(message.into()))])
    }

    /// A successful outcome: `[UInt64(Ok), values..]`.
    pub fn ok(values: impl IntoIterator<Item = Value>) -> Self {
        let mut out = vec![Value::UInt64(ErrorCode::Ok.as_u64())];
        out.extend(values);
        Self(out)
    }

    /// An application failure: `[UInt64(code), String(message)]`.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self(vec![Value::UInt64(code.as_u64()), Value::String(message.into())])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for every shape that `classify` reports as `CallError::Transport`.
    pub fn is_transport_error(&self) -> bool {
        matches!(self.classify(), Err(CallError::Transport(_)))
    }

    /// The application status code, if this is an application-level response.
    pub fn code(&self) -> Option<ErrorCode> {
        match self.0.first() {
            Some(Value::UInt64(raw)) => ErrorCode::from_u64(*raw),
            _ => None,
        }
    }

    /// Splits the response into its return values or the failure it reports.
    pub fn classify(&self) -> std::result::Result<&[Value], CallError> {
        let Some(head) = self.0.first() else {
            return Err(CallError::Transport("empty response, verify IPC status".into()));
        };

        let raw = match head {
            Value::Null(msg) => {
                let msg = msg.clone().unwrap_or_else(|| "unspecified transport failure".into());
                return Err(CallError::Transport(msg));
            }
            Value::UInt64(raw) => *raw,
            other => {
                return Err(CallError::Transport(format!(
                    "malformed response: expected UInt64 error code, found {}",
                    other.ty()
                )));
            }
        };

        let Some(code) = ErrorCode::from_u64(raw) else {
            return Err(CallError::Transport(format!("unknown error code {}", raw)));
        };

        if code.is_ok() {
            return Ok(&self.0[1..]);
        }

        let message = match self.0.get(1).and_then(Value::as_str) {
            Some(msg) => msg.to_string(),
            None => format!("received error code {}, no additional description provided", raw),
        };
        Err(CallError::Remote { code, message })
    }

    /// Owned variant of [`Response::classify`].
    pub fn into_result(mut self) -> std::result::Result<Vec<Value>, CallError> {
        self.classify()?;
        self.0.remove(0);
        Ok(self.0)
    }
}

impl From<Vec<Value>> for Response {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
