/// The fixed error taxonomy returned across the request surface (§6/§7 of
/// the design document). The numeric assignment is part of the external
/// contract and intentionally leaves a gap at `3` — the upstream source
/// reserves that value for a D-Bus-specific status this crate has no use
/// for, and the gap is kept so a future wire shim stays numerically
/// compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorStatus {
    NotSet = 0,
    Ok = 1,
    Error = 2,
    Internal = 4,
    Parameter = 5,
    WrongSession = 6,
    ResponsePending = 7,
    WrongClient = 8,
    /// Sentinel returned by `RegisterLifecycleClient` when the call updated
    /// an existing record rather than creating a new one.
    Last = 9,
}

impl ErrorStatus {
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Internal error type used by fallible plumbing beneath the request
/// surface. The request surface itself speaks `ErrorStatus`, not this type
/// directly; see `NsmError::as_error_status` for the mapping.
#[derive(Debug, thiserror::Error)]
pub enum NsmError {
    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("client {0} is not currently expected")]
    WrongClient(ClientIdDisplay),

    #[error("request refused: {0}")]
    Refused(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Thin wrapper so `NsmError::WrongClient` can carry a client id without
/// this crate's error module depending on the `ids` module's visibility
/// rules at the item level.
#[derive(Debug, Clone, Copy)]
pub struct ClientIdDisplay(pub crate::ClientId);

impl std::fmt::Display for ClientIdDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NsmError {
    #[must_use]
    pub fn as_error_status(&self) -> ErrorStatus {
        match self {
            NsmError::Parameter(_) => ErrorStatus::Parameter,
            NsmError::WrongClient(_) => ErrorStatus::WrongClient,
            NsmError::Refused(_) => ErrorStatus::Error,
            NsmError::Internal(_) => ErrorStatus::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes_match_external_contract() {
        assert_eq!(ErrorStatus::NotSet.code(), 0);
        assert_eq!(ErrorStatus::Ok.code(), 1);
        assert_eq!(ErrorStatus::Error.code(), 2);
        assert_eq!(ErrorStatus::Internal.code(), 4);
        assert_eq!(ErrorStatus::Parameter.code(), 5);
        assert_eq!(ErrorStatus::WrongSession.code(), 6);
        assert_eq!(ErrorStatus::ResponsePending.code(), 7);
        assert_eq!(ErrorStatus::WrongClient.code(), 8);
    }

    #[test]
    fn nsm_error_maps_to_expected_status() {
        assert_eq!(
            NsmError::Parameter("bad".into()).as_error_status(),
            ErrorStatus::Parameter
        );
        assert_eq!(
            NsmError::Internal("oops".into()).as_error_status(),
            ErrorStatus::Internal
        );
    }
}
