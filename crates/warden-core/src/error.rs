use ethers::types::H256;
use thiserror::Error;
use warden_chain::LedgerError;
use warden_crypto::CryptoError;
use warden_spec::WardenError;

/// Errors surfaced by the core.
///
/// `Validation` means the request can never succeed as submitted, whether it
/// was refused locally or by the ledger. The remaining variants describe the
/// path to the ledger and may succeed on retry.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] WardenError),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
    #[error("Timed out waiting for receipt of {0:?}")]
    Timeout(H256),
    #[error("Signer error: {0}")]
    Signer(#[from] CryptoError),
    #[error("Ledger storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(err) => Error::Validation(err),
            LedgerError::Unavailable(msg) => Error::Unavailable(msg),
            LedgerError::Storage(msg) => Error::Storage(msg),
        }
    }
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Timeout(_))
    }

    pub fn validation(&self) -> Option<&WardenError> {
        match self {
            Error::Validation(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_rejections_are_validation_errors() {
        let err: Error = LedgerError::Rejected(WardenError::Revoked).into();
        assert_eq!(err.validation(), Some(&WardenError::Revoked));
        assert!(!err.is_retryable());

        let err: Error = LedgerError::Unavailable("connection reset".to_string()).into();
        assert!(err.is_retryable());
        assert!(Error::Timeout(H256::zero()).is_retryable());
    }
}
