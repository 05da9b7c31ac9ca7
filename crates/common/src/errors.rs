use thiserror::Error;

use crate::models::Broker;

/// Malformed or internally inconsistent alert. Rejected at the boundary;
/// never reaches decision logic or a venue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid alert: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Credential refresh or venue authentication failure. Retryable; the venue
/// call it guards must not be attempted.
#[derive(Debug, Clone, Error)]
#[error("{broker} authentication failed: {cause}")]
pub struct AuthError {
    pub broker: Broker,
    pub cause: String,
}

impl AuthError {
    pub fn new(broker: Broker, cause: impl Into<String>) -> Self {
        Self {
            broker,
            cause: cause.into(),
        }
    }
}

/// Where in the order flow a venue interaction failed. A Close-stage failure
/// suppresses the Open leg; Timeout means the outcome is unknown and local
/// state must not be trusted until reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStage {
    Close,
    Open,
    InsufficientBalance,
    Timeout,
}

impl OrderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStage::Close => "CLOSE",
            OrderStage::Open => "OPEN",
            OrderStage::InsufficientBalance => "INSUFFICIENT_BALANCE",
            OrderStage::Timeout => "TIMEOUT",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{broker} order failed at {}: {message}", stage.as_str())]
pub struct OrderError {
    pub broker: Broker,
    pub stage: OrderStage,
    pub message: String,
}

impl OrderError {
    pub fn new(broker: Broker, stage: OrderStage, message: impl Into<String>) -> Self {
        Self {
            broker,
            stage,
            message: message.into(),
        }
    }

    pub fn unknown_outcome(&self) -> bool {
        self.stage == OrderStage::Timeout
    }
}

/// What an executor can hand back: either the venue refused us entry
/// (auth) or the order flow itself failed at some stage.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Order(#[from] OrderError),
}
