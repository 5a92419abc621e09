use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("malformed data: {0}")]
    Format(String),

    #[error("CRC-32 mismatch")]
    CrcMismatch,

    #[error("preamble not detected")]
    PreambleNotDetected,

    #[error("channel unobservable: too few live subcarriers in estimate")]
    ChannelUnobservable,

    #[error("operation timed out")]
    Timeout,

    #[error("chunk store: {0}")]
    Store(String),

    #[error("requested ring range already overwritten")]
    Overrun,

    #[error("cancelled by user")]
    Cancelled,

    #[error("retries exhausted: {last}")]
    RetriesExhausted {
        #[source]
        last: Box<ModemError>,
    },

    #[error("insufficient samples")]
    InsufficientData,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;
