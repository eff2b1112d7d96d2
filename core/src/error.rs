use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("invalid frame format character {0:?}")]
    InvalidPatternChar(char),

    #[error("frame pattern {0:?} is too short to frame anything")]
    PatternTooShort(String),

    #[error("frame of {0} bits does not fit the 31-bit shift register")]
    FrameTooLong(usize),

    #[error("{0} data bits do not fit in one byte")]
    DataTooWide(usize),

    #[error("sample rate {0} Hz is unusable for this configuration")]
    InvalidSampleRate(usize),

    #[error("sine table holds {table} samples but the modem runs at {rate} Hz")]
    TableRateMismatch { table: usize, rate: usize },

    #[error("audio backend: {0}")]
    AudioBackend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModemError>;
