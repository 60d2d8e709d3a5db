use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DnsError>;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("truncated input at offset {offset}")]
    TruncatedInput { offset: usize },

    #[error("invalid compression pointer at offset {offset} targeting {target}")]
    InvalidPointer { offset: usize, target: usize },

    #[error("compression loop: more than {max_jumps} pointer jumps")]
    CompressionLoop { max_jumps: usize },

    #[error("label of {length} bytes at offset {offset} overruns the buffer")]
    LabelOverrun { offset: usize, length: usize },

    #[error("reserved label type 0x{byte:02X} at offset {offset}")]
    InvalidLabelType { offset: usize, byte: u8 },

    #[error("label byte 0x{byte:02X} at offset {offset} is not a hostname character")]
    InvalidLabelByte { offset: usize, byte: u8 },

    #[error("label '{label}' exceeds 63 bytes")]
    LabelTooLong { label: String },

    #[error("empty label in name '{name}'")]
    EmptyLabel { name: String },

    #[error("name of {length} bytes exceeds 255 on the wire")]
    NameTooLong { length: usize },

    #[error("no response from {upstream} within {after:?}")]
    Timeout { upstream: SocketAddr, after: Duration },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DnsError {
    /// Short label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DnsError::TruncatedInput { .. } => "truncated_input",
            DnsError::InvalidPointer { .. } => "invalid_pointer",
            DnsError::CompressionLoop { .. } => "compression_loop",
            DnsError::LabelOverrun { .. } => "label_overrun",
            DnsError::InvalidLabelType { .. } => "invalid_label_type",
            DnsError::InvalidLabelByte { .. } => "invalid_label_byte",
            DnsError::LabelTooLong { .. } => "label_too_long",
            DnsError::NameTooLong { .. } => "name_too_long",
            DnsError::EmptyLabel { .. } => "empty_label",
            DnsError::Timeout { .. } => "timeout",
            DnsError::Transport(_) => "transport",
            DnsError::Configuration(_) => "configuration",
        }
    }
}
