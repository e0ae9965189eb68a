//! ISO 7816-4 command/response APDU codec, short form only: enough of cases
//! 1-4 to carry SELECT and READ BINARY, nothing more.
//!
//! Parses the header, then branches on the remaining length to tell the
//! four short-form cases apart.

use thiserror::Error;

/// Errors raised parsing a command APDU. All are framing errors; callers
/// convert them to SW `6F00`, never propagate them further.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApduError {
    #[error("command APDU must be at least 4 bytes, got {0}")]
    TooShort(usize),

    #[error("declared Lc {lc} exceeds the {available} bytes remaining after the header")]
    LcExceedsAvailable { lc: usize, available: usize },

    #[error("trailing bytes after Lc-declared data do not match a recognized short-form case")]
    MalformedLength,
}

/// A parsed command APDU: short form only, i.e. at most one byte each for
/// `Lc` and `Le`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length, already resolved so that an encoded `0x00`
    /// means 256. `None` when the command carries no Le byte (cases 1 and
    /// 3).
    pub le: Option<u32>,
}

impl CommandApdu {
    /// Parse the four short-form cases: header-only (case 1), header+Le
    /// (case 2), header+Lc+data (case 3), header+Lc+data+Le (case 4).
    pub fn parse(bytes: &[u8]) -> Result<Self, ApduError> {
        if bytes.len() < 4 {
            return Err(ApduError::TooShort(bytes.len()));
        }
        let (cla, ins, p1, p2) = (bytes[0], bytes[1], bytes[2], bytes[3]);
        let rest = &bytes[4..];

        if rest.is_empty() {
            return Ok(CommandApdu {
                cla,
                ins,
                p1,
                p2,
                data: Vec::new(),
                le: None,
            });
        }

        if rest.len() == 1 {
            return Ok(CommandApdu {
                cla,
                ins,
                p1,
                p2,
                data: Vec::new(),
                le: Some(resolve_le(rest[0])),
            });
        }

        let lc = rest[0] as usize;
        let available = rest.len() - 1;
        if lc > available {
            return Err(ApduError::LcExceedsAvailable { lc, available });
        }
        let data = rest[1..1 + lc].to_vec();

        if available == lc {
            Ok(CommandApdu {
                cla,
                ins,
                p1,
                p2,
                data,
                le: None,
            })
        } else if available == lc + 1 {
            Ok(CommandApdu {
                cla,
                ins,
                p1,
                p2,
                data,
                le: Some(resolve_le(rest[1 + lc])),
            })
        } else {
            Err(ApduError::MalformedLength)
        }
    }
}

fn resolve_le(byte: u8) -> u32 {
    if byte == 0 {
        256
    } else {
        byte as u32
    }
}

/// Status word `9000`: normal processing.
pub const SW_SUCCESS: (u8, u8) = (0x90, 0x00);
/// Status word `6982`: security status not satisfied (READ before the
/// relevant SELECT).
pub const SW_SECURITY_STATUS_NOT_SATISFIED: (u8, u8) = (0x69, 0x82);
/// Status word `6A82`: file or application not found.
pub const SW_FILE_NOT_FOUND: (u8, u8) = (0x6A, 0x82);
/// Status word `6D00`: instruction code not supported.
pub const SW_INS_NOT_SUPPORTED: (u8, u8) = (0x6D, 0x00);
/// Status word `6E00`: class not supported.
pub const SW_CLA_NOT_SUPPORTED: (u8, u8) = (0x6E, 0x00);
/// Status word `6F00`: no precise diagnosis (framing, persistence, or
/// cryptographic-precondition failure).
pub const SW_NO_PRECISE_DIAGNOSIS: (u8, u8) = (0x6F, 0x00);

/// A response APDU: optional data followed by a two-byte status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw: (u8, u8),
}

impl ResponseApdu {
    pub fn new(data: Vec<u8>, sw: (u8, u8)) -> Self {
        ResponseApdu { data, sw }
    }

    pub fn status_only(sw: (u8, u8)) -> Self {
        ResponseApdu {
            data: Vec::new(),
            sw,
        }
    }

    /// Serialize as `data || SW1 || SW2`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.push(self.sw.0);
        out.push(self.sw.1);
        out
    }
}
