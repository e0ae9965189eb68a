//! SDM message builder: PICCData assembly, session-key derivation, CTR
//! encryption, truncated MAC, LNURL assembly and NDEF encoding.
//!
//! This is the tag side of the protocol: instead of decrypting an incoming
//! `picc_data`/`cmac` pair, this module *produces* one, to be embedded in
//! an NDEF URI record a reader discovers on every tap.

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aes128::{self, CryptoError};
use crate::bytes;
use crate::cmac;
use crate::kdf::{self, LABEL_SDM_ENC, LABEL_SDM_MAC};
use crate::models::{Counter, Uid};

/// Errors raised building an SDM message or its NDEF envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdmError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Edge case: the assembled NDEF message would need the extended
    /// (3-byte) TLV length form, which this core refuses to emit. This is a
    /// configuration error: it must be caught before emulation is enabled,
    /// never surfaced to a reader.
    #[error("NDEF message is {len} bytes, exceeding the 254-byte short-form limit")]
    NdefTooLarge { len: usize },
}

/// All-zero Session Vector used by this unauthenticated-read core.
const ZERO_SV: [u8; 16] = [0u8; 16];

/// A 128-bit session key, zeroized when dropped. Ephemeral per-read session
/// keys must be zeroed after use where the language allows.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKey([u8; 16]);

impl SessionKey {
    fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// The plaintext PICCData tuple: UID (7 bytes) ‖ Counter (3 bytes, BE).
pub fn picc_data(uid: &Uid, counter: Counter) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[..7].copy_from_slice(uid.as_bytes());
    out[7..].copy_from_slice(&counter.to_be_bytes());
    out
}

/// The two ciphertext/MAC fields a reader receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdmResponse {
    pub enc_picc_data: [u8; 10],
    pub sdm_mac: [u8; 8],
}

/// Build the encrypted PICCData and truncated MAC for one tap.
///
/// `k1` (`SDMMetaReadKey`) and `k2` (`SDMFileReadKey`) must each be 16
/// bytes; anything else is a cryptographic precondition violation reported
/// as [`CryptoError::InvalidKeyLength`].
pub fn build_sdm_response(
    uid: &Uid,
    counter: Counter,
    k1: &[u8],
    k2: &[u8],
) -> Result<SdmResponse, SdmError> {
    let plaintext = picc_data(uid, counter);

    let k_ses_enc = SessionKey(kdf::derive(k1, LABEL_SDM_ENC, &ZERO_SV)?);
    let k_ses_mac = SessionKey(kdf::derive(k2, LABEL_SDM_MAC, &ZERO_SV)?);

    let enc_picc_data = aes128::ctr_apply(k_ses_enc.as_bytes(), &ZERO_SV, &plaintext)?;
    let sdm_mac = cmac::cmac_truncated(k_ses_mac.as_bytes(), &plaintext, 8)?;

    Ok(SdmResponse {
        enc_picc_data: enc_picc_data.try_into().expect("10-byte PICCData in, 10-byte keystream out"),
        sdm_mac: sdm_mac.try_into().expect("truncated to 8 bytes above"),
    })
}

/// Decrypt an `EncPICCData`/`SDM_MAC` pair back to plaintext PICCData and
/// verify the MAC, mirroring the server side of this protocol. Exposed
/// mainly so the builder's output can be checked by its own tests without a
/// second, independent implementation drifting out of sync.
pub fn verify_sdm_response(
    response: &SdmResponse,
    k1: &[u8],
    k2: &[u8],
) -> Result<([u8; 10], bool), SdmError> {
    let k_ses_enc = SessionKey(kdf::derive(k1, LABEL_SDM_ENC, &ZERO_SV)?);
    let k_ses_mac = SessionKey(kdf::derive(k2, LABEL_SDM_MAC, &ZERO_SV)?);

    let plaintext = aes128::ctr_apply(k_ses_enc.as_bytes(), &ZERO_SV, &response.enc_picc_data)?;
    let ok = cmac::verify(k_ses_mac.as_bytes(), &plaintext, &response.sdm_mac)?;

    Ok((plaintext.try_into().expect("10-byte input"), ok))
}

/// Assemble the LNURL query string carrying the encrypted PICCData and MAC:
/// `{base}/{cardId}?p={hex(EncPICCData)}&c={hex(SDM_MAC)}`, hex uppercase.
/// A single trailing slash on `base` is stripped.
pub fn build_lnurl(lnurl_base: &str, card_id: &str, response: &SdmResponse) -> String {
    let base = lnurl_base.strip_suffix('/').unwrap_or(lnurl_base);
    format!(
        "{base}/{card_id}?p={}&c={}",
        bytes::hex_encode_upper(&response.enc_picc_data),
        bytes::hex_encode_upper(&response.sdm_mac),
    )
}

/// NFC Forum "well-known URI" TNF/header byte for a short (`SR=1`) record
/// that is both the first and only record in the message.
const NDEF_URI_RECORD_HEADER: u8 = 0xD1;
/// NDEF record type for the URI record type ("U").
const NDEF_TYPE_URI: u8 = 0x55;
/// URI identifier code for the `https://` abbreviation (NFC Forum URI RTD).
const URI_IDENTIFIER_HTTPS: u8 = 0x04;
/// URI identifier code meaning "no abbreviation, full URI follows".
const URI_IDENTIFIER_NONE: u8 = 0x00;
/// NDEF-Message TLV tag.
const TLV_NDEF_MESSAGE: u8 = 0x03;
/// NDEF terminator TLV tag.
const TLV_TERMINATOR: u8 = 0xFE;

/// Encode `url` as a short-form NDEF message wrapping a single well-known
/// URI record, and wrap that in the TLV framing an NFC Forum Type 4 Tag
/// NDEF file uses. Refuses to emit the extended (3-byte) TLV length form,
/// see [`SdmError::NdefTooLarge`].
pub fn build_ndef_message(url: &str) -> Result<Vec<u8>, SdmError> {
    let (identifier, rest) = match url.strip_prefix("https://") {
        Some(rest) => (URI_IDENTIFIER_HTTPS, rest),
        None => (URI_IDENTIFIER_NONE, url),
    };

    let mut payload = Vec::with_capacity(1 + rest.len());
    payload.push(identifier);
    payload.extend_from_slice(rest.as_bytes());

    let payload_len: u8 = payload
        .len()
        .try_into()
        .map_err(|_| SdmError::NdefTooLarge { len: payload.len() })?;

    let mut record = Vec::with_capacity(4 + payload.len());
    record.push(NDEF_URI_RECORD_HEADER);
    record.push(1); // type length
    record.push(payload_len);
    record.push(NDEF_TYPE_URI);
    record.extend_from_slice(&payload);

    // 0xFF is the reserved escape marking the NDEF-message TLV's extended
    // 3-byte length form, so the one-byte length field must stay below it.
    if record.len() > 254 {
        return Err(SdmError::NdefTooLarge { len: record.len() });
    }
    let record_len = record.len() as u8;

    let mut message = Vec::with_capacity(3 + record.len());
    message.push(TLV_NDEF_MESSAGE);
    message.push(record_len);
    message.extend_from_slice(&record);
    message.push(TLV_TERMINATOR);

    Ok(message)
}

/// Build the complete NDEF file content for one tap: derive the SDM
/// response, assemble the LNURL, and wrap it as a short-form NDEF message.
pub fn build_sdm_ndef(
    uid: &Uid,
    counter: Counter,
    k1: &[u8],
    k2: &[u8],
    lnurl_base: &str,
    card_id: &str,
) -> Result<Vec<u8>, SdmError> {
    let response = build_sdm_response(uid, counter, k1, k2)?;
    let url = build_lnurl(lnurl_base, card_id, &response);
    build_ndef_message(&url)
}
