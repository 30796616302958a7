//! NTLM challenge/response authentication.
//!
//! Three messages: the negotiate block appended to the LOGIN7 record, the
//! challenge the server answers with (parsed by the token reader), and the
//! Type-3 response built here. The LM and NT answers both run triple-DES
//! over the 8-byte server nonce with keys derived from the password; the
//! LM key derivation matches the behavior this protocol family actually
//! ships, not the textbook LM hash.

use bytes::{BufMut, BytesMut};
use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use md4::{Digest, Md4};

/// Negotiate flags sent in the Type-1 message.
const NEGOTIATE_FLAGS: u32 = 0xB201;

/// Flags sent in the Type-3 response.
const RESPONSE_FLAGS: u32 = 0x8201;

const HEADER: &[u8; 8] = b"NTLMSSP\0";

/// The Type-1 negotiate block appended to a LOGIN7 record when NTLM
/// authentication is requested.
#[must_use]
pub fn negotiate_block(domain: &str) -> Vec<u8> {
    let domain_bytes = domain.as_bytes();
    let mut out = BytesMut::with_capacity(32 + domain_bytes.len());

    out.put_slice(HEADER);
    out.put_u32_le(1); // sequence
    out.put_u32_le(NEGOTIATE_FLAGS);

    // Domain security buffer; the block starts at offset 0, so the
    // variable data begins right after the 32 fixed bytes.
    out.put_u16_le(domain_bytes.len() as u16);
    out.put_u16_le(domain_bytes.len() as u16);
    out.put_u32_le(32);

    // Host security buffer, empty.
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u32_le(32);

    out.put_slice(domain_bytes);
    out.to_vec()
}

/// The Type-3 message answering `nonce`, sent in its own packet.
#[must_use]
pub fn challenge_response(
    user: &str,
    password: &str,
    domain: &str,
    nonce: &[u8; 8],
) -> Vec<u8> {
    let domain_len = domain.encode_utf16().count() * 2;
    let user_len = user.encode_utf16().count() * 2;
    let host_len = 0usize;

    let mut out = BytesMut::with_capacity(64 + domain_len + user_len + 48);
    out.put_slice(HEADER);
    out.put_u32_le(3); // sequence

    let mut pos = 64 + domain_len + user_len + host_len;
    // LM response security buffer.
    out.put_u16_le(24);
    out.put_u16_le(24);
    out.put_u32_le(pos as u32);
    pos += 24;
    // NT response security buffer.
    out.put_u16_le(24);
    out.put_u16_le(24);
    out.put_u32_le(pos as u32);

    let mut pos = 64;
    out.put_u16_le(domain_len as u16);
    out.put_u16_le(domain_len as u16);
    out.put_u32_le(pos as u32);
    pos += domain_len;

    out.put_u16_le(user_len as u16);
    out.put_u16_le(user_len as u16);
    out.put_u32_le(pos as u32);
    pos += user_len;

    // Host buffer (not sent) and session key buffer (absent).
    out.put_u16_le(host_len as u16);
    out.put_u16_le(host_len as u16);
    out.put_u32_le(pos as u32);
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u32_le((pos + host_len) as u32);

    out.put_u32_le(RESPONSE_FLAGS);

    for unit in domain.encode_utf16() {
        out.put_u16_le(unit);
    }
    for unit in user.encode_utf16() {
        out.put_u16_le(unit);
    }

    out.put_slice(&lm_response(password, nonce));
    out.put_slice(&nt_response(password, nonce));
    out.to_vec()
}

/// NT answer: MD4 of the UTF-16LE password, zero-padded to 21 bytes, run
/// over the nonce in three DES blocks.
#[must_use]
pub fn nt_response(password: &str, nonce: &[u8; 8]) -> [u8; 24] {
    let mut pwd = Vec::with_capacity(password.len() * 2);
    for unit in password.encode_utf16() {
        pwd.extend_from_slice(&unit.to_le_bytes());
    }

    let mut key = [0u8; 21];
    let digest = Md4::digest(&pwd);
    key[..16].copy_from_slice(&digest);

    encrypt_nonce(&key, nonce)
}

/// LM answer: the uppercased password (14 bytes, zero-padded) supplies two
/// DES keys that each encrypt the nonce into a 21-byte key, which then
/// encrypts the nonce again.
#[must_use]
pub fn lm_response(password: &str, nonce: &[u8; 8]) -> [u8; 24] {
    let upper = password.to_uppercase();
    let mut pwd = [0u8; 14];
    let raw = upper.as_bytes();
    let used = raw.len().min(14);
    pwd[..used].copy_from_slice(&raw[..used]);

    let mut key = [0u8; 21];
    key[..8].copy_from_slice(&des_block(&pwd[..7], nonce));
    key[8..16].copy_from_slice(&des_block(&pwd[7..14], nonce));

    encrypt_nonce(&key, nonce)
}

/// Run the nonce through DES three times with keys cut from a 21-byte key.
fn encrypt_nonce(key: &[u8; 21], nonce: &[u8; 8]) -> [u8; 24] {
    let mut out = [0u8; 24];
    out[..8].copy_from_slice(&des_block(&key[..7], nonce));
    out[8..16].copy_from_slice(&des_block(&key[7..14], nonce));
    out[16..].copy_from_slice(&des_block(&key[14..21], nonce));
    out
}

fn des_block(key7: &[u8], block: &[u8; 8]) -> [u8; 8] {
    let key = make_des_key(key7);
    let cipher = Des::new(GenericArray::from_slice(&key));
    let mut data = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut data);
    data.into()
}

/// Spread 7 key bytes across 8, leaving the low (parity) bit of each byte
/// clear.
fn make_des_key(key7: &[u8]) -> [u8; 8] {
    let b = key7;
    let mut key = [
        b[0] >> 1,
        ((b[0] & 0x01) << 6) | (b[1] >> 2),
        ((b[1] & 0x03) << 5) | (b[2] >> 3),
        ((b[2] & 0x07) << 4) | (b[3] >> 4),
        ((b[3] & 0x0F) << 3) | (b[4] >> 5),
        ((b[4] & 0x1F) << 2) | (b[5] >> 6),
        ((b[5] & 0x3F) << 1) | (b[6] >> 7),
        b[6] & 0x7F,
    ];
    for byte in &mut key {
        *byte <<= 1;
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: [u8; 8] = [0xD9, 0x90, 0xED, 0xAF, 0x94, 0x17, 0x36, 0xAF];

    #[test]
    fn nt_answer_known_vector() {
        let expected: [u8; 24] = [
            0x8E, 0x75, 0x8E, 0x79, 0xE2, 0xA1, 0x45, 0x75, 0xB4, 0x21, 0x55, 0x9B, 0x12, 0x29,
            0xD3, 0x5A, 0x23, 0x8B, 0x7D, 0xA8, 0x3A, 0x50, 0xC6, 0xA7,
        ];
        assert_eq!(nt_response("bark", &NONCE), expected);
    }

    #[test]
    fn lm_answer_known_vector() {
        let expected: [u8; 24] = [
            0xE6, 0x19, 0x92, 0xCD, 0x84, 0xF7, 0xB8, 0x49, 0xAF, 0x75, 0xF9, 0x37, 0xD4, 0x0B,
            0xE6, 0x81, 0xC4, 0x0C, 0x7C, 0x3F, 0x3E, 0xC6, 0x8B, 0x7F,
        ];
        assert_eq!(lm_response("bark", &NONCE), expected);
    }

    #[test]
    fn negotiate_block_layout() {
        let block = negotiate_block("DOMAIN");
        assert_eq!(&block[..8], b"NTLMSSP\0");
        assert_eq!(&block[8..12], &1u32.to_le_bytes());
        assert_eq!(&block[12..16], &0xB201u32.to_le_bytes());
        // Domain buffer: length twice, offset 32, data at the end.
        assert_eq!(&block[16..18], &6u16.to_le_bytes());
        assert_eq!(&block[20..24], &32u32.to_le_bytes());
        assert_eq!(&block[32..], b"DOMAIN");
    }

    #[test]
    fn type3_security_buffer_offsets() {
        let msg = challenge_response("user", "bark", "DOM", &NONCE);
        assert_eq!(&msg[..8], b"NTLMSSP\0");
        assert_eq!(&msg[8..12], &3u32.to_le_bytes());

        // Variable data: domain (6 bytes wide) + user (8 bytes wide), then
        // the two 24-byte answers.
        let lm_offset = 64 + 6 + 8;
        assert_eq!(&msg[12..14], &24u16.to_le_bytes());
        assert_eq!(&msg[16..20], &(lm_offset as u32).to_le_bytes());
        assert_eq!(msg.len(), lm_offset + 48);
        assert_eq!(&msg[lm_offset..lm_offset + 24], &lm_response("bark", &NONCE));
        assert_eq!(&msg[lm_offset + 24..], &nt_response("bark", &NONCE));
    }
}
