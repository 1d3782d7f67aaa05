//! Byte-to-text decoding for received data
//!
//! Plaintext connections decode every byte as one ASCII character and
//! replace anything above 0x7F with `?`. TLS connections use a stateful
//! UTF-8 decoder that carries incomplete sequences over to the next
//! read. Protocol simulators built on this transport depend on the
//! difference, so non-ASCII text sent over plaintext arrives mangled.

/// Decoder selected by the current connection mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextDecoder {
    /// One byte, one character. Non-ASCII bytes become `?`.
    Ascii,
    /// UTF-8 with bytes of an unfinished sequence held back.
    Utf8 { pending: Vec<u8> },
}

impl TextDecoder {
    #[must_use]
    pub const fn ascii() -> Self {
        Self::Ascii
    }

    #[must_use]
    pub const fn utf8() -> Self {
        Self::Utf8 {
            pending: Vec::new(),
        }
    }

    /// Decode one chunk of received bytes.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        match self {
            Self::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
                .collect(),
            Self::Utf8 { pending } => decode_utf8(pending, bytes),
        }
    }
}

fn decode_utf8(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);

    let mut out = String::with_capacity(pending.len());
    let mut consumed = 0;
    loop {
        let rest = &pending[consumed..];
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                consumed = pending.len();
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        consumed += valid + bad;
                    }
                    // Truncated sequence at the end: wait for more bytes.
                    None => {
                        consumed += valid;
                        break;
                    }
                }
            }
        }
    }

    pending.drain(..consumed);
    out
}
