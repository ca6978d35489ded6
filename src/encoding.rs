use crate::error::{Error, Result};
use std::fmt;

/// Text encoding used to decode a command's output and encode text sent to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
}

impl Encoding {
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_owned()),
                Err(err) => Err(Error::Decode {
                    encoding: self,
                    position: err.valid_up_to(),
                }),
            },
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|character| {
                    u8::try_from(u32::from(character)).map_err(|_| Error::Encode {
                        encoding: self,
                        character,
                    })
                })
                .collect(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => f.write_str("utf-8"),
            Encoding::Latin1 => f.write_str("latin-1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_maps_bytes_to_code_points() {
        assert_eq!(Encoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xe9]).unwrap(), "café");
        assert_eq!(Encoding::Latin1.encode("café").unwrap(), vec![0x63, 0x61, 0x66, 0xe9]);
    }

    #[test]
    fn latin1_rejects_wide_characters() {
        let err = Encoding::Latin1.encode("καλημέρα").unwrap_err();
        assert!(matches!(err, Error::Encode { character: 'κ', .. }));
    }

    #[test]
    fn invalid_utf8_reports_position() {
        let err = Encoding::Utf8.decode(b"ok\xff").unwrap_err();
        assert!(matches!(err, Error::Decode { position: 2, .. }));
    }
}
