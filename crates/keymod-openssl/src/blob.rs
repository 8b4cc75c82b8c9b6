//! Wire format of the OpenSSL module's parameter blob.
//!
//! Two length-prefixed, NUL-terminated strings: the key-file path, then the
//! passphrase protecting it. Each prefix is a 16-bit length (string bytes plus
//! the terminator) written low byte first.
//!
//! ```text
//! [path_len lo][path_len hi][path ... 0x00][pass_len lo][pass_len hi][pass ... 0x00]
//! ```

use keymod_core::{KeymodError, KeymodResult, ParamValue};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Parameter name carrying the key-file path.
pub const PATH_PARAM: &str = "path";
/// Parameter name carrying the key-file passphrase.
pub const PASSPHRASE_PARAM: &str = "passphrase";

const LEN_PREFIX: usize = 2;

/// Resolved parameters of the OpenSSL module; wiped when dropped.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OpensslParams {
    pub path: String,
    pub passphrase: String,
}

impl fmt::Debug for OpensslParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpensslParams")
            .field("path", &self.path)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl OpensslParams {
    pub fn new(path: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Collect `path` and `passphrase` from host-supplied parameter values.
    pub fn from_param_values(values: &[ParamValue]) -> KeymodResult<Self> {
        let mut params = Self::default();
        for value in values {
            match value.name.as_str() {
                PATH_PARAM => params.path = value.value.to_string(),
                PASSPHRASE_PARAM => params.passphrase = value.value.to_string(),
                other => {
                    return Err(KeymodError::Configuration(format!(
                        "unknown openssl parameter [{other}]"
                    )))
                }
            }
        }
        Ok(params)
    }

    /// Borrowed view used by the key operations.
    pub fn view(&self) -> BlobView<'_> {
        BlobView {
            path: &self.path,
            passphrase: &self.passphrase,
        }
    }

    /// Exact number of bytes [`serialize`](Self::serialize) produces.
    pub fn serialized_len(&self) -> KeymodResult<usize> {
        self.serialize_into(None)
    }

    pub fn serialize(&self) -> KeymodResult<Zeroizing<Vec<u8>>> {
        let mut blob = Zeroizing::new(Vec::new());
        self.serialize_into(Some(&mut blob))?;
        Ok(blob)
    }

    /// Append the encoding to `dest`, or only compute its size when `dest` is `None`.
    ///
    /// Both fields are validated before anything is written, so a failed call
    /// leaves `dest` untouched.
    pub fn serialize_into(&self, dest: Option<&mut Vec<u8>>) -> KeymodResult<usize> {
        let path_len = field_len("path", &self.path)?;
        let pass_len = field_len("passphrase", &self.passphrase)?;
        let total = LEN_PREFIX + usize::from(path_len) + LEN_PREFIX + usize::from(pass_len);

        if let Some(out) = dest {
            out.reserve(total);
            put_field(out, path_len, &self.path);
            put_field(out, pass_len, &self.passphrase);
        }
        Ok(total)
    }
}

fn field_len(what: &str, value: &str) -> KeymodResult<u16> {
    if value.is_empty() {
        return Err(KeymodError::Configuration(format!(
            "openssl key module requires a non-empty {what}"
        )));
    }
    if value.as_bytes().contains(&0) {
        return Err(KeymodError::Configuration(format!(
            "openssl key module {what} must not contain NUL bytes"
        )));
    }
    u16::try_from(value.len() + 1).map_err(|_| {
        KeymodError::Configuration(format!(
            "openssl key module {what} is too long ({} bytes)",
            value.len()
        ))
    })
}

fn put_field(out: &mut Vec<u8>, len: u16, value: &str) {
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

/// Zero-copy decoding of a blob.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlobView<'a> {
    pub path: &'a str,
    pub passphrase: &'a str,
}

impl fmt::Debug for BlobView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobView")
            .field("path", &self.path)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl<'a> BlobView<'a> {
    /// Decode `blob`, rejecting truncated fields, missing terminators, and trailing bytes.
    pub fn deserialize(blob: &'a [u8]) -> KeymodResult<Self> {
        let mut reader = Reader { buf: blob, pos: 0 };
        let path = reader.field("path")?;
        let passphrase = reader.field("passphrase")?;
        if reader.pos != blob.len() {
            return Err(KeymodError::MalformedBlob(format!(
                "{} trailing byte(s) after passphrase",
                blob.len() - reader.pos
            )));
        }
        Ok(Self { path, passphrase })
    }

    pub fn to_params(&self) -> OpensslParams {
        OpensslParams::new(self.path, self.passphrase)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn field(&mut self, what: &str) -> KeymodResult<&'a str> {
        let remaining = &self.buf[self.pos..];
        let (prefix, rest) = match remaining {
            [lo, hi, rest @ ..] => (u16::from_le_bytes([*lo, *hi]), rest),
            _ => {
                return Err(KeymodError::MalformedBlob(format!(
                    "truncated {what} length prefix"
                )))
            }
        };
        let len = usize::from(prefix);
        if len == 0 {
            return Err(KeymodError::MalformedBlob(format!("{what} length is zero")));
        }
        if len > rest.len() {
            return Err(KeymodError::MalformedBlob(format!(
                "{what} length {len} exceeds the {} remaining byte(s)",
                rest.len()
            )));
        }

        let (body, terminator) = rest[..len].split_at(len - 1);
        if terminator != [0] {
            return Err(KeymodError::MalformedBlob(format!(
                "{what} is not NUL-terminated"
            )));
        }
        if body.contains(&0) {
            return Err(KeymodError::MalformedBlob(format!(
                "{what} contains an embedded NUL"
            )));
        }
        let text = std::str::from_utf8(body)
            .map_err(|err| KeymodError::MalformedBlob(format!("{what} is not UTF-8: {err}")))?;

        self.pos += LEN_PREFIX + len;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_layout() {
        let params = OpensslParams::new("/k.pem", "pw");
        let blob = params.serialize().unwrap();
        assert_eq!(blob.as_slice(), b"\x07\x00/k.pem\x00\x03\x00pw\x00".as_slice());
        assert_eq!(params.serialized_len().unwrap(), 14);
    }

    #[test]
    fn size_query_matches_serialized_length() {
        let params = OpensslParams::new("/home/alice/.ecryptfs/pki/openssl/key.pem", "pässwörd");
        let blob = params.serialize().unwrap();
        assert_eq!(params.serialized_len().unwrap(), blob.len());
        assert_eq!(blob.len(), params.path.len() + params.passphrase.len() + 6);
    }

    #[test]
    fn decode_restores_fields() {
        let params = OpensslParams::new("/tmp/key.pem", "correct horse");
        let blob = params.serialize().unwrap();
        let view = BlobView::deserialize(&blob).unwrap();
        assert_eq!(view.path, "/tmp/key.pem");
        assert_eq!(view.passphrase, "correct horse");
        assert_eq!(view.to_params(), params);
    }

    #[test]
    fn long_fields_use_the_high_length_byte() {
        let path = format!("/{}", "d".repeat(299));
        let blob = OpensslParams::new(path.clone(), "pw").serialize().unwrap();
        assert_eq!(&blob[..2], &[0x2d, 0x01]);
        assert_eq!(BlobView::deserialize(&blob).unwrap().path, path);
    }

    #[test]
    fn empty_fields_are_rejected() {
        for params in [OpensslParams::new("", "pw"), OpensslParams::new("/k.pem", "")] {
            assert!(matches!(
                params.serialized_len(),
                Err(KeymodError::Configuration(_))
            ));
        }
    }

    #[test]
    fn oversized_field_is_rejected() {
        let params = OpensslParams::new("/k.pem", "x".repeat(u16::MAX as usize));
        assert!(matches!(
            params.serialize(),
            Err(KeymodError::Configuration(_))
        ));
    }

    #[test]
    fn malformed_blobs_are_rejected() {
        let good = OpensslParams::new("/k.pem", "pw").serialize().unwrap();

        let cases: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0x07],
            good[..good.len() - 1].to_vec(),
            [good.as_slice(), &[0xff][..]].concat(),
            b"\x00\x00\x03\x00pw\x00".to_vec(),
            b"\x02\x00ab\x03\x00pw\x00".to_vec(),
            b"\x03\x00a\x00\x00\x03\x00pw\x00".to_vec(),
            b"\x03\x00\xff\xfe\x00\x03\x00pw\x00".to_vec(),
        ];
        for blob in cases {
            assert!(
                matches!(BlobView::deserialize(&blob), Err(KeymodError::MalformedBlob(_))),
                "accepted {blob:?}"
            );
        }
    }

    #[test]
    fn param_values_map_onto_fields() {
        let values = vec![
            ParamValue::new(PATH_PARAM, "/k.pem"),
            ParamValue::new(PASSPHRASE_PARAM, "pw"),
        ];
        let params = OpensslParams::from_param_values(&values).unwrap();
        assert_eq!(params, OpensslParams::new("/k.pem", "pw"));

        let unknown = vec![ParamValue::new("keyformat", "pem")];
        assert!(OpensslParams::from_param_values(&unknown).is_err());
    }

    #[test]
    fn debug_output_hides_passphrase() {
        let params = OpensslParams::new("/k.pem", "hunter2");
        assert!(!format!("{params:?}").contains("hunter2"));
        assert!(!format!("{:?}", params.view()).contains("hunter2"));
    }
}
