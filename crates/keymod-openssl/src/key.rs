//! RSA key operations backing the OpenSSL module.
//!
//! Keys live in passphrase-protected PEM files and are loaded fresh for every
//! operation; nothing here caches key material.

use crate::blob::BlobView;
use crate::signature::fingerprint;
use keymod_core::{KeymodError, KeymodResult, KeySignature};
use log::{debug, error};
use openssl::bn::BigNum;
use openssl::pkey::Private;
use openssl::rsa::{Padding, Rsa, RsaRef};
use openssl::symm::Cipher;
use std::fs::{self, DirBuilder};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

/// Bytes of OAEP (SHA-1) overhead; payloads must be at most modulus bytes minus this.
pub const OAEP_OVERHEAD: usize = 42;

const KEY_DIR_MODE: u32 = 0o700;
const KEY_FILE_MODE: u32 = 0o600;

pub fn generate_key(bits: u32, public_exponent: u32) -> KeymodResult<Rsa<Private>> {
    let e = BigNum::from_u32(public_exponent)
        .map_err(|err| KeymodError::KeyGeneration(err.to_string()))?;
    Rsa::generate_with_e(bits, &e).map_err(|err| {
        error!("failed to generate {bits}-bit RSA key: {err}");
        KeymodError::KeyGeneration(err.to_string())
    })
}

/// Write `key` as an AES-256-CBC encrypted PEM file at `path`.
///
/// Missing ancestor directories are created with mode 0700. The file itself is
/// replaced atomically, keeps the ownership of any file it replaces, and ends up
/// with mode 0600.
pub fn write_key_to_file(key: &RsaRef<Private>, path: &Path, passphrase: &str) -> KeymodResult<()> {
    let pem = Zeroizing::new(
        key.private_key_to_pem_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
            .map_err(|err| {
                KeymodError::Encryption(format!("unable to encode private key: {err}"))
            })?,
    );

    let dest = resolve_write_path(path)?;
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_key_dir(parent)?;

    let ownership = fs::metadata(&dest)
        .ok()
        .map(|meta| (meta.uid(), meta.gid()));

    let mut temp = NamedTempFile::new_in(parent).map_err(|err| KeymodError::key_file(parent, err))?;
    temp.as_file_mut().write_all(&pem)?;
    temp.as_file_mut().flush()?;
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(KEY_FILE_MODE))?;

    if let Some((uid, gid)) = ownership {
        let rc = unsafe { libc::fchown(temp.as_file().as_raw_fd(), uid, gid) };
        if rc != 0 {
            return Err(KeymodError::key_file(&dest, std::io::Error::last_os_error()));
        }
    }

    let _ = temp.as_file().sync_all();
    temp.persist(&dest).map_err(|err| {
        error!("unable to write key file {}: {}", dest.display(), err.error);
        KeymodError::key_file(&dest, err.error)
    })?;
    let _ = fs::File::open(parent).and_then(|dir| dir.sync_all());
    debug!("wrote private key to {}", dest.display());
    Ok(())
}

/// Create `dir` and any missing ancestors with mode 0700.
pub fn ensure_key_dir(dir: &Path) -> KeymodResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(KEY_DIR_MODE)
        .create(dir)
        .map_err(|err| {
            error!("unable to create key directory {}: {err}", dir.display());
            KeymodError::key_file(dir, err)
        })
}

fn resolve_write_path(path: &Path) -> KeymodResult<PathBuf> {
    let mut candidate = path.to_path_buf();
    for _ in 0..16 {
        let meta = match fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(candidate),
            Err(err) => return Err(KeymodError::key_file(&candidate, err)),
        };
        if !meta.file_type().is_symlink() {
            return Ok(candidate);
        }

        let target =
            fs::read_link(&candidate).map_err(|err| KeymodError::key_file(&candidate, err))?;
        candidate = if target.is_absolute() {
            target
        } else {
            candidate
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .join(target)
        };
    }

    Err(KeymodError::Configuration(format!(
        "too many symbolic links while resolving {}",
        path.display()
    )))
}

/// Load and decrypt the private key named by `params`.
pub fn read_key(params: &BlobView<'_>) -> KeymodResult<Rsa<Private>> {
    let pem = Zeroizing::new(fs::read(params.path).map_err(|err| {
        error!("unable to read key file {}: {err}", params.path);
        KeymodError::key_file(params.path, err)
    })?);
    Rsa::private_key_from_pem_passphrase(&pem, params.passphrase.as_bytes()).map_err(|err| {
        error!("unable to decrypt private key in {}", params.path);
        KeymodError::Decryption(format!("unable to read private key from {}: {err}", params.path))
    })
}

/// Ciphertext length [`wrap_key`] produces: the modulus size in bytes.
pub fn wrapped_len(params: &BlobView<'_>) -> KeymodResult<usize> {
    Ok(read_key(params)?.size() as usize)
}

/// OAEP-encrypt `payload` under the public half of the key.
pub fn wrap_key(payload: &[u8], params: &BlobView<'_>) -> KeymodResult<Vec<u8>> {
    let key = read_key(params)?;
    let size = key.size() as usize;
    let limit = size.saturating_sub(OAEP_OVERHEAD);
    if payload.len() > limit {
        return Err(KeymodError::Encryption(format!(
            "payload of {} bytes exceeds the {limit}-byte OAEP limit of {}",
            payload.len(),
            params.path
        )));
    }

    let mut out = vec![0u8; size];
    let written = key
        .public_encrypt(payload, &mut out, Padding::PKCS1_OAEP)
        .map_err(|err| {
            error!("OAEP encryption with {} failed: {err}", params.path);
            KeymodError::Encryption(err.to_string())
        })?;
    out.truncate(written);
    Ok(out)
}

/// Reverse [`wrap_key`].
pub fn unwrap_key(ciphertext: &[u8], params: &BlobView<'_>) -> KeymodResult<Zeroizing<Vec<u8>>> {
    let key = read_key(params)?;
    let size = key.size() as usize;
    if ciphertext.len() != size {
        return Err(KeymodError::Decryption(format!(
            "ciphertext is {} bytes, key {} expects {size}",
            ciphertext.len(),
            params.path
        )));
    }

    let mut out = Zeroizing::new(vec![0u8; size]);
    let written = key
        .private_decrypt(ciphertext, &mut out, Padding::PKCS1_OAEP)
        .map_err(|err| {
            error!("OAEP decryption with {} failed", params.path);
            KeymodError::Decryption(err.to_string())
        })?;
    out.truncate(written);
    Ok(out)
}

/// Fingerprint of the key named by `params`.
pub fn compute_signature(params: &BlobView<'_>) -> KeymodResult<KeySignature> {
    let key = read_key(params)?;
    fingerprint(&key)
}
