//! Transition functions attached to the OpenSSL module's graph edges.
//!
//! Each function receives the per-walk [`SubgraphCtx`], moves its node's value
//! out of the [`NodeInput`], and either lets the walk continue or finishes the
//! subgraph after registering (or generating) a key.

use crate::blob::OpensslParams;
use crate::key::{generate_key, write_key_to_file};
use crate::signature::fingerprint;
use keymod_core::options::parse_options;
use keymod_core::{Flow, KeyModuleHandle, KeymodError, KeymodResult, NodeInput, TraversalEnv};
use log::{error, info};
use std::env::VarError;
use std::fs::File;
use std::os::fd::{FromRawFd, RawFd};
use std::path::Path;
use zeroize::Zeroizing;

/// Option read from a passphrase file or descriptor.
pub const PASSWD_OPTION: &str = "passwd";

/// RSA parameters used by the key-generation subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyGenSettings {
    pub bits: u32,
    pub public_exponent: u32,
}

/// State carried through one walk of an OpenSSL subgraph.
pub struct SubgraphCtx {
    key_mod: KeyModuleHandle,
    params: OpensslParams,
    keygen: KeyGenSettings,
}

/// Build the context for `alias`; the module must already be registered with the host.
pub fn enter(
    env: &mut TraversalEnv<'_>,
    alias: &str,
    keygen: KeyGenSettings,
) -> KeymodResult<SubgraphCtx> {
    let key_mod = env.registry.find(alias).map_err(|err| {
        error!("unable to enter subgraph: {err}");
        err
    })?;
    Ok(SubgraphCtx {
        key_mod,
        params: OpensslParams::default(),
        keygen,
    })
}

fn take_value(input: &mut NodeInput) -> KeymodResult<String> {
    let mut value = input.take_required()?;
    Ok(std::mem::take(&mut *value))
}

pub fn tf_keyfile(
    ctx: &mut SubgraphCtx,
    input: &mut NodeInput,
    _env: &mut TraversalEnv<'_>,
) -> KeymodResult<Flow> {
    ctx.params.path = take_value(input)?;
    Ok(Flow::Continue)
}

pub fn tf_passwd(
    ctx: &mut SubgraphCtx,
    input: &mut NodeInput,
    env: &mut TraversalEnv<'_>,
) -> KeymodResult<Flow> {
    ctx.params.passphrase = take_value(input)?;
    process_key(ctx, env)?;
    Ok(Flow::Complete)
}

/// The node value names an environment variable holding the passphrase.
pub fn tf_passenv(
    ctx: &mut SubgraphCtx,
    input: &mut NodeInput,
    env: &mut TraversalEnv<'_>,
) -> KeymodResult<Flow> {
    let var = input.take_required()?;
    let passphrase = match std::env::var(var.as_str()) {
        Ok(value) if !value.is_empty() => Zeroizing::new(value),
        Ok(_) | Err(VarError::NotPresent) => {
            return Err(KeymodError::Configuration(format!(
                "environment variable [{}] does not hold a passphrase",
                var.as_str()
            )));
        }
        Err(VarError::NotUnicode(_)) => {
            return Err(KeymodError::Configuration(format!(
                "environment variable [{}] is not valid UTF-8",
                var.as_str()
            )));
        }
    };
    ctx.params.passphrase = passphrase.to_string();
    process_key(ctx, env)?;
    Ok(Flow::Complete)
}

/// Read `passwd` from a passphrase file (`passfile`, `passwd_file`) or from an
/// already-open descriptor (`passfd`, `passwd_fd`) whose ownership is taken.
pub fn tf_passfile(
    ctx: &mut SubgraphCtx,
    input: &mut NodeInput,
    env: &mut TraversalEnv<'_>,
) -> KeymodResult<Flow> {
    let name = input.name();
    let value = input.take_required()?;
    let file = match name {
        "passfd" | "passwd_fd" => adopt_fd(value.as_str())?,
        _ => File::open(Path::new(value.as_str())).map_err(|err| {
            error!("unable to open passphrase file {}: {err}", value.as_str());
            KeymodError::Configuration(format!(
                "unable to open passphrase file {}: {err}",
                value.as_str()
            ))
        })?,
    };

    let mut pairs = parse_options(file)
        .map_err(|err| KeymodError::Configuration(format!("unable to parse [{name}]: {err}")))?;
    let passwd = pairs.take(PASSWD_OPTION).ok_or_else(|| {
        error!("no [{PASSWD_OPTION}] entry found in [{name}]");
        KeymodError::Configuration(format!("no [{PASSWD_OPTION}] entry found in [{name}]"))
    })?;
    drop(pairs);

    ctx.params.passphrase = passwd.to_string();
    process_key(ctx, env)?;
    Ok(Flow::Complete)
}

fn adopt_fd(value: &str) -> KeymodResult<File> {
    let fd: RawFd = value.trim().parse().map_err(|_| {
        KeymodError::Configuration(format!("[{value}] is not a file descriptor number"))
    })?;
    if fd < 0 {
        return Err(KeymodError::Configuration(format!(
            "file descriptor {fd} is negative"
        )));
    }
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(KeymodError::Configuration(format!(
            "file descriptor {fd} is not open: {}",
            std::io::Error::last_os_error()
        )));
    }
    // The descriptor was handed over by the caller and is closed when the file drops.
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Serialise the collected parameters, register the key, and emit its signature option.
fn process_key(ctx: &mut SubgraphCtx, env: &mut TraversalEnv<'_>) -> KeymodResult<()> {
    let expected = ctx.params.serialized_len()?;
    if expected == 0 {
        return Err(KeymodError::Configuration(
            "openssl key module produced an empty blob".into(),
        ));
    }
    let blob = ctx.params.serialize()?;
    assert_eq!(
        blob.len(),
        expected,
        "blob size changed between size query and serialization"
    );

    let sig = env
        .keyring
        .add_key_module_key(&ctx.key_mod, &blob)
        .map_err(|err| {
            error!(
                "unable to add key for module [{}] to the keyring: {err}",
                ctx.key_mod.alias()
            );
            err
        })?;
    env.mount_options.push(sig.mount_option());
    Ok(())
}

/// Record the passphrase, then generate a key and write it to the recorded path.
pub fn tf_gen_passphrase(
    ctx: &mut SubgraphCtx,
    input: &mut NodeInput,
    _env: &mut TraversalEnv<'_>,
) -> KeymodResult<Flow> {
    ctx.params.passphrase = take_value(input)?;
    if ctx.params.path.is_empty() || ctx.params.passphrase.is_empty() {
        return Err(KeymodError::Configuration(
            "key generation needs both a key file and a passphrase".into(),
        ));
    }

    let key = generate_key(ctx.keygen.bits, ctx.keygen.public_exponent)?;
    write_key_to_file(&key, Path::new(&ctx.params.path), &ctx.params.passphrase)?;
    let sig = fingerprint(&key)?;
    info!(
        "generated {}-bit key [{sig}] at {}",
        ctx.keygen.bits, ctx.params.path
    );
    Ok(Flow::Complete)
}
