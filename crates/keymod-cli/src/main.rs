//! Operator CLI for the eCryptfs OpenSSL key module: key generation, mount-option
//! resolution, and key wrapping.

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand};
use keymod_core::{
    logging, KeyModuleHost, KeymodConfig, KeymodError, KeymodResult, MemoryKeyring,
    NodeSet, ParamFlags, ParamSource, ParamValue, PromptRequest, ScriptedParams,
};
use keymod_openssl::blob::{PASSPHRASE_PARAM, PATH_PARAM};
use keymod_openssl::{OpensslKeyModule, ALIAS};
use log::{info, warn};
use rpassword::prompt_password;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Top-level options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "ecryptfs-keymod",
    version,
    about = "Generate, register, and exercise eCryptfs OpenSSL key-module keys."
)]
struct Cli {
    /// Configuration file; defaults to $KEYMOD_CONFIG or /etc/ecryptfs/keymod.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an RSA key and write it as a passphrase-protected PEM file.
    Genkey {
        /// Pre-supplied answers, e.g. `keyfile=/root/key.pem`; anything missing is prompted for.
        #[arg(short, long, default_value = "")]
        options: String,
    },

    /// Walk the configuration graph and print the resulting mount options.
    Configure {
        /// Pre-supplied answers, e.g. `key=openssl,keyfile=/root/key.pem,passfile=/root/pw`.
        #[arg(short, long, default_value = "")]
        options: String,

        /// Fail instead of prompting for values that were not supplied.
        #[arg(long)]
        non_interactive: bool,
    },

    /// Print the signature of a key file.
    Sig {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Wrap a hex-encoded payload under a key file.
    Wrap {
        #[command(flatten)]
        key: KeyArgs,

        /// Payload to wrap, hex encoded.
        payload: String,
    },

    /// Unwrap a hex-encoded ciphertext produced by `wrap`.
    Unwrap {
        #[command(flatten)]
        key: KeyArgs,

        /// Ciphertext to unwrap, hex encoded.
        ciphertext: String,
    },

    /// List the parameters the module accepts outside the decision graph.
    Params,

    /// Update OpenSSL module settings and save the configuration file.
    Settings {
        /// Parameter node table: `legacy` or `revised`.
        #[arg(long)]
        node_set: Option<String>,

        /// RSA modulus size for generated keys.
        #[arg(long)]
        key_bits: Option<u32>,

        /// Default key file offered by the graphs.
        #[arg(long)]
        key_path: Option<String>,
    },

    /// Validate the configuration file, or print its JSON schema.
    Validate {
        #[arg(long)]
        schema: bool,
    },
}

/// Key file selection shared by the key operations.
#[derive(clap::Args, Debug)]
struct KeyArgs {
    /// PEM key file; defaults to the module's default key location.
    #[arg(short, long)]
    keyfile: Option<String>,

    /// Passphrase for the key file; prompted for when omitted.
    #[arg(long)]
    passphrase: Option<String>,
}

/// Scripted answers backed by terminal prompts.
struct InteractiveParams {
    scripted: ScriptedParams,
    interactive: bool,
}

impl ParamSource for InteractiveParams {
    fn contains(&self, name: &str) -> bool {
        self.scripted.contains(name)
    }

    fn take(&mut self, name: &str) -> Option<Zeroizing<String>> {
        self.scripted.take(name)
    }

    fn prompt(&mut self, request: &PromptRequest<'_>) -> KeymodResult<Option<Zeroizing<String>>> {
        if !self.interactive {
            return Ok(None);
        }
        let hidden = request.flags.contains(ParamFlags::MASK_OUTPUT)
            || request.flags.contains(ParamFlags::STDIN_REQUIRED)
            || request.flags.contains(ParamFlags::VERIFY_VALUE);
        if !hidden {
            return prompt_echo(request);
        }

        let value = Zeroizing::new(prompt_password(format!("{}: ", request.prompt))?);
        if request.flags.contains(ParamFlags::VERIFY_VALUE) {
            let again = Zeroizing::new(prompt_password(format!("{} (again): ", request.prompt))?);
            if *value != *again {
                return Err(KeymodError::Configuration(format!(
                    "values entered for [{}] do not match",
                    request.name
                )));
            }
        }
        Ok(Some(value).filter(|v| !v.is_empty()))
    }
}

fn prompt_echo(request: &PromptRequest<'_>) -> KeymodResult<Option<Zeroizing<String>>> {
    let mut stdout = io::stdout();
    match request.suggested {
        Some(suggested) => write!(stdout, "{} [{suggested}]: ", request.prompt)?,
        None => write!(stdout, "{}: ", request.prompt)?,
    }
    stdout.flush()?;

    let mut line = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim();
    if answer.is_empty() {
        return Ok(request.suggested.map(|s| Zeroizing::new(s.to_string())));
    }
    Ok(Some(Zeroizing::new(answer.to_string())))
}

fn load_config(path: Option<PathBuf>) -> Result<KeymodConfig> {
    let path = path.unwrap_or_else(KeymodConfig::resolve_path);
    KeymodConfig::load_or_default(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn build_host(config: &KeymodConfig) -> Result<(KeyModuleHost, Arc<MemoryKeyring>)> {
    let keyring = Arc::new(MemoryKeyring::new());
    let mut host = KeyModuleHost::new(keyring.clone(), config.versioning());
    host.register(Arc::new(OpensslKeyModule::new(config.clone())))
        .context("failed to initialise the openssl key module")?;
    Ok((host, keyring))
}

fn blob_for(host: &KeyModuleHost, key: KeyArgs) -> Result<Zeroizing<Vec<u8>>> {
    let handle = host.module(ALIAS)?;
    let keyfile = match key.keyfile {
        Some(path) => path,
        None => handle
            .ops()
            .params()?
            .into_iter()
            .find(|param| param.option == PATH_PARAM)
            .and_then(|param| param.suggested_val)
            .context("no default key file is known; pass --keyfile")?,
    };
    let passphrase = match key.passphrase {
        Some(passphrase) => Zeroizing::new(passphrase),
        None => Zeroizing::new(prompt_password(format!("Passphrase for {keyfile}: "))?),
    };
    ensure!(!passphrase.is_empty(), "an empty passphrase cannot unlock {keyfile}");

    let values = [
        ParamValue::new(PATH_PARAM, keyfile),
        ParamValue::new(PASSPHRASE_PARAM, passphrase.as_str()),
    ];
    Ok(handle.ops().blob(&values)?)
}

fn decode_hex(label: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim()).with_context(|| format!("{label} is not valid hex"))
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let mut config = load_config(cli.config)?;

    if let Commands::Settings {
        node_set,
        key_bits,
        key_path,
    } = cli.command
    {
        return update_settings(&mut config, node_set, key_bits, key_path);
    }

    let (mut host, keyring) = build_host(&config)?;
    let outcome = dispatch(&config, &host, &keyring, cli.command);
    if let Err(err) = host.finalize() {
        warn!("failed to finalize key modules: {err}");
    }
    outcome
}

fn validate(config: &KeymodConfig, schema: bool) -> Result<()> {
    if schema {
        let schema = schema_for!(KeymodConfig);
        println!("{}", to_string_pretty(&schema)?);
        return Ok(());
    }
    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            warn!("{issue}");
        }
        bail!("configuration has {} issue(s)", issues.len());
    }
    println!(
        "Configuration valid (versioning={:#x}, node_set={:?}).",
        config.host.versioning, config.openssl.node_set
    );
    Ok(())
}

fn update_settings(
    config: &mut KeymodConfig,
    node_set: Option<String>,
    key_bits: Option<u32>,
    key_path: Option<String>,
) -> Result<()> {
    if let Some(node_set) = node_set {
        config.openssl.node_set = match node_set.to_ascii_lowercase().as_str() {
            "legacy" => NodeSet::Legacy,
            "revised" => NodeSet::Revised,
            other => bail!("unknown node set `{other}` (expected legacy or revised)"),
        };
    }
    if let Some(bits) = key_bits {
        config.openssl.key_bits = bits;
    }
    if let Some(path) = key_path {
        config.openssl.key_path = Some(path).filter(|p| !p.is_empty());
    }

    let issues = config.validate();
    ensure!(issues.is_empty(), "refusing to save: {}", issues.join("; "));
    config
        .save()
        .with_context(|| format!("failed to write {}", config.path.display()))?;
    println!("Configuration saved to {}", config.path.display());
    Ok(())
}

fn dispatch(
    config: &KeymodConfig,
    host: &KeyModuleHost,
    keyring: &MemoryKeyring,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Genkey { options } => {
            let mut source = InteractiveParams {
                scripted: ScriptedParams::parse(&options)?,
                interactive: true,
            };
            host.generate_key(ALIAS, &mut source)
                .context("key generation aborted")?;
            println!("Key generated.");
        }
        Commands::Configure {
            options,
            non_interactive,
        } => {
            let mut source = InteractiveParams {
                scripted: ScriptedParams::parse(&options)?,
                interactive: !non_interactive,
            };
            let mount_options = host
                .configure(&mut source)
                .context("key module configuration aborted")?;
            let unused = source.scripted.remaining();
            if !unused.is_empty() {
                warn!("ignored options: {}", unused.join(", "));
            }
            info!("{} key(s) registered", keyring.len());
            println!("{mount_options}");
        }
        Commands::Sig { key } => {
            let blob = blob_for(host, key)?;
            let sig = host.module(ALIAS)?.ops().key_sig(&blob)?;
            println!("{sig}");
        }
        Commands::Wrap { key, payload } => {
            let payload = Zeroizing::new(decode_hex("payload", &payload)?);
            let blob = blob_for(host, key)?;
            let wrapped = host.module(ALIAS)?.ops().encrypt(&payload, &blob)?;
            println!("{}", hex::encode(wrapped));
        }
        Commands::Unwrap { key, ciphertext } => {
            let ciphertext = decode_hex("ciphertext", &ciphertext)?;
            let blob = blob_for(host, key)?;
            let plaintext = host.module(ALIAS)?.ops().decrypt(&ciphertext, &blob)?;
            println!("{}", hex::encode(plaintext.as_slice()));
        }
        Commands::Params => {
            for param in host.module(ALIAS)?.ops().params()? {
                println!(
                    "{:<12} {}{}",
                    param.option,
                    param.description,
                    param
                        .suggested_val
                        .map(|val| format!(" [{val}]"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Validate { schema } => validate(config, schema)?,
        Commands::Settings { .. } => bail!("settings are saved before key modules load"),
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
