use keymod_core::{
    logging, KeyModule, KeyModuleHost, KeySignature, KeymodConfig, KeymodError, KeymodResult,
    MemoryKeyring, NodeSet, ParamSource, ParamValue, PromptRequest, ScriptedParams, VersionFlags,
};
use keymod_openssl::blob::{PASSPHRASE_PARAM, PATH_PARAM};
use keymod_openssl::key::{compute_signature, generate_key, write_key_to_file};
use keymod_openssl::{DefaultPaths, OpensslKeyModule, OpensslParams, ALIAS};
use std::ffi::OsStr;
use std::fs;
use std::os::fd::IntoRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use zeroize::Zeroizing;

const PASSPHRASE: &str = "secret";

struct Fixture {
    dir: TempDir,
    key_path: PathBuf,
    keyring: Arc<MemoryKeyring>,
    host: KeyModuleHost,
}

impl Fixture {
    fn new(node_set: NodeSet) -> Self {
        Self::with_versioning(node_set, VersionFlags::PASSPHRASE | VersionFlags::PUBKEY)
    }

    fn with_versioning(node_set: NodeSet, versioning: VersionFlags) -> Self {
        logging::init_for_tests();
        let dir = tempdir().expect("tempdir");
        let key_path = DefaultPaths::for_home(dir.path()).key_file;
        let key = generate_key(1024, 65537).expect("generate key");
        write_key_to_file(&key, &key_path, PASSPHRASE).expect("write key");

        let mut config = KeymodConfig::default();
        config.host.home_dir = Some(dir.path().display().to_string());
        config.host.versioning = versioning.bits();
        config.openssl.node_set = node_set;

        let keyring = Arc::new(MemoryKeyring::new());
        let mut host = KeyModuleHost::new(keyring.clone(), config.versioning());
        host.register(Arc::new(OpensslKeyModule::new(config)))
            .expect("register module");

        Self {
            dir,
            key_path,
            keyring,
            host,
        }
    }

    fn key(&self) -> &str {
        self.key_path.to_str().expect("utf-8 path")
    }

    fn write_passfile(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("passfile");
        fs::write(&path, contents).expect("write passfile");
        path
    }

    fn expected_sig(&self) -> KeySignature {
        compute_signature(&OpensslParams::new(self.key(), PASSPHRASE).view()).expect("signature")
    }
}

fn scripted(pairs: &[(&str, &str)]) -> ScriptedParams {
    let mut params = ScriptedParams::new();
    for (name, value) in pairs {
        params.insert(*name, *value);
    }
    params
}

#[test]
fn scripted_traversal_registers_key_and_emits_signature() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let mut source = ScriptedParams::parse(&format!(
        "key=openssl,keyfile={},passwd={PASSPHRASE}",
        fx.key()
    ))?;

    let options = fx.host.configure(&mut source)?;
    assert_eq!(options.len(), 1);
    let sig = KeySignature::parse(options.get("ecryptfs_sig").expect("signature option"))?;
    assert_eq!(sig.as_str().len(), 40);
    assert_eq!(sig, fx.expected_sig());
    assert!(source.is_empty());

    let stored = fx.keyring.get(&sig).expect("key registered");
    assert_eq!(stored.alias, ALIAS);
    let expected_blob = OpensslParams::new(fx.key(), PASSPHRASE).serialize()?;
    assert_eq!(stored.blob.as_slice(), expected_blob.as_slice());
    Ok(())
}

#[test]
fn passphrase_file_supplies_passwd() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let passfile = fx.write_passfile("# for mount\npasswd = \"secret\"\n");
    let mut source = scripted(&[("keyfile", fx.key()), ("passfile", passfile.to_str().unwrap())]);

    let options = fx.host.configure_with(ALIAS, &mut source)?;
    assert_eq!(options.to_string(), format!("ecryptfs_sig={}", fx.expected_sig()));
    Ok(())
}

#[test]
fn passphrase_file_without_passwd_is_rejected() {
    let fx = Fixture::new(NodeSet::Legacy);
    let passfile = fx.write_passfile("passphrase=secret\n");
    let mut source = scripted(&[("keyfile", fx.key()), ("passfile", passfile.to_str().unwrap())]);

    match fx.host.configure_with(ALIAS, &mut source) {
        Err(KeymodError::Configuration(message)) => assert!(message.contains("passwd")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(fx.keyring.is_empty());
}

#[test]
fn missing_passphrase_file_is_a_configuration_error() {
    let fx = Fixture::new(NodeSet::Legacy);
    let missing = fx.dir.path().join("absent");
    let mut source = scripted(&[("keyfile", fx.key()), ("passfile", missing.to_str().unwrap())]);

    assert!(matches!(
        fx.host.configure_with(ALIAS, &mut source),
        Err(KeymodError::Configuration(_))
    ));
}

#[test]
fn passphrase_descriptor_is_adopted() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let passfile = fx.write_passfile("passwd=secret\n");
    let fd = fs::File::open(&passfile)?.into_raw_fd().to_string();
    let mut source = scripted(&[("keyfile", fx.key()), ("passfd", fd.as_str())]);

    let options = fx.host.configure_with(ALIAS, &mut source)?;
    assert_eq!(options.get("ecryptfs_sig"), Some(fx.expected_sig().as_str()));
    Ok(())
}

#[test]
fn passphrase_descriptor_is_closed_when_passwd_is_missing() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let passfile = fx.write_passfile("passphrase=secret\n");
    // Park the descriptor far above the numbers concurrent tests are handed out.
    let low = fs::File::open(&passfile)?.into_raw_fd();
    let fd = unsafe { libc::fcntl(low, libc::F_DUPFD, 900) };
    assert!(fd >= 900);
    assert_eq!(unsafe { libc::close(low) }, 0);
    let fd_value = fd.to_string();
    let mut source = scripted(&[("keyfile", fx.key()), ("passfd", fd_value.as_str())]);

    assert!(matches!(
        fx.host.configure_with(ALIAS, &mut source),
        Err(KeymodError::Configuration(_))
    ));
    assert_eq!(unsafe { libc::fcntl(fd, libc::F_GETFD) }, -1);
    assert!(fx.keyring.is_empty());
    Ok(())
}

#[test]
fn negative_descriptor_is_rejected() {
    let fx = Fixture::new(NodeSet::Legacy);
    let mut source = scripted(&[("keyfile", fx.key()), ("passfd", "-1")]);
    assert!(matches!(
        fx.host.configure_with(ALIAS, &mut source),
        Err(KeymodError::Configuration(_))
    ));
}

#[test]
fn passphrase_from_environment_variable() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    std::env::set_var("KEYMOD_TEST_PASSENV_SET", PASSPHRASE);
    let mut source = scripted(&[("keyfile", fx.key()), ("passenv", "KEYMOD_TEST_PASSENV_SET")]);
    let options = fx.host.configure_with(ALIAS, &mut source)?;
    assert_eq!(options.len(), 1);

    let mut source = scripted(&[("keyfile", fx.key()), ("passenv", "KEYMOD_TEST_PASSENV_UNSET")]);
    assert!(matches!(
        fx.host.configure_with(ALIAS, &mut source),
        Err(KeymodError::Configuration(_))
    ));
    Ok(())
}

#[test]
fn non_utf8_environment_passphrase_is_reported() {
    let fx = Fixture::new(NodeSet::Legacy);
    std::env::set_var("KEYMOD_TEST_PASSENV_BINARY", OsStr::from_bytes(b"\xff\xfe"));
    let mut source = scripted(&[("keyfile", fx.key()), ("passenv", "KEYMOD_TEST_PASSENV_BINARY")]);
    match fx.host.configure_with(ALIAS, &mut source) {
        Err(KeymodError::Configuration(message)) => assert!(message.contains("UTF-8")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn wrong_passphrase_aborts_without_mount_options() {
    let fx = Fixture::new(NodeSet::Legacy);
    let mut source = scripted(&[("keyfile", fx.key()), ("passwd", "wrong")]);
    assert!(matches!(
        fx.host.configure_with(ALIAS, &mut source),
        Err(KeymodError::Decryption(_))
    ));
    assert!(fx.keyring.is_empty());
}

#[test]
fn default_passphrase_node_needs_a_value() {
    let fx = Fixture::new(NodeSet::Legacy);
    let mut source = scripted(&[("keyfile", fx.key())]);
    match fx.host.configure_with(ALIAS, &mut source) {
        Err(KeymodError::Configuration(message)) => {
            assert!(message.contains("defaultpass"), "{message}")
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

/// Scripted values first, then canned answers for prompts.
struct PromptingSource {
    scripted: ScriptedParams,
    answer: &'static str,
    prompted: Vec<String>,
}

impl ParamSource for PromptingSource {
    fn contains(&self, name: &str) -> bool {
        self.scripted.contains(name)
    }

    fn take(&mut self, name: &str) -> Option<Zeroizing<String>> {
        self.scripted.take(name)
    }

    fn prompt(&mut self, request: &PromptRequest<'_>) -> KeymodResult<Option<Zeroizing<String>>> {
        self.prompted.push(request.name.to_string());
        Ok(Some(Zeroizing::new(self.answer.to_string())))
    }
}

#[test]
fn empty_stdin_value_falls_back_to_prompt() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);

    let mut source = scripted(&[("keyfile", fx.key()), ("passstdin", "")]);
    assert!(matches!(
        fx.host.configure_with(ALIAS, &mut source),
        Err(KeymodError::Configuration(_))
    ));

    let mut source = PromptingSource {
        scripted: scripted(&[("keyfile", fx.key()), ("passstdin", "")]),
        answer: PASSPHRASE,
        prompted: Vec::new(),
    };
    let options = fx.host.configure_with(ALIAS, &mut source)?;
    assert_eq!(source.prompted, vec!["passstdin"]);
    assert_eq!(options.len(), 1);
    Ok(())
}

#[test]
fn keyfile_prompt_offers_default_location() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let mut source = PromptingSource {
        scripted: scripted(&[("passwd", PASSPHRASE)]),
        answer: "",
        prompted: Vec::new(),
    };
    struct Suggesting<'a>(&'a mut PromptingSource);
    impl ParamSource for Suggesting<'_> {
        fn contains(&self, name: &str) -> bool {
            self.0.contains(name)
        }
        fn take(&mut self, name: &str) -> Option<Zeroizing<String>> {
            self.0.take(name)
        }
        fn prompt(
            &mut self,
            request: &PromptRequest<'_>,
        ) -> KeymodResult<Option<Zeroizing<String>>> {
            self.0.prompted.push(request.name.to_string());
            Ok(request.suggested.map(|s| Zeroizing::new(s.to_string())))
        }
    }

    let options = fx.host.configure_with(ALIAS, &mut Suggesting(&mut source))?;
    assert_eq!(source.prompted, vec!["keyfile"]);
    assert_eq!(options.get("ecryptfs_sig"), Some(fx.expected_sig().as_str()));
    Ok(())
}

#[test]
fn revised_nodes_route_by_passphrase_method() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Revised);

    let mut source = scripted(&[("keyfile", fx.key()), ("passwd", PASSPHRASE)]);
    assert_eq!(fx.host.configure_with(ALIAS, &mut source)?.len(), 1);

    let passfile = fx.write_passfile("passwd=secret\n");
    let mut source = scripted(&[
        ("keyfile", fx.key()),
        ("passwd_file", passfile.to_str().unwrap()),
    ]);
    assert_eq!(fx.host.configure_with(ALIAS, &mut source)?.len(), 1);

    let fd = fs::File::open(&passfile)?.into_raw_fd().to_string();
    let mut source = scripted(&[
        ("keyfile", fx.key()),
        ("passwd_specification_method", "passwd_fd"),
        ("passwd_fd", fd.as_str()),
    ]);
    assert_eq!(fx.host.configure_with(ALIAS, &mut source)?.len(), 1);

    let mut source = scripted(&[("keyfile", fx.key()), ("passenv", "HOME")]);
    assert!(matches!(
        fx.host.configure_with(ALIAS, &mut source),
        Err(KeymodError::Configuration(_))
    ));
    Ok(())
}

#[test]
fn unknown_module_alias_is_rejected() {
    let fx = Fixture::new(NodeSet::Legacy);
    let mut source = scripted(&[("key", "tspi"), ("keyfile", fx.key()), ("passwd", PASSPHRASE)]);
    match fx.host.configure(&mut source) {
        Err(KeymodError::Configuration(message)) => assert!(message.contains("tspi")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn host_without_pubkey_capability_cannot_enter_subgraphs() {
    let fx = Fixture::with_versioning(NodeSet::Legacy, VersionFlags::PASSPHRASE);
    let mut source = scripted(&[("keyfile", fx.key()), ("passwd", PASSPHRASE)]);
    assert!(fx
        .host
        .configure_with(ALIAS, &mut source)
        .unwrap_err()
        .is_unsupported());
    assert!(fx
        .host
        .generate_key(ALIAS, &mut scripted(&[]))
        .unwrap_err()
        .is_unsupported());
}

#[test]
fn generated_key_is_usable_for_mounting() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let new_key = fx.dir.path().join("fresh").join("pki").join("key.pem");
    let new_key_str = new_key.to_str().unwrap();

    fx.host.generate_key(
        ALIAS,
        &mut scripted(&[("keyfile", new_key_str), ("passphrase", "fresh-pass")]),
    )?;
    assert!(new_key.is_file());

    let mut source = scripted(&[("keyfile", new_key_str), ("passwd", "fresh-pass")]);
    let options = fx.host.configure_with(ALIAS, &mut source)?;
    let expected = compute_signature(&OpensslParams::new(new_key_str, "fresh-pass").view())?;
    assert_eq!(options.get("ecryptfs_sig"), Some(expected.as_str()));
    assert_ne!(expected, fx.expected_sig());
    Ok(())
}

#[test]
fn generating_twice_into_existing_directories_succeeds() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let path = fx.dir.path().join("again").join("key.pem");
    for _ in 0..2 {
        fx.host.generate_key(
            ALIAS,
            &mut scripted(&[("keyfile", path.to_str().unwrap()), ("passphrase", "pw-pw")]),
        )?;
    }
    assert!(path.is_file());
    Ok(())
}

#[test]
fn module_operations_wrap_and_unwrap_with_blob() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let handle = fx.host.module(ALIAS)?;
    let module = handle.ops();

    let values = vec![
        ParamValue::new(PATH_PARAM, fx.key()),
        ParamValue::new(PASSPHRASE_PARAM, PASSPHRASE),
    ];
    let blob = module.blob(&values)?;
    assert_eq!(module.blob_size(&values)?, blob.len());
    assert_eq!(module.key_sig(&blob)?, fx.expected_sig());

    let fek = [0x42u8; 32];
    let wrapped = module.encrypt(&fek, &blob)?;
    assert_eq!(wrapped.len(), module.encrypted_size(&blob)?);
    assert_eq!(module.decrypt(&wrapped, &blob)?.as_slice(), &fek);
    Ok(())
}

#[test]
fn default_key_location_follows_home() -> KeymodResult<()> {
    let fx = Fixture::new(NodeSet::Legacy);
    let module = OpensslKeyModule::new({
        let mut config = KeymodConfig::default();
        config.host.home_dir = Some(fx.dir.path().display().to_string());
        config
    });
    module.init()?;
    assert_eq!(module.default_paths()?.key_file, fx.key_path);
    assert!(Path::new(&fx.key_path).is_file());
    module.finalize()?;
    Ok(())
}
