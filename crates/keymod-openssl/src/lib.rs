//! OpenSSL RSA key module for eCryptfs.
//!
//! The module keeps the wrapping key in a passphrase-protected PEM file. Its
//! blob records where the file is and how to unlock it; the file-encryption key
//! is wrapped with RSA-OAEP under that key.

pub mod blob;
pub mod defaults;
pub mod key;
pub mod module;
pub mod nodes;
pub mod signature;
pub mod transitions;

pub use blob::{BlobView, OpensslParams};
pub use defaults::DefaultPaths;
pub use module::{OpensslKeyModule, ALIAS};
pub use transitions::KeyGenSettings;
