use std::path::Path;

use anyhow::Result;
use clap::Args;
use config::EncryptionConfig;
use serde_json::json;
use storage::CredentialCipher;

use crate::commands::load_config;
use crate::output;
use crate::ux_error;

#[derive(Args)]
pub struct GenerateKeyArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct EncryptPasswordArgs {
    /// Plaintext database password
    #[arg(long, env = "ATTEST_CLIENT_DB_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Encryption key, overriding ATTEST_ENCRYPTION_KEY and the config file
    #[arg(long, hide_env_values = true)]
    pub key: Option<String>,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

pub fn generate(args: GenerateKeyArgs) -> Result<()> {
    let key = CredentialCipher::generate_key();
    if args.json {
        println!("{}", json!({ "key": key.as_str() }));
    } else {
        println!("{}", key.as_str());
    }
    Ok(())
}

pub fn encrypt_password(config_path: Option<&Path>, args: EncryptPasswordArgs) -> Result<()> {
    let encryption = match args.key {
        Some(key) => EncryptionConfig::with_key(key),
        None => load_config(config_path)?.encryption,
    };
    let cipher = cipher_from(&encryption)?;
    let sealed = cipher.encrypt(&args.password)?;

    if args.json {
        println!("{}", json!({ "encrypted_password": sealed }));
    } else {
        println!("{sealed}");
        output::hint("Store this value in client_database_credentials.encrypted_password");
    }
    Ok(())
}

pub(crate) fn cipher_from(encryption: &EncryptionConfig) -> Result<CredentialCipher> {
    CredentialCipher::from_config(encryption).map_err(|e| {
        let err = ux_error::encryption_key_missing(&e.to_string());
        err.display();
        anyhow::Error::new(err)
    })
}
