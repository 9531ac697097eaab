use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_JWT_KID: &str = "jwt-kid";
pub const ARG_JWT_PRIVATE_KEY: &str = "jwt-private-key";
pub const ARG_JWT_PUBLIC_KEY: &str = "jwt-public-key";

#[derive(Debug, Clone)]
pub struct Options {
    pub kid: String,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

impl Options {
    /// Parse signing key arguments from matches.
    ///
    /// # Errors
    /// Returns an error if an argument is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let required = |id: &str| -> anyhow::Result<String> {
            match matches.get_one::<String>(id) {
                Some(value) if !value.trim().is_empty() => Ok(value.clone()),
                _ => anyhow::bail!("missing required argument: --{id}"),
            }
        };

        Ok(Self {
            kid: required(ARG_JWT_KID)?,
            private_key_path: PathBuf::from(required(ARG_JWT_PRIVATE_KEY)?),
            public_key_path: PathBuf::from(required(ARG_JWT_PUBLIC_KEY)?),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_KID)
                .long(ARG_JWT_KID)
                .help("Key id placed in the header of every issued token")
                .env("WARDEN_JWT_KID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_PRIVATE_KEY)
                .long(ARG_JWT_PRIVATE_KEY)
                .help("Path to the RSA private key used to sign tokens (PEM or DER)")
                .env("WARDEN_JWT_PRIVATE_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_PUBLIC_KEY)
                .long(ARG_JWT_PUBLIC_KEY)
                .help("Path to the matching RSA public key (PEM or DER)")
                .env("WARDEN_JWT_PUBLIC_KEY")
                .required(true),
        )
}
