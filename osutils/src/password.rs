//! GRUB2 PBKDF2 password hashes, as produced by grub2-mkpasswd-pbkdf2.
//!
//! A hash is rendered as `grub.pbkdf2.sha512.<rounds>.<salt>.<digest>` with
//! salt and digest in uppercase hex.

use std::{fmt, str::FromStr};

use anyhow::{bail, ensure, Context, Error};
use openssl::{hash::MessageDigest, pkcs5::pbkdf2_hmac};
use rand::Rng;

/// Prefix shared by every GRUB2 PBKDF2 hash.
pub const HASH_PREFIX: &str = "grub.pbkdf2.";

/// Length of generated salts.
const SALT_LENGTH: usize = 63;

/// Length of the SHA-512 digest.
const DIGEST_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pbkdf2Hash {
    pub rounds: u32,
    pub salt: Vec<u8>,
    pub digest: Vec<u8>,
}

impl Pbkdf2Hash {
    /// Hashes `password` with a fresh random salt.
    pub fn new(password: &str, rounds: u32) -> Result<Self, Error> {
        let mut rng = rand::rng();
        let salt: Vec<u8> = (0..SALT_LENGTH)
            .map(|_| rng.random_range(b'A'..=b'Z'))
            .collect();
        Self::with_salt(password, salt, rounds)
    }

    pub fn with_salt(password: &str, salt: Vec<u8>, rounds: u32) -> Result<Self, Error> {
        let digest = derive(password, &salt, rounds, DIGEST_LENGTH)?;
        Ok(Pbkdf2Hash {
            rounds,
            salt,
            digest,
        })
    }

    /// Checks whether `password` produces this hash.
    pub fn verify(&self, password: &str) -> Result<bool, Error> {
        Ok(derive(password, &self.salt, self.rounds, self.digest.len())? == self.digest)
    }
}

fn derive(password: &str, salt: &[u8], rounds: u32, length: usize) -> Result<Vec<u8>, Error> {
    ensure!(rounds > 0, "PBKDF2 needs at least one round");
    let mut digest = vec![0; length];
    pbkdf2_hmac(
        password.as_bytes(),
        salt,
        rounds as usize,
        MessageDigest::sha512(),
        &mut digest,
    )
    .context("Failed to compute PBKDF2 digest")?;
    Ok(digest)
}

impl FromStr for Pbkdf2Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let start = s
            .find(HASH_PREFIX)
            .context("Value is not a GRUB2 PBKDF2 hash")?;
        let fields: Vec<&str> = s[start + HASH_PREFIX.len()..].trim().split('.').collect();

        let [algorithm, rounds, salt, digest] = fields[..] else {
            bail!("Expected 4 fields after '{HASH_PREFIX}', found {}", fields.len());
        };
        ensure!(
            algorithm == "sha512",
            "Unsupported PBKDF2 algorithm '{algorithm}'"
        );

        Ok(Pbkdf2Hash {
            rounds: rounds
                .parse()
                .with_context(|| format!("Invalid round count '{rounds}'"))?,
            salt: hex::decode(salt).context("Invalid salt encoding")?,
            digest: hex::decode(digest).context("Invalid digest encoding")?,
        })
    }
}

impl fmt::Display for Pbkdf2Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{HASH_PREFIX}sha512.{}.{}.{}",
            self.rounds,
            hex::encode_upper(&self.salt),
            hex::encode_upper(&self.digest)
        )
    }
}

/// Whether a password value is already a PBKDF2 hash rather than plain text.
pub fn is_hashed(value: &str) -> bool {
    value.contains(HASH_PREFIX)
}
