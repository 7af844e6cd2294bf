//! Salted, deterministic mapping from names to obfuscated identifiers.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of every identifier produced by [`NameHasher`].
pub const HASH_LEN: usize = 20;

/// Size of the salt generated when the caller does not supply one.
pub const RANDOM_SALT_LEN: usize = 32;

const LEADING: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const TRAILING: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Maps an input token to an obfuscated identifier.
///
/// Implementations must be deterministic for the lifetime of a run. Stages take
/// `&dyn Hasher` so tests can substitute a stub that forces collisions.
pub trait Hasher: Send + Sync {
    fn hash(&self, input: &str) -> String;

    /// Raw key material for byte transforms derived from the same secret.
    fn derive_key(&self, context: &[u8], len: usize) -> Vec<u8>;
}

/// SHA-256 over `salt || input`, rendered through a fixed alphabet.
///
/// Output always starts with a lower-case ASCII letter and contains only
/// lower-case letters and digits, so it is a valid Go identifier and a valid
/// directory name on case-insensitive file systems.
#[derive(Clone)]
pub struct NameHasher {
    salt: Vec<u8>,
}

impl NameHasher {
    /// Hasher with a caller-supplied salt (reproducible builds).
    pub fn new(salt: impl Into<Vec<u8>>) -> Self {
        Self { salt: salt.into() }
    }

    /// Hasher with a fresh salt from the OS random source.
    pub fn random() -> Self {
        let mut salt = vec![0u8; RANDOM_SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self { salt }
    }

    /// Build from the optional `--padding` value.
    pub fn from_padding(padding: Option<&str>) -> Self {
        match padding {
            Some(p) if !p.is_empty() => Self::new(p.as_bytes()),
            _ => Self::random(),
        }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl std::fmt::Debug for NameHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The salt is a secret; never print it.
        f.debug_struct("NameHasher").field("salt_len", &self.salt.len()).finish()
    }
}

impl Hasher for NameHasher {
    fn hash(&self, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(input.as_bytes());
        let digest = hasher.finalize();

        let mut out = String::with_capacity(HASH_LEN);
        out.push(LEADING[digest[0] as usize % LEADING.len()] as char);
        for byte in digest.iter().skip(1).take(HASH_LEN - 1) {
            out.push(TRAILING[*byte as usize % TRAILING.len()] as char);
        }
        out
    }

    fn derive_key(&self, context: &[u8], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut counter: u64 = 0;
        while out.len() < len {
            let mut hasher = Sha256::new();
            hasher.update(b"gobfuscate/key");
            hasher.update(&self.salt);
            hasher.update((context.len() as u64).to_le_bytes());
            hasher.update(context);
            hasher.update(counter.to_le_bytes());
            out.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        out.truncate(len);
        out
    }
}

/// Hash every `/`-separated component of an import path independently.
pub fn encrypt_components(path: &str, hasher: &dyn Hasher) -> String {
    path.split('/').map(|segment| hasher.hash(segment)).collect::<Vec<_>>().join("/")
}

/// Upper-case the first character of a hashed name when `original` is exported,
/// so the renamed symbol keeps its Go visibility.
pub fn match_visibility(hashed: &str, original: &str) -> String {
    if !is_exported(original) {
        return hashed.to_string();
    }
    let mut chars = hashed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Go export rule: the name starts with an upper-case letter.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
}
