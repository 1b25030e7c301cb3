use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const MIN_PASSWORD_LEN: usize = 6;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Derives and checks password hashes in the
/// `pbkdf2-sha256$<iterations>$<salt>$<hash>` format. The iteration count is
/// stored per hash, so verification keeps working after the configured cost
/// changes.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        self.hash_with_salt(password, &salt)
    }

    fn hash_with_salt(&self, password: &str, salt: &[u8]) -> String {
        let mut derived = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.iterations, &mut derived);
        format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(derived)
        )
    }

    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.split('$');
        let (scheme, iterations, salt, expected) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(scheme), Some(iterations), Some(salt), Some(expected), None) => {
                (scheme, iterations, salt, expected)
            }
            _ => return false,
        };
        if scheme != SCHEME {
            return false;
        }
        let Ok(iterations) = iterations.parse::<u32>() else {
            return false;
        };
        if iterations == 0 {
            return false;
        }
        let Ok(salt) = STANDARD_NO_PAD.decode(salt) else {
            return false;
        };
        let Ok(expected) = STANDARD_NO_PAD.decode(expected) else {
            return false;
        };
        if expected.len() != HASH_LEN {
            return false;
        }
        let mut derived = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut derived);
        derived.ct_eq(expected.as_slice()).into()
    }

    /// Burns the same time as a real verification. Called for login attempts
    /// against unknown emails so response timing does not reveal whether an
    /// account exists.
    pub fn dummy_verify(&self, password: &str) {
        let salt = [0x5au8; SALT_LEN];
        let mut derived = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, self.iterations, &mut derived);
    }
}
