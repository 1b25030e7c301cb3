mod password;
mod token;

pub use password::{PasswordHasher, MIN_PASSWORD_LEN};
pub use token::{generate_reset_token, hash_reset_token, SessionClaims, SessionSigner, TokenError};
