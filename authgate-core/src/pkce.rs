use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// The only challenge method issued.
pub const CHALLENGE_METHOD: &str = "S256";

/// A PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct Pkce {
    /// Secret kept in the session and sent with the token request.
    pub code_verifier: String,
    /// `BASE64URL(SHA256(code_verifier))`, sent with the authorization request.
    pub code_challenge: String,
}

impl Pkce {
    /// Generate a fresh random verifier and its S256 challenge.
    pub fn new() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let code_verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let code_challenge = Self::challenge_for(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
        }
    }

    /// Compute the S256 challenge for a verifier.
    pub fn challenge_for(code_verifier: &str) -> String {
        let digest = Sha256::digest(code_verifier.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}
