use crate::protocol::ProtocolConfiguration;
use authgate_core::AuthError;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Claims of a validated ID token.
pub type IdTokenClaims = serde_json::Map<String, serde_json::Value>;

const JWKS_TTL: Duration = Duration::from_secs(3600);

/// Validates ID tokens: signature, `iss`, `aud` and `exp`, then `nonce`.
///
/// HMAC-signed tokens are checked against the client secret. Any other
/// algorithm is checked against the provider's `jwks_uri`. Key sets are cached
/// per URI and refetched once when a `kid` is unknown.
pub struct IdTokenValidator {
    client: reqwest::Client,
    key_sets: RwLock<HashMap<String, (JwkSet, Instant)>>,
}

impl IdTokenValidator {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            key_sets: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `id_token` for `configuration` and return its claims.
    ///
    /// When `expected_nonce` is set the token must carry the same `nonce`.
    pub async fn validate(
        &self,
        configuration: &ProtocolConfiguration,
        id_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdTokenClaims, AuthError> {
        let metadata = configuration.provider_metadata().ok_or_else(|| {
            AuthError::Configuration("provider metadata has not been resolved".into())
        })?;
        let header = decode_header(id_token)
            .map_err(|e| AuthError::Token(format!("invalid ID token header: {e}")))?;

        let key = match header.alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                if configuration.secret().is_empty() {
                    return Err(AuthError::Token(
                        "HMAC-signed ID token but no client secret is configured".into(),
                    ));
                }
                DecodingKey::from_secret(configuration.secret().as_bytes())
            }
            _ => {
                let jwks_uri = metadata.jwks_uri.as_deref().ok_or_else(|| {
                    AuthError::Configuration("provider does not advertise a jwks_uri".into())
                })?;
                self.decoding_key(jwks_uri, header.kid.as_deref()).await?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(std::slice::from_ref(&metadata.issuer));
        validation.set_audience(&[configuration.client_id()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = decode::<IdTokenClaims>(id_token, &key, &validation)
            .map_err(|e| AuthError::Token(format!("ID token rejected: {e}")))?
            .claims;

        if let Some(expected) = expected_nonce {
            if claims.get("nonce").and_then(|n| n.as_str()) != Some(expected) {
                return Err(AuthError::NonceMismatch);
            }
        }
        Ok(claims)
    }

    async fn decoding_key(&self, jwks_uri: &str, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        let cached = {
            let key_sets = self.key_sets.read().await;
            key_sets
                .get(jwks_uri)
                .filter(|(_, fetched)| fetched.elapsed() < JWKS_TTL)
                .map(|(set, _)| set.clone())
        };

        let key_set = match cached {
            Some(set) if find_key(&set, kid).is_some() => set,
            // Unknown kid: the provider may have rotated its keys.
            _ => self.refresh(jwks_uri).await?,
        };

        let jwk = find_key(&key_set, kid)
            .ok_or_else(|| AuthError::Token("no matching key in the provider JWKS".into()))?;
        DecodingKey::from_jwk(jwk)
            .map_err(|e| AuthError::Token(format!("unusable key in the provider JWKS: {e}")))
    }

    async fn refresh(&self, jwks_uri: &str) -> Result<JwkSet, AuthError> {
        debug!(%jwks_uri, "fetching provider JWKS");
        let response = self.client.get(jwks_uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Provider(format!(
                "JWKS endpoint {jwks_uri} returned {status}"
            )));
        }
        let key_set: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed JWKS document: {e}")))?;
        self.key_sets
            .write()
            .await
            .insert(jwks_uri.to_string(), (key_set.clone(), Instant::now()));
        Ok(key_set)
    }
}

impl std::fmt::Debug for IdTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenValidator").finish_non_exhaustive()
    }
}

fn find_key<'a>(set: &'a JwkSet, kid: Option<&str>) -> Option<&'a jsonwebtoken::jwk::Jwk> {
    match kid {
        Some(kid) => set.find(kid),
        None => set.keys.first(),
    }
}
