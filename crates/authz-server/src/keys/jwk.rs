//! JWK key material: parsing private JWK sets, signing and verifying JWTs,
//! and exporting public-only JWK sets.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use p256::ecdsa::SigningKey as EcSigningKey;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KeyError;

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JWK as configured, including private members.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct PrivateJwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
}

impl std::fmt::Debug for PrivateJwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateJwk").field("kty", &self.kty).field("kid", &self.kid).finish()
    }
}

/// A private JWK set as configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivateJwkSet {
    pub keys: Vec<PrivateJwk>,
}

/// Public JSON Web Key. Carries no private members by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Public JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

// ─── Signing keys ────────────────────────────────────────────────────────────

/// One usable key: encoding and decoding halves plus its public JWK.
pub struct SigningKey {
    kid: String,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public: Jwk,
}

impl SigningKey {
    /// Build a key from a private JWK. EC keys must be P-256, RSA keys must
    /// carry their primes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKey` for missing or malformed members.
    pub fn from_private_jwk(jwk: &PrivateJwk) -> Result<Self, KeyError> {
        match jwk.kty.as_str() {
            "EC" => Self::from_ec_jwk(jwk),
            "RSA" => Self::from_rsa_jwk(jwk),
            other => Err(KeyError::invalid_key(format!("unsupported kty '{other}'"))),
        }
    }

    fn from_ec_jwk(jwk: &PrivateJwk) -> Result<Self, KeyError> {
        if jwk.crv.as_deref() != Some("P-256") {
            return Err(KeyError::invalid_key("EC keys must use curve P-256"));
        }
        check_alg(jwk, "ES256")?;

        let d = decode_member(jwk.d.as_deref(), "d")?;
        let secret = p256::SecretKey::from_slice(&d)
            .map_err(|e| KeyError::invalid_key(format!("bad EC private key: {e}")))?;
        let point = EcSigningKey::from(&secret).verifying_key().to_encoded_point(false);
        let x = point.x().ok_or_else(|| KeyError::invalid_key("missing x coordinate"))?;
        let y = point.y().ok_or_else(|| KeyError::invalid_key("missing y coordinate"))?;
        let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
        let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());

        if let (Some(cx), Some(cy)) = (jwk.x.as_deref(), jwk.y.as_deref()) {
            if cx != x_b64 || cy != y_b64 {
                return Err(KeyError::invalid_key("EC public point does not match d"));
            }
        }

        let pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::invalid_key(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(pem.as_bytes())?;
        let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)?;

        let kid = jwk.kid.clone().unwrap_or_else(|| {
            thumbprint(&format!(r#"{{"crv":"P-256","kty":"EC","x":"{x_b64}","y":"{y_b64}"}}"#))
        });

        Ok(Self {
            public: Jwk {
                kty: "EC".into(),
                kid: kid.clone(),
                use_: "sig".into(),
                alg: "ES256".into(),
                n: None,
                e: None,
                crv: Some("P-256".into()),
                x: Some(x_b64),
                y: Some(y_b64),
            },
            kid,
            algorithm: Algorithm::ES256,
            encoding_key,
            decoding_key,
        })
    }

    fn from_rsa_jwk(jwk: &PrivateJwk) -> Result<Self, KeyError> {
        check_alg(jwk, "RS256")?;

        let n = decode_member(jwk.n.as_deref(), "n")?;
        let e = decode_member(jwk.e.as_deref(), "e")?;
        let d = decode_member(jwk.d.as_deref(), "d")?;
        let p = decode_member(jwk.p.as_deref(), "p")?;
        let q = decode_member(jwk.q.as_deref(), "q")?;

        let private = RsaPrivateKey::from_components(
            BigUint::from_bytes_be(&n),
            BigUint::from_bytes_be(&e),
            BigUint::from_bytes_be(&d),
            vec![BigUint::from_bytes_be(&p), BigUint::from_bytes_be(&q)],
        )
        .map_err(|err| KeyError::invalid_key(format!("bad RSA private key: {err}")))?;
        private
            .validate()
            .map_err(|err| KeyError::invalid_key(format!("inconsistent RSA key: {err}")))?;

        let pem = private
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|err| KeyError::invalid_key(err.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())?;

        let n_b64 = URL_SAFE_NO_PAD.encode(private.n().to_bytes_be());
        let e_b64 = URL_SAFE_NO_PAD.encode(private.e().to_bytes_be());
        let decoding_key = DecodingKey::from_rsa_components(&n_b64, &e_b64)?;

        let kid = jwk.kid.clone().unwrap_or_else(|| {
            thumbprint(&format!(r#"{{"e":"{e_b64}","kty":"RSA","n":"{n_b64}"}}"#))
        });

        Ok(Self {
            public: Jwk {
                kty: "RSA".into(),
                kid: kid.clone(),
                use_: "sig".into(),
                alg: "RS256".into(),
                n: Some(n_b64),
                e: Some(e_b64),
                crv: None,
                x: None,
                y: None,
            },
            kid,
            algorithm: Algorithm::RS256,
            encoding_key,
            decoding_key,
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// JWS `alg` name.
    #[must_use]
    pub fn algorithm_name(&self) -> &str {
        &self.public.alg
    }

    #[must_use]
    pub fn public_jwk(&self) -> &Jwk {
        &self.public
    }

    /// Sign claims with this key. The header carries `kid` and `typ`.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Jwt` if encoding fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone());
        header.typ = Some("JWT".into());
        Ok(jsonwebtoken::encode(&header, claims, &self.encoding_key)?)
    }

    fn verify<T: DeserializeOwned>(&self, token: &str, issuer: &str) -> Result<TokenData<T>, KeyError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[issuer]);
        validation.validate_aud = false;
        validation.leeway = 0;
        Ok(jsonwebtoken::decode(token, &self.decoding_key, &validation)?)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

fn check_alg(jwk: &PrivateJwk, expected: &str) -> Result<(), KeyError> {
    match jwk.alg.as_deref() {
        None => Ok(()),
        Some(alg) if alg == expected => Ok(()),
        Some(alg) => Err(KeyError::invalid_key(format!(
            "alg '{alg}' does not match key type (expected {expected})"
        ))),
    }
}

fn decode_member(value: Option<&str>, name: &str) -> Result<Vec<u8>, KeyError> {
    let value = value.ok_or_else(|| KeyError::invalid_key(format!("missing '{name}'")))?;
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| KeyError::invalid_key(format!("'{name}' is not base64url: {e}")))
}

/// RFC 7638 thumbprint over the canonical required members.
fn thumbprint(canonical: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

// ─── Key sets ────────────────────────────────────────────────────────────────

/// An ordered, non-empty set of signing keys. The first key signs; the rest
/// only verify.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Vec<Arc<SigningKey>>,
}

impl KeySet {
    /// Build a set from already-constructed keys.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Unavailable` for an empty list.
    pub fn new(keys: Vec<SigningKey>) -> Result<Self, KeyError> {
        if keys.is_empty() {
            return Err(KeyError::Unavailable("key set is empty".into()));
        }
        Ok(Self { keys: keys.into_iter().map(Arc::new).collect() })
    }

    /// Parse a private JWK set; a single JWK object is accepted and wrapped.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKey` for malformed JSON or key members and
    /// `KeyError::Unavailable` for an empty set.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| KeyError::invalid_key(format!("key set is not JSON: {e}")))?;
        let set = if value.get("keys").is_some() {
            serde_json::from_value::<PrivateJwkSet>(value)
        } else {
            serde_json::from_value::<PrivateJwk>(value).map(|jwk| PrivateJwkSet { keys: vec![jwk] })
        }
        .map_err(|e| KeyError::invalid_key(format!("not a JWK or JWK set: {e}")))?;

        let keys = set
            .keys
            .iter()
            .map(SigningKey::from_private_jwk)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(keys)
    }

    /// The key that signs new tokens.
    #[must_use]
    pub fn active(&self) -> &SigningKey {
        &self.keys[0]
    }

    /// Look up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid == kid).map(|k| &**k)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Distinct signing algorithms in the set, active key first.
    #[must_use]
    pub fn algorithms(&self) -> Vec<String> {
        let mut algs: Vec<String> = Vec::new();
        for key in &self.keys {
            if !algs.iter().any(|a| a == key.algorithm_name()) {
                algs.push(key.algorithm_name().to_string());
            }
        }
        algs
    }

    /// Public-only export for the JWKS endpoint.
    #[must_use]
    pub fn public_jwks(&self) -> Jwks {
        Jwks { keys: self.keys.iter().map(|k| k.public.clone()).collect() }
    }

    /// Verify a JWT against the key named by its `kid` (or the active key when
    /// the header has none), checking signature, issuer and expiry.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` for unknown keys or failed validation.
    pub fn verify<T: DeserializeOwned>(&self, token: &str, issuer: &str) -> Result<TokenData<T>, KeyError> {
        let header = jsonwebtoken::decode_header(token)?;
        let key = match header.kid.as_deref() {
            Some(kid) => self
                .find(kid)
                .ok_or_else(|| KeyError::invalid_key(format!("unknown kid '{kid}'")))?,
            None => self.active(),
        };
        if header.alg != key.algorithm {
            return Err(KeyError::invalid_key("token alg does not match key"));
        }
        key.verify(token, issuer)
    }
}

/// Generate a fresh ES256 private JWK.
#[must_use]
pub fn generate_es256() -> PrivateJwk {
    let secret = p256::SecretKey::random(&mut OsRng);
    let point = EcSigningKey::from(&secret).verifying_key().to_encoded_point(false);
    let encode = |bytes: Option<&p256::FieldBytes>| bytes.map(|b| URL_SAFE_NO_PAD.encode(b.as_slice()));
    let x = encode(point.x());
    let y = encode(point.y());
    let kid = match (&x, &y) {
        (Some(x), Some(y)) => {
            thumbprint(&format!(r#"{{"crv":"P-256","kty":"EC","x":"{x}","y":"{y}"}}"#))
        }
        _ => uuid::Uuid::new_v4().to_string(),
    };

    PrivateJwk {
        kty: "EC".into(),
        kid: Some(kid),
        use_: Some("sig".into()),
        alg: Some("ES256".into()),
        crv: Some("P-256".into()),
        x,
        y,
        d: Some(URL_SAFE_NO_PAD.encode(secret.to_bytes().as_slice())),
        ..PrivateJwk::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PrivateKeyParts;

    fn es256_set(count: usize) -> (String, Vec<PrivateJwk>) {
        let keys: Vec<_> = (0..count).map(|_| generate_es256()).collect();
        let json = serde_json::to_string(&PrivateJwkSet { keys: keys.clone() }).unwrap();
        (json, keys)
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        iss: String,
        exp: i64,
    }

    fn claims(iss: &str, exp_offset: i64) -> Claims {
        Claims {
            sub: "alice".into(),
            iss: iss.into(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        }
    }

    #[test]
    fn test_parse_set_first_key_active() {
        let (json, keys) = es256_set(2);
        let set = KeySet::parse(&json).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(Some(set.active().kid().to_string()), keys[0].kid);
        assert_eq!(set.algorithms(), vec!["ES256"]);
    }

    #[test]
    fn test_single_jwk_is_wrapped() {
        let jwk = generate_es256();
        let set = KeySet::parse(&serde_json::to_string(&jwk).unwrap()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(KeySet::parse(r#"{"keys":[]}"#), Err(KeyError::Unavailable(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(KeySet::parse("not json"), Err(KeyError::InvalidKey(_))));
        assert!(KeySet::parse(r#"{"kty":"oct","k":"AAAA"}"#).is_err());
    }

    #[test]
    fn test_ec_without_d_rejected() {
        let mut jwk = generate_es256();
        jwk.d = None;
        assert!(SigningKey::from_private_jwk(&jwk).is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let (json, _) = es256_set(1);
        let set = KeySet::parse(&json).unwrap();
        let token = set.active().sign(&claims("https://issuer", 60)).unwrap();
        let data = set.verify::<Claims>(&token, "https://issuer").unwrap();
        assert_eq!(data.claims.sub, "alice");
        assert_eq!(data.header.kid.as_deref(), Some(set.active().kid()));
    }

    #[test]
    fn test_verify_rejects_wrong_issuer_and_expired() {
        let (json, _) = es256_set(1);
        let set = KeySet::parse(&json).unwrap();
        let token = set.active().sign(&claims("https://issuer", 60)).unwrap();
        assert!(set.verify::<Claims>(&token, "https://other").is_err());

        let expired = set.active().sign(&claims("https://issuer", -120)).unwrap();
        assert!(set.verify::<Claims>(&expired, "https://issuer").is_err());
    }

    #[test]
    fn test_retired_key_still_verifies() {
        let (json, keys) = es256_set(2);
        let old = KeySet::parse(&serde_json::to_string(&keys[1]).unwrap()).unwrap();
        let token = old.active().sign(&claims("iss", 60)).unwrap();

        let rotated = KeySet::parse(&json).unwrap();
        assert!(rotated.verify::<Claims>(&token, "iss").is_ok());
    }

    #[test]
    fn test_unknown_kid_rejected() {
        let (a, _) = es256_set(1);
        let (b, _) = es256_set(1);
        let token = KeySet::parse(&a).unwrap().active().sign(&claims("iss", 60)).unwrap();
        assert!(KeySet::parse(&b).unwrap().verify::<Claims>(&token, "iss").is_err());
    }

    #[test]
    fn test_public_jwks_has_no_private_members() {
        let (json, _) = es256_set(2);
        let exported = serde_json::to_string(&KeySet::parse(&json).unwrap().public_jwks()).unwrap();
        for member in [r#""d":"#, r#""p":"#, r#""q":"#, r#""dp":"#, r#""dq":"#, r#""qi":"#] {
            assert!(!exported.contains(member), "leaked {member}");
        }
        assert!(exported.contains(r#""use":"sig""#));
    }

    fn rsa_jwk() -> PrivateJwk {
        static KEY: std::sync::OnceLock<PrivateJwk> = std::sync::OnceLock::new();
        KEY.get_or_init(|| {
            let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
            let b64 = |v: &BigUint| URL_SAFE_NO_PAD.encode(v.to_bytes_be());
            let primes = key.primes();
            PrivateJwk {
                kty: "RSA".into(),
                alg: Some("RS256".into()),
                n: Some(b64(key.n())),
                e: Some(b64(key.e())),
                d: Some(b64(key.d())),
                p: Some(b64(&primes[0])),
                q: Some(b64(&primes[1])),
                dp: key.dp().map(b64),
                dq: key.dq().map(b64),
                qi: key.crt_coefficient().as_ref().map(b64),
                ..PrivateJwk::default()
            }
        })
        .clone()
    }

    #[test]
    fn test_rsa_key_signs_and_exports_public_only() {
        let jwk = rsa_jwk();
        assert!(jwk.dp.is_some() && jwk.qi.is_some());
        let set = KeySet::parse(&serde_json::to_string(&jwk).unwrap()).unwrap();
        assert_eq!(set.algorithms(), vec!["RS256"]);
        assert_eq!(set.active().algorithm(), Algorithm::RS256);

        let token = set.active().sign(&claims("https://issuer", 60)).unwrap();
        assert_eq!(set.verify::<Claims>(&token, "https://issuer").unwrap().claims.sub, "alice");

        let exported = serde_json::to_string(&set.public_jwks()).unwrap();
        for member in [r#""d":"#, r#""p":"#, r#""q":"#, r#""dp":"#, r#""dq":"#, r#""qi":"#] {
            assert!(!exported.contains(member), "leaked {member}");
        }
        let public = &set.public_jwks().keys[0];
        assert_eq!(public.kty, "RSA");
        assert_eq!(public.n, jwk.n);
        assert_eq!(public.e, jwk.e);
    }

    #[test]
    fn test_rsa_thumbprint_kid_and_mixed_set() {
        let rsa = rsa_jwk();
        let ec = generate_es256();
        let set = KeySet::parse(&serde_json::to_string(&PrivateJwkSet { keys: vec![rsa, ec.clone()] }).unwrap())
            .unwrap();
        assert_eq!(set.active().kid().len(), 43);
        assert_eq!(set.algorithms(), vec!["RS256", "ES256"]);

        let retired = KeySet::parse(&serde_json::to_string(&ec).unwrap()).unwrap();
        let token = retired.active().sign(&claims("iss", 60)).unwrap();
        assert!(set.verify::<Claims>(&token, "iss").is_ok());
    }

    #[test]
    fn test_rsa_rejects_mismatched_alg_and_missing_primes() {
        let mut jwk = rsa_jwk();
        jwk.alg = Some("ES256".into());
        assert!(SigningKey::from_private_jwk(&jwk).is_err());

        let mut jwk = rsa_jwk();
        jwk.p = None;
        assert!(matches!(SigningKey::from_private_jwk(&jwk), Err(KeyError::InvalidKey(_))));
    }

    #[test]
    fn test_debug_hides_private_members() {
        let jwk = generate_es256();
        let d = jwk.d.clone().unwrap();
        assert!(!format!("{jwk:?}").contains(&d));
    }
}
