// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing key generation and JWK conversion.
//!
//! Asymmetric keys are ECDSA (P-256 / P-384) generated with `ring`; the
//! PKCS#8 document never leaves the process and only the public point is
//! exported. Symmetric keys are random HMAC secrets (or secrets resolved
//! from a key source) and are exported as `oct` JWKs.

use std::fmt;
use std::str::FromStr;

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk, KeyAlgorithm, OctetKeyParameters, OctetKeyType, PublicKeyUse,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{
    EcdsaKeyPair, EcdsaSigningAlgorithm, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P384_SHA384_FIXED_SIGNING,
};
use sha2::{Digest, Sha256};

use super::source::KeyMaterial;
use crate::auth::AuthError;

/// Algorithms the custody layer can generate keys for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    Hs256,
    Hs384,
    Hs512,
    Es256,
    Es384,
}

impl SigningAlgorithm {
    /// The `alg` used in JWT headers.
    pub fn jwt_algorithm(self) -> Algorithm {
        match self {
            SigningAlgorithm::Hs256 => Algorithm::HS256,
            SigningAlgorithm::Hs384 => Algorithm::HS384,
            SigningAlgorithm::Hs512 => Algorithm::HS512,
            SigningAlgorithm::Es256 => Algorithm::ES256,
            SigningAlgorithm::Es384 => Algorithm::ES384,
        }
    }

    fn key_algorithm(self) -> KeyAlgorithm {
        match self {
            SigningAlgorithm::Hs256 => KeyAlgorithm::HS256,
            SigningAlgorithm::Hs384 => KeyAlgorithm::HS384,
            SigningAlgorithm::Hs512 => KeyAlgorithm::HS512,
            SigningAlgorithm::Es256 => KeyAlgorithm::ES256,
            SigningAlgorithm::Es384 => KeyAlgorithm::ES384,
        }
    }

    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            SigningAlgorithm::Hs256 | SigningAlgorithm::Hs384 | SigningAlgorithm::Hs512
        )
    }

    /// Curve required by an ECDSA algorithm.
    pub fn curve(self) -> Option<Curve> {
        match self {
            SigningAlgorithm::Es256 => Some(Curve::P256),
            SigningAlgorithm::Es384 => Some(Curve::P384),
            _ => None,
        }
    }

    /// Length of a freshly generated HMAC secret (one digest block output).
    fn secret_len(self) -> usize {
        match self {
            SigningAlgorithm::Hs384 => 48,
            SigningAlgorithm::Hs512 => 64,
            _ => 32,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(SigningAlgorithm::Hs256),
            "HS384" => Ok(SigningAlgorithm::Hs384),
            "HS512" => Ok(SigningAlgorithm::Hs512),
            "ES256" => Ok(SigningAlgorithm::Es256),
            "ES384" => Ok(SigningAlgorithm::Es384),
            other => Err(format!("unsupported signing algorithm '{other}'")),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.jwt_algorithm())
    }
}

/// ECDSA curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    P256,
    P384,
}

impl Curve {
    fn ring_algorithm(self) -> &'static EcdsaSigningAlgorithm {
        match self {
            Curve::P256 => &ECDSA_P256_SHA256_FIXED_SIGNING,
            Curve::P384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
        }
    }

    fn jwk_curve(self) -> EllipticCurve {
        match self {
            Curve::P256 => EllipticCurve::P256,
            Curve::P384 => EllipticCurve::P384,
        }
    }
}

impl FromStr for Curve {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P-256" | "P256" | "PRIME256V1" => Ok(Curve::P256),
            "P-384" | "P384" | "SECP384R1" => Ok(Curve::P384),
            other => Err(format!("unsupported curve '{other}'")),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::P256 => write!(f, "P-256"),
            Curve::P384 => write!(f, "P-384"),
        }
    }
}

/// Short SHA-256 fingerprint (first 8 bytes, hex) used in logs and as `kid`.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// A key able to sign tokens, together with its exported verification JWK.
///
/// For ECDSA keys the JWK holds only the public point. For HMAC keys the
/// JWK is the secret itself, since that is the verification material.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding: EncodingKey,
    jwk: Jwk,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a fresh key for `algorithm`.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, AuthError> {
        let rng = SystemRandom::new();

        match algorithm.curve() {
            Some(curve) => {
                let pkcs8 = EcdsaKeyPair::generate_pkcs8(curve.ring_algorithm(), &rng)
                    .map_err(|e| AuthError::KeyGeneration(format!("{algorithm}: {e}")))?;
                let pair = EcdsaKeyPair::from_pkcs8(curve.ring_algorithm(), pkcs8.as_ref(), &rng)
                    .map_err(|e| AuthError::KeyGeneration(format!("{algorithm}: {e}")))?;

                // Uncompressed SEC1 point: 0x04 || X || Y
                let point = pair.public_key().as_ref();
                let coordinate_len = (point.len() - 1) / 2;
                let x = &point[1..1 + coordinate_len];
                let y = &point[1 + coordinate_len..];
                let kid = fingerprint(point);

                let jwk = Jwk {
                    common: common_parameters(algorithm, &kid),
                    algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
                        key_type: EllipticCurveKeyType::EC,
                        curve: curve.jwk_curve(),
                        x: Base64UrlUnpadded::encode_string(x),
                        y: Base64UrlUnpadded::encode_string(y),
                    }),
                };

                Ok(Self {
                    kid,
                    algorithm,
                    encoding: EncodingKey::from_ec_der(pkcs8.as_ref()),
                    jwk,
                })
            }
            None => {
                let mut secret = vec![0u8; algorithm.secret_len()];
                rng.fill(&mut secret)
                    .map_err(|e| AuthError::KeyGeneration(format!("{algorithm}: {e}")))?;
                Ok(Self::from_secret_bytes(algorithm, &secret, None))
            }
        }
    }

    /// Build an HMAC key from secret material resolved from a key source.
    pub fn from_material(
        algorithm: SigningAlgorithm,
        material: &KeyMaterial,
    ) -> Result<Self, AuthError> {
        if !algorithm.is_symmetric() {
            return Err(AuthError::UnsupportedKeyFormat(format!(
                "{algorithm} keys cannot be built from a shared secret"
            )));
        }
        Ok(Self::from_secret_bytes(algorithm, material.as_bytes(), None))
    }

    /// Import a signing key from a JWK. Only `oct` keys carry signing
    /// material; public-only keys fail with `UnsupportedKeyFormat`.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, AuthError> {
        let AlgorithmParameters::OctetKey(octet) = &jwk.algorithm else {
            return Err(AuthError::UnsupportedKeyFormat(
                "JWK carries no private signing material".to_string(),
            ));
        };
        let secret = Base64UrlUnpadded::decode_vec(octet.value.trim_end_matches('='))
            .map_err(|e| AuthError::UnsupportedKeyFormat(format!("invalid oct key: {e}")))?;
        if secret.is_empty() {
            return Err(AuthError::UnsupportedKeyFormat("empty oct key".to_string()));
        }

        let algorithm = match jwk.common.key_algorithm {
            None | Some(KeyAlgorithm::HS256) => SigningAlgorithm::Hs256,
            Some(KeyAlgorithm::HS384) => SigningAlgorithm::Hs384,
            Some(KeyAlgorithm::HS512) => SigningAlgorithm::Hs512,
            Some(other) => {
                return Err(AuthError::UnsupportedKeyFormat(format!(
                    "oct key declares non-HMAC algorithm {other:?}"
                )))
            }
        };

        Ok(Self::from_secret_bytes(
            algorithm,
            &secret,
            jwk.common.key_id.clone(),
        ))
    }

    fn from_secret_bytes(algorithm: SigningAlgorithm, secret: &[u8], kid: Option<String>) -> Self {
        let kid = kid.unwrap_or_else(|| fingerprint(secret));
        let jwk = Jwk {
            common: common_parameters(algorithm, &kid),
            algorithm: AlgorithmParameters::OctetKey(OctetKeyParameters {
                key_type: OctetKeyType::Octet,
                value: Base64UrlUnpadded::encode_string(secret),
            }),
        };
        Self {
            kid,
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            jwk,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    /// JWK published to the cache (public point or shared secret).
    pub fn verification_jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// JWK safe to serve publicly; `None` for shared secrets.
    pub fn public_jwk(&self) -> Option<&Jwk> {
        (!self.algorithm.is_symmetric()).then_some(&self.jwk)
    }
}

fn common_parameters(algorithm: SigningAlgorithm, kid: &str) -> CommonParameters {
    CommonParameters {
        public_key_use: Some(PublicKeyUse::Signature),
        key_algorithm: Some(algorithm.key_algorithm()),
        key_id: Some(kid.to_string()),
        ..Default::default()
    }
}

/// Whether a JWK holds private material and must not be served publicly.
pub fn is_secret_jwk(jwk: &Jwk) -> bool {
    matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_))
}

/// Convert a JWK to a DecodingKey.
pub fn decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AuthError::UnsupportedKeyFormat(format!("RSA key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| AuthError::UnsupportedKeyFormat(format!("EC key: {e}")))?;

            let alg = match (jwk.common.key_algorithm, &ec.curve) {
                (Some(KeyAlgorithm::ES384), _) | (None, EllipticCurve::P384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok((key, alg))
        }
        AlgorithmParameters::OctetKey(octet) => {
            let secret = Base64UrlUnpadded::decode_vec(octet.value.trim_end_matches('='))
                .map_err(|e| AuthError::UnsupportedKeyFormat(format!("oct key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::HS384) => Algorithm::HS384,
                Some(KeyAlgorithm::HS512) => Algorithm::HS512,
                _ => Algorithm::HS256,
            };
            Ok((DecodingKey::from_secret(&secret), alg))
        }
        _ => Err(AuthError::UnsupportedKeyFormat(
            "Unsupported key type in JWKS".to_string(),
        )),
    }
}
