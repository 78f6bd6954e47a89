//! Verification of tenant-signed compact JWTs
//!
//! Only RSA-SHA256 signatures are accepted. A token walks through
//! [`VerificationStage`]s in order and the first failing stage rejects it.

use crate::errors::BoxError;
use crate::identity::{self, IdentityContext};
use crate::keys::TenantKeyResolver;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::Algorithm;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// `alg` header values accepted for RSA-SHA256
const ACCEPTED_ALGORITHMS: [&str; 2] = ["RS256", "SHA256withRSA"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    Parsed,
    SignatureChecked,
    ExpiryChecked,
    ClaimsNormalized,
    Accepted,
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parse",
            Self::SignatureChecked => "signature check",
            Self::ExpiryChecked => "expiry check",
            Self::ClaimsNormalized => "claim normalization",
            Self::Accepted => "acceptance",
        };
        f.write_str(name)
    }
}

/// A token rejected at `stage`
#[derive(Debug, Error)]
#[error("JWT rejected at {stage}: {reason}")]
pub struct JwtRejection {
    pub stage: VerificationStage,
    pub reason: String,
    #[source]
    pub cause: Option<BoxError>,
}

impl JwtRejection {
    fn new(stage: VerificationStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            cause: None,
        }
    }

    fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Split and decoded compact JWT
struct ParsedJwt<'a> {
    signing_input: &'a str,
    signature: &'a str,
    claims: Map<String, Value>,
}

fn decode_segment(segment: &str) -> Result<Value, JwtRejection> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| {
            JwtRejection::new(VerificationStage::Parsed, "Segment is not base64url").with_cause(e)
        })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        JwtRejection::new(VerificationStage::Parsed, "Segment is not JSON").with_cause(e)
    })
}

fn parse(jwt: &str) -> Result<ParsedJwt<'_>, JwtRejection> {
    let (signing_input, signature) = jwt
        .rsplit_once('.')
        .ok_or_else(|| JwtRejection::new(VerificationStage::Parsed, "Not a compact JWT"))?;
    let (header, payload) = signing_input
        .split_once('.')
        .filter(|(_, payload)| !payload.contains('.'))
        .ok_or_else(|| JwtRejection::new(VerificationStage::Parsed, "Not a compact JWT"))?;

    let header = decode_segment(header)?;
    let algorithm = header.get("alg").and_then(Value::as_str).unwrap_or_default();
    if !ACCEPTED_ALGORITHMS.contains(&algorithm) {
        return Err(JwtRejection::new(
            VerificationStage::Parsed,
            format!("Unsupported algorithm '{algorithm}'"),
        ));
    }

    match decode_segment(payload)? {
        Value::Object(claims) => Ok(ParsedJwt {
            signing_input,
            signature: signature.trim_end_matches('='),
            claims,
        }),
        _ => Err(JwtRejection::new(
            VerificationStage::Parsed,
            "Claim set is not a JSON object",
        )),
    }
}

/// Verifies inbound JWTs against the issuing tenant's public key
#[derive(Clone)]
pub struct JwtVerifier {
    keys: TenantKeyResolver,
}

impl JwtVerifier {
    pub fn new(keys: TenantKeyResolver) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &TenantKeyResolver {
        &self.keys
    }

    /// Verifies `jwt` as issued by `tenant_id` and returns its identity
    pub async fn authenticate(
        &self,
        jwt: &str,
        tenant_id: &str,
    ) -> Result<IdentityContext, JwtRejection> {
        let jwt = jwt.trim();
        if tenant_id.trim().is_empty() {
            return Err(JwtRejection::new(
                VerificationStage::Parsed,
                "No tenant id supplied",
            ));
        }
        let parsed = parse(jwt)?;

        let key = self.keys.public_key(tenant_id).await.map_err(|e| {
            JwtRejection::new(
                VerificationStage::SignatureChecked,
                format!("No public key for tenant '{tenant_id}'"),
            )
            .with_cause(e)
        })?;
        let valid = jsonwebtoken::crypto::verify(
            parsed.signature,
            parsed.signing_input.as_bytes(),
            &key,
            Algorithm::RS256,
        )
        .map_err(|e| {
            JwtRejection::new(VerificationStage::SignatureChecked, "Malformed signature")
                .with_cause(e)
        })?;
        if !valid {
            return Err(JwtRejection::new(
                VerificationStage::SignatureChecked,
                "Invalid JWT signature",
            ));
        }

        let expires_at = parsed
            .claims
            .get("exp")
            .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|exp| exp as i64)))
            .ok_or_else(|| {
                JwtRejection::new(VerificationStage::ExpiryChecked, "No expiration time")
            })?;
        if chrono::Utc::now().timestamp() >= expires_at {
            return Err(JwtRejection::new(
                VerificationStage::ExpiryChecked,
                "JWT has expired",
            ));
        }

        let context = IdentityContext::from_claims(jwt, parsed.claims, Some(tenant_id))
            .map_err(|missing| {
                JwtRejection::new(
                    VerificationStage::ClaimsNormalized,
                    format!("No {missing} specified in the JWT"),
                )
            })?;
        debug!(
            "Accepted JWT for '{}' in tenant '{}'",
            context.end_user, context.tenant_id
        );
        Ok(context)
    }

    /// Verifies `jwt` and installs its identity for the current
    /// [`identity::scope`]; rejections are logged and reported as `false`
    pub async fn verify(&self, jwt: &str, tenant_id: &str) -> bool {
        match self.authenticate(jwt, tenant_id).await {
            Ok(context) => {
                if !identity::install(context) {
                    warn!("Verified JWT outside of an identity scope; identity not retained");
                }
                true
            }
            Err(rejection) => {
                warn!("Authentication failed for tenant '{}': {}", tenant_id, rejection);
                false
            }
        }
    }
}
