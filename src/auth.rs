//! Bearer-token authentication against the managed auth provider.
//!
//! Tokens are HS256 JWTs signed with the provider's project secret. A caller
//! is an administrator when either metadata block carries `role: "admin"`
//! or their email is listed in `ADMIN_EMAILS`. Students are identified by
//! their login email.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub app_metadata: Option<Value>,
    #[serde(default)]
    pub user_metadata: Option<Value>,
}

impl Claims {
    fn metadata_role_is_admin(&self) -> bool {
        [&self.app_metadata, &self.user_metadata]
            .into_iter()
            .flatten()
            .filter_map(|m| m.get("role").and_then(Value::as_str))
            .any(|role| role.trim().eq_ignore_ascii_case("admin"))
    }
}

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub is_admin: bool,
}

impl AuthUser {
    /// Roster key of the caller.
    pub fn student_id(&self) -> &str {
        &self.email
    }
}

#[derive(Clone)]
pub struct JwtVerifier {
    key: Option<DecodingKey>,
    audience: Option<String>,
    admin_emails: Vec<String>,
}

impl JwtVerifier {
    /// An empty secret yields a verifier that rejects every token.
    pub fn new(secret: &str, audience: Option<String>, admin_emails: Vec<String>) -> Self {
        let key = (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes()));
        Self {
            key,
            audience,
            admin_emails: admin_emails
                .into_iter()
                .map(|e| e.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<AuthUser> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no JWT secret configured"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, key, &validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidSignature => "invalid signature",
                ErrorKind::InvalidAudience => "invalid audience",
                _ => "token validation failed",
            };
            anyhow::anyhow!(reason)
        })?;
        let claims = data.claims;

        let email = claims
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| anyhow::anyhow!("token has no email claim"))?;

        let is_admin = claims.metadata_role_is_admin() || self.admin_emails.contains(&email);

        Ok(AuthUser {
            user_id: claims.sub,
            email,
            is_admin,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(claims: Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future() -> u64 {
        (chrono::Utc::now().timestamp() + 3600) as u64
    }

    #[test]
    fn test_student_token() {
        let v = JwtVerifier::new(SECRET, None, vec![]);
        let t = token(
            json!({"sub": "u1", "email": "10101@DS.es.kr", "exp": future()}),
            SECRET,
        );
        let user = v.verify(&t).unwrap();
        assert_eq!(user.student_id(), "10101@ds.es.kr");
        assert!(!user.is_admin);
    }

    #[test]
    fn test_admin_by_metadata_or_email() {
        let v = JwtVerifier::new(SECRET, None, vec!["Office@ds.es.kr".into()]);

        let by_role = token(
            json!({"sub": "u2", "email": "t@ds.es.kr", "exp": future(),
                   "user_metadata": {"role": "Admin"}}),
            SECRET,
        );
        assert!(v.verify(&by_role).unwrap().is_admin);

        let by_app_role = token(
            json!({"sub": "u3", "email": "p@ds.es.kr", "exp": future(),
                   "app_metadata": {"role": "admin"}}),
            SECRET,
        );
        assert!(v.verify(&by_app_role).unwrap().is_admin);

        let by_email = token(
            json!({"sub": "u4", "email": "office@ds.es.kr", "exp": future()}),
            SECRET,
        );
        assert!(v.verify(&by_email).unwrap().is_admin);
    }

    #[test]
    fn test_rejects_bad_tokens() {
        let v = JwtVerifier::new(SECRET, None, vec![]);
        let wrong_key = token(
            json!({"sub": "u1", "email": "a@b", "exp": future()}),
            "other",
        );
        assert!(v.verify(&wrong_key).is_err());

        let expired = token(json!({"sub": "u1", "email": "a@b", "exp": 1000}), SECRET);
        assert!(v.verify(&expired).is_err());

        let no_email = token(json!({"sub": "u1", "exp": future()}), SECRET);
        assert!(v.verify(&no_email).is_err());

        let unconfigured = JwtVerifier::new("", None, vec![]);
        let ok = token(json!({"sub": "u1", "email": "a@b", "exp": future()}), SECRET);
        assert!(unconfigured.verify(&ok).is_err());
    }

    #[test]
    fn test_audience_checked_when_configured() {
        let v = JwtVerifier::new(SECRET, Some("authenticated".into()), vec![]);
        let good = token(
            json!({"sub": "u1", "email": "a@b", "exp": future(), "aud": "authenticated"}),
            SECRET,
        );
        assert!(v.verify(&good).is_ok());
        let bad = token(
            json!({"sub": "u1", "email": "a@b", "exp": future(), "aud": "anon"}),
            SECRET,
        );
        assert!(v.verify(&bad).is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }
}
