//! Signed GC approval tokens.
//!
//! An approval token is a stateless HS256-signed credential binding a ticket
//! id to the "approval" capability with an embedded expiry. Validity
//! additionally requires the token to still equal the ticket's stored
//! `approval_token` column - clearing that column on submission is what makes
//! the credential single-use. The stored expiry is checked separately from
//! the embedded one; the two are set together but verified independently.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    core::settings::SettingsResolver,
    entities::tnm_ticket,
    errors::{Error, Result},
};

/// Fallback approval-link lifetime when no setting is configured (7 days).
pub const DEFAULT_TOKEN_EXPIRATION_HOURS: i64 = 168;

#[derive(Debug, Serialize, Deserialize)]
struct ApprovalClaims {
    /// Ticket the capability is bound to
    tnm_ticket_id: Uuid,
    /// Capability discriminator; always "approval" for these tokens
    #[serde(rename = "type")]
    token_type: String,
    /// Expiry as a Unix timestamp
    exp: i64,
}

/// Issues and verifies approval tokens with a server-held secret.
#[derive(Clone)]
pub struct ApprovalTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for ApprovalTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalTokens").finish_non_exhaustive()
    }
}

impl ApprovalTokens {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issues a token for a ticket with the approval-link lifetime resolved
    /// through the settings hierarchy (project-overridable).
    pub async fn issue(
        &self,
        db: &DatabaseConnection,
        resolver: &SettingsResolver,
        ticket: &tnm_ticket::Model,
    ) -> Result<(String, DateTime<Utc>)> {
        let hours = resolver
            .resolve(
                db,
                "APPROVAL_TOKEN_EXPIRATION_HOURS",
                None,
                Some(ticket.project_id),
            )
            .await?
            .and_then(|value| value.as_i64())
            .unwrap_or(DEFAULT_TOKEN_EXPIRATION_HOURS);
        self.issue_with_expiry(ticket.id, hours)
    }

    /// Issues a token expiring `hours` from now.
    pub fn issue_with_expiry(
        &self,
        ticket_id: Uuid,
        hours: i64,
    ) -> Result<(String, DateTime<Utc>)> {
        let expires_at = Utc::now() + Duration::hours(hours);
        let claims = ApprovalClaims {
            tnm_ticket_id: ticket_id,
            token_type: "approval".to_string(),
            exp: expires_at.timestamp(),
        };
        let token =
            encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
                Error::TokenInvalid {
                    reason: format!("failed to sign token: {e}"),
                }
            })?;
        Ok((token, expires_at))
    }

    /// Verifies signature, expiry and token type, returning the bound ticket
    /// id. Expiry failures surface as [`Error::TokenExpired`], everything
    /// else as [`Error::TokenInvalid`] - callers rely on the distinction.
    pub fn verify(&self, token: &str) -> Result<Uuid> {
        let data = decode::<ApprovalClaims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::TokenInvalid {
                    reason: e.to_string(),
                },
            })?;

        if data.claims.token_type != "approval" {
            return Err(Error::TokenInvalid {
                reason: format!("wrong token type '{}'", data.claims.token_type),
            });
        }

        Ok(data.claims.tnm_ticket_id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn tokens() -> ApprovalTokens {
        ApprovalTokens::new("test-secret-key-for-approval-tokens")
    }

    #[test]
    fn test_issue_and_verify_round_trip() -> Result<()> {
        let tokens = tokens();
        let ticket_id = Uuid::new_v4();

        let (token, expires_at) = tokens.issue_with_expiry(ticket_id, 168)?;
        assert!(expires_at > Utc::now());

        let verified = tokens.verify(&token)?;
        assert_eq!(verified, ticket_id);
        Ok(())
    }

    #[test]
    fn test_expired_token_is_distinct_from_invalid() -> Result<()> {
        let tokens = tokens();

        // Expired an hour ago; jsonwebtoken's default leeway is 60 seconds
        let (token, _) = tokens.issue_with_expiry(Uuid::new_v4(), -1)?;
        assert!(matches!(tokens.verify(&token), Err(Error::TokenExpired)));

        let garbage = tokens.verify("not-a-token");
        assert!(matches!(garbage, Err(Error::TokenInvalid { reason: _ })));
        Ok(())
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() -> Result<()> {
        let ours = tokens();
        let theirs = ApprovalTokens::new("a-completely-different-secret");

        let (token, _) = theirs.issue_with_expiry(Uuid::new_v4(), 168)?;
        assert!(matches!(
            ours.verify(&token),
            Err(Error::TokenInvalid { reason: _ })
        ));
        Ok(())
    }
}
