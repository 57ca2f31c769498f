//! Email verification codes
//!
//! Codes are persisted with an expiry through `VerificationCodeRepository`, so
//! every service instance sees the same codes and a restart loses nothing.
//! A code is consumed by its first successful verification.

use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

use crate::error::ServiceResult;
use crate::repository::{CodePurpose, VerificationCode, VerificationCodeRepository};

const CODE_DIGITS: usize = 6;

#[derive(Debug, Validate)]
struct CodeRequest {
    #[validate(email)]
    email: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn generate_code() -> String {
    let n = rand::thread_rng().gen_range(0..10u32.pow(CODE_DIGITS as u32));
    format!("{:0width$}", n, width = CODE_DIGITS)
}

pub struct VerificationService {
    codes: Arc<dyn VerificationCodeRepository>,
    ttl: Duration,
}

impl VerificationService {
    pub fn new(codes: Arc<dyn VerificationCodeRepository>, ttl: Duration) -> Self {
        Self { codes, ttl }
    }

    /// Create and persist a fresh code, replacing any earlier one for the
    /// same email and purpose. Delivery is left to the caller.
    pub async fn issue(&self, email: &str, purpose: CodePurpose) -> ServiceResult<VerificationCode> {
        let request = CodeRequest {
            email: normalize_email(email),
        };
        request.validate()?;

        let code = VerificationCode {
            email: request.email,
            code: generate_code(),
            purpose,
            expires_at: Utc::now() + self.ttl,
        };
        self.codes.save(&code).await?;

        info!(purpose = purpose.as_str(), expires_at = %code.expires_at, "verification code issued");
        Ok(code)
    }

    /// True exactly once for a matching, unexpired code
    pub async fn verify(&self, email: &str, code: &str, purpose: CodePurpose) -> ServiceResult<bool> {
        let matched = self
            .codes
            .consume(&normalize_email(email), code.trim(), purpose, Utc::now())
            .await?;
        debug!(purpose = purpose.as_str(), matched, "verification code checked");
        Ok(matched)
    }

    pub async fn purge_expired(&self) -> ServiceResult<u64> {
        Ok(self.codes.purge_expired(Utc::now()).await?)
    }
}
