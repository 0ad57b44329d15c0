//! Tri-Factor Validators
//!
//! The three independent factors behind the escrow barrier. The gate only
//! knows the tag and the boolean result; everything else is the
//! validator's business.
//!
//! - Identity: local checks on the agent and tenant identifiers
//! - Signal: remote entropy service with a local Shannon fallback
//! - Cognitive: jury deliberation over weighted trust signals

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::entropy::{EntropyAnalyzer, EntropyVerdict};
use crate::jury::{JuryClient, TrafficEvent};
use crate::types::{SignalSource, ValidationContext};

/// One barrier factor. Implementations must never panic; a failed check is
/// a `false`, not an error.
#[async_trait]
pub trait FactorValidator: Send + Sync {
    /// Which signal this validator contributes.
    fn source(&self) -> SignalSource;

    /// Evaluate the held item. `true` approves, `false` terminates it.
    async fn validate(&self, ctx: &ValidationContext) -> bool;
}

// ============================================================================
// IDENTITY
// ============================================================================

/// Tenant ids the gateway reserves for itself.
const RESERVED_TENANTS: [&str; 3] = ["system", "internal", "admin"];

/// Local identity factor.
///
/// Approves when the agent id is non-empty (empty is allowed with a warning
/// for compatibility holds) and the tenant id is a non-reserved non-empty
/// string. Production deployments extend this with credential verification,
/// deny lists and subscription checks.
#[derive(Debug, Clone, Default)]
pub struct IdentityValidator;

impl IdentityValidator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactorValidator for IdentityValidator {
    fn source(&self) -> SignalSource {
        SignalSource::Identity
    }

    async fn validate(&self, ctx: &ValidationContext) -> bool {
        if ctx.agent_id.is_empty() {
            tracing::warn!(
                item_id = %ctx.item_id,
                "Identity check passing empty agent id for compatibility"
            );
        }

        if ctx.tenant_id.is_empty() {
            tracing::warn!(item_id = %ctx.item_id, "Identity rejected: empty tenant");
            return false;
        }

        if RESERVED_TENANTS.contains(&ctx.tenant_id.as_str()) {
            tracing::warn!(
                item_id = %ctx.item_id,
                tenant_id = %ctx.tenant_id,
                "Identity rejected: reserved tenant"
            );
            return false;
        }

        true
    }
}

// ============================================================================
// SIGNAL (ENTROPY)
// ============================================================================

#[derive(Debug, Serialize)]
struct EntropyRequest<'a> {
    payload_hex: String,
    tenant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct EntropyResponse {
    verdict: EntropyVerdict,
}

/// Signal factor: asks the remote entropy service, falls back to the local
/// Shannon analyzer on transport errors. Approves only CLEAN payloads.
pub struct SignalValidator {
    client: reqwest::Client,
    entropy_url: Option<String>,
    analyzer: EntropyAnalyzer,
    request_timeout: Duration,
}

impl Default for SignalValidator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SignalValidator {
    /// Create a signal validator. With no URL the local analyzer is the
    /// only path.
    pub fn new(entropy_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            entropy_url,
            analyzer: EntropyAnalyzer::new(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-call transport timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the fallback analyzer.
    pub fn with_analyzer(mut self, analyzer: EntropyAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    async fn remote_verdict(
        &self,
        url: &str,
        ctx: &ValidationContext,
    ) -> Result<EntropyVerdict, reqwest::Error> {
        let body = EntropyRequest {
            payload_hex: hex::encode(&ctx.payload),
            tenant_id: &ctx.tenant_id,
        };

        let response = self
            .client
            .post(format!("{}/analyze", url.trim_end_matches('/')))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<EntropyResponse>().await?.verdict)
    }
}

#[async_trait]
impl FactorValidator for SignalValidator {
    fn source(&self) -> SignalSource {
        SignalSource::Entropy
    }

    async fn validate(&self, ctx: &ValidationContext) -> bool {
        let verdict = match &self.entropy_url {
            Some(url) => match self.remote_verdict(url, ctx).await {
                Ok(verdict) => {
                    tracing::debug!(item_id = %ctx.item_id, verdict = ?verdict, "Remote entropy verdict");
                    verdict
                }
                Err(e) => {
                    tracing::warn!(
                        item_id = %ctx.item_id,
                        error = %e,
                        "Entropy service unreachable, using local analyzer"
                    );
                    self.analyzer.analyze(&ctx.payload)
                }
            },
            None => self.analyzer.analyze(&ctx.payload),
        };

        verdict.approves()
    }
}

// ============================================================================
// COGNITIVE (JURY)
// ============================================================================

/// Cognitive factor: submits the held item to the jury. Transport failures
/// reject; there is no fallback deliberation.
pub struct CognitiveValidator {
    jury: Arc<dyn JuryClient>,
    deliberation_timeout: Duration,
}

impl CognitiveValidator {
    /// Create a cognitive validator over the given jury.
    pub fn new(jury: Arc<dyn JuryClient>) -> Self {
        Self {
            jury,
            deliberation_timeout: Duration::from_secs(30),
        }
    }

    /// Override the deliberation budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deliberation_timeout = timeout;
        self
    }
}

#[async_trait]
impl FactorValidator for CognitiveValidator {
    fn source(&self) -> SignalSource {
        SignalSource::Jury
    }

    async fn validate(&self, ctx: &ValidationContext) -> bool {
        let event = TrafficEvent::new(ctx.item_id.clone(), ctx.payload.clone())
            .with_metadata("agent_id", ctx.agent_id.clone())
            .with_metadata("tenant_id", ctx.tenant_id.clone());

        match tokio::time::timeout(self.deliberation_timeout, self.jury.deliberate(event)).await {
            Ok(Ok(response)) => {
                let approved = response.verdict.action.approves();
                tracing::info!(
                    item_id = %ctx.item_id,
                    action = ?response.verdict.action,
                    trust = response.verdict.trust_level,
                    reasoning = %response.reasoning,
                    "Jury verdict"
                );
                approved
            }
            Ok(Err(e)) => {
                tracing::warn!(item_id = %ctx.item_id, error = %e, "Jury failed, rejecting");
                false
            }
            Err(_) => {
                tracing::warn!(item_id = %ctx.item_id, "Jury deliberation timed out, rejecting");
                false
            }
        }
    }
}

/// The standard validator set for a gate instance.
pub fn standard_validators(
    entropy_url: Option<String>,
    jury: Arc<dyn JuryClient>,
) -> Vec<Arc<dyn FactorValidator>> {
    vec![
        Arc::new(IdentityValidator::new()),
        Arc::new(SignalValidator::new(entropy_url)),
        Arc::new(CognitiveValidator::new(jury)),
    ]
}
