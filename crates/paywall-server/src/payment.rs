//! Payment gate in front of grant issuance.
//!
//! Checking a payment proof against a facilitator is delegated to a
//! [`PaymentVerifier`]. The server only knows how to challenge a request that
//! carries no proof, and how to forward one that does.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ServerConfig;

pub const PAYMENT_HEADER: &str = "x-payment";

/// What a buyer has to pay, advertised in 402 challenges
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub price: String,
    pub pay_to: String,
    pub network: String,
    pub resource: String,
    pub payment_endpoint: String,
    pub facilitator: String,
}

impl PaymentRequirements {
    pub fn for_endpoint(config: &ServerConfig, payment_endpoint: &str) -> Self {
        Self {
            price: config.display_price(),
            pay_to: config.pay_to.clone(),
            network: config.network.clone(),
            resource: config.resource_url(payment_endpoint),
            payment_endpoint: payment_endpoint.to_string(),
            facilitator: config.facilitator_url.clone(),
        }
    }
}

pub trait PaymentVerifier: Send + Sync {
    /// Whether `proof` settles `requirements`. Called before any grant is issued.
    fn verify(&self, proof: &str, requirements: &PaymentRequirements) -> bool;
}

/// Accepts any non-empty proof; verification happened upstream (facilitator middleware or proxy)
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustUpstream;

impl PaymentVerifier for TrustUpstream {
    fn verify(&self, proof: &str, _requirements: &PaymentRequirements) -> bool {
        !proof.trim().is_empty()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequiredBody<'a> {
    error: &'a str,
    price: &'a str,
    payment_endpoint: &'a str,
    accepts: &'a PaymentRequirements,
}

/// 402 response carrying the `X-402-*` headers and a JSON body
pub struct PaymentRequired {
    pub requirements: PaymentRequirements,
    pub reason: &'static str,
}

impl IntoResponse for PaymentRequired {
    fn into_response(self) -> Response {
        let req = &self.requirements;
        let body = Json(PaymentRequiredBody {
            error: self.reason,
            price: &req.price,
            payment_endpoint: &req.payment_endpoint,
            accepts: req,
        });
        let mut response = (StatusCode::PAYMENT_REQUIRED, body).into_response();

        let headers = response.headers_mut();
        headers.insert("x-402-payment-required", HeaderValue::from_static("true"));
        for (name, value) in [
            ("x-402-amount", &req.price),
            ("x-402-pay-to", &req.pay_to),
            ("x-402-network", &req.network),
        ] {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(e) => warn!("Skipping {} header: {}", name, e),
            }
        }
        response
    }
}

/// Pass when the request carries a proof the verifier accepts; otherwise the 402 challenge
pub fn require_payment(
    headers: &HeaderMap,
    verifier: &dyn PaymentVerifier,
    requirements: PaymentRequirements,
) -> std::result::Result<(), PaymentRequired> {
    let Some(proof) = headers
        .get(PAYMENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    else {
        return Err(PaymentRequired {
            requirements,
            reason: "Payment Required",
        });
    };

    if !verifier.verify(proof, &requirements) {
        warn!("Payment proof rejected for {}", requirements.resource);
        return Err(PaymentRequired {
            requirements,
            reason: "Payment verification failed",
        });
    }

    info!("Payment accepted for {}", requirements.resource);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{test_config, PAY_IMAGE_PATH};

    struct RejectAll;

    impl PaymentVerifier for RejectAll {
        fn verify(&self, _proof: &str, _requirements: &PaymentRequirements) -> bool {
            false
        }
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements::for_endpoint(&test_config(), PAY_IMAGE_PATH)
    }

    #[test]
    fn test_requirements_from_config() {
        let req = requirements();
        assert_eq!(req.price, "$0.1");
        assert_eq!(req.resource, "https://example.com/api/pay/image");
        assert_eq!(req.network, "base-sepolia");
    }

    #[test]
    fn test_missing_proof_is_challenged() {
        let headers = HeaderMap::new();
        let challenge = require_payment(&headers, &TrustUpstream, requirements()).unwrap_err();
        assert_eq!(challenge.reason, "Payment Required");

        let response = challenge.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(response.headers()["x-402-payment-required"], "true");
        assert_eq!(response.headers()["x-402-amount"], "$0.1");
        assert_eq!(response.headers()["x-402-network"], "base-sepolia");
        assert_eq!(
            response.headers()["x-402-pay-to"],
            "0x000000000000000000000000000000000000dEaD"
        );
    }

    #[test]
    fn test_present_proof_passes_trusting_verifier() {
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_HEADER, HeaderValue::from_static("proof"));
        assert!(require_payment(&headers, &TrustUpstream, requirements()).is_ok());

        headers.insert(PAYMENT_HEADER, HeaderValue::from_static("  "));
        assert!(require_payment(&headers, &TrustUpstream, requirements()).is_err());
    }

    #[test]
    fn test_rejected_proof_is_challenged() {
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_HEADER, HeaderValue::from_static("forged"));
        let challenge = require_payment(&headers, &RejectAll, requirements()).unwrap_err();
        assert_eq!(challenge.reason, "Payment verification failed");
    }
}
