//! Verification of SigV4-signed inbound requests.
//!
//! The presented `Authorization` header is parsed for its signed header list,
//! the request is rebuilt from those headers plus `X-Amz-Date` and the exact
//! body, re-signed with our own credentials, and the two header values must
//! match byte for byte.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use chrono::{DateTime, NaiveDateTime, Utc};
use snafu::prelude::*;
use tracing::trace;

use sluice_core::emit;
use sluice_core::metrics::events::RequestRejected;

use super::sigv4::{ALGORITHM, AMZ_DATE_FORMAT, SignableRequest, Signer};
use super::CredentialProviderRef;
use crate::error::{
    AuthError, InvalidDateSnafu, MalformedAuthorizationSnafu, MissingAuthorizationSnafu,
    MissingDateSnafu, SignatureMismatchSnafu,
};

/// Header carrying the signing timestamp.
pub const X_AMZ_DATE: &str = "x-amz-date";

/// Service name requests are signed for.
pub const SERVICE: &str = "firehose";

/// The pieces of an inbound request the verifier needs.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// Fields of a parsed `Authorization` header.
#[derive(Debug, PartialEq, Eq)]
struct Authorization<'a> {
    credential: &'a str,
    signed_headers: Vec<&'a str>,
    signature: &'a str,
}

fn parse_authorization(value: &str) -> Result<Authorization<'_>, AuthError> {
    let (algorithm, rest) = value
        .split_once(' ')
        .context(MalformedAuthorizationSnafu {
            message: "missing algorithm",
        })?;
    ensure!(
        algorithm == ALGORITHM,
        MalformedAuthorizationSnafu {
            message: format!("unsupported algorithm {algorithm}"),
        }
    );

    let (mut credential, mut signed_headers, mut signature) = (None, None, None);
    for part in rest.split(',') {
        match part.trim().split_once('=') {
            Some(("Credential", v)) => credential = Some(v),
            Some(("SignedHeaders", v)) => signed_headers = Some(v),
            Some(("Signature", v)) => signature = Some(v),
            _ => {}
        }
    }

    Ok(Authorization {
        credential: credential.context(MalformedAuthorizationSnafu {
            message: "missing Credential",
        })?,
        signed_headers: signed_headers
            .context(MalformedAuthorizationSnafu {
                message: "missing SignedHeaders",
            })?
            .split(';')
            .filter(|h| !h.is_empty())
            .collect(),
        signature: signature.context(MalformedAuthorizationSnafu {
            message: "missing Signature",
        })?,
    })
}

/// Verifies inbound requests against the configured credentials.
#[derive(Debug, Clone)]
pub struct RequestAuthenticator {
    credentials: CredentialProviderRef,
    region: String,
}

impl RequestAuthenticator {
    pub fn new(credentials: CredentialProviderRef, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    /// Accept the request only if its signature is what we would have produced.
    pub fn verify(&self, request: &InboundRequest<'_>) -> Result<(), AuthError> {
        let result = self.check(request);
        if let Err(e) = &result {
            emit!(RequestRejected {
                reason: if e.is_incomplete() {
                    "incomplete_signature"
                } else {
                    "invalid_signature"
                },
            });
        }
        result
    }

    fn check(&self, request: &InboundRequest<'_>) -> Result<(), AuthError> {
        let presented = request
            .headers
            .get(AUTHORIZATION)
            .context(MissingAuthorizationSnafu)?
            .to_str()
            .map_err(|_| AuthError::MalformedAuthorization {
                message: "non-ASCII header value".to_string(),
            })?;
        let authorization = parse_authorization(presented)?;

        let amz_date = header_str(request.headers, X_AMZ_DATE).context(MissingDateSnafu)?;
        let signed_at = parse_amz_date(amz_date)?;

        let mut headers = Vec::with_capacity(authorization.signed_headers.len() + 1);
        for &name in &authorization.signed_headers {
            if name.eq_ignore_ascii_case(X_AMZ_DATE) {
                continue;
            }
            // Signed headers missing from the request drop out of the signature
            let values = request
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter(|v| !v.is_empty());
            for value in values {
                headers.push((name.to_string(), value.to_string()));
            }
        }
        headers.push((X_AMZ_DATE.to_string(), amz_date.to_string()));

        let signer = Signer::new(self.credentials.credentials()?, &self.region, SERVICE);
        let expected = signer.authorization(
            &SignableRequest {
                method: request.method,
                path: request.path,
                query: request.query,
                headers,
                payload: request.body,
            },
            signed_at,
        );

        ensure!(expected == presented, SignatureMismatchSnafu);
        trace!(credential = authorization.credential, "Signature verified");
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_amz_date(value: &str) -> Result<DateTime<Utc>, AuthError> {
    NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .context(InvalidDateSnafu { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, StaticCredentials};
    use axum::http::HeaderValue;
    use chrono::TimeZone;
    use std::sync::Arc;

    const BODY: &[u8] = br#"{"DeliveryStreamName":"orders"}"#;

    fn credentials() -> Credentials {
        Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
    }

    fn authenticator() -> RequestAuthenticator {
        RequestAuthenticator::new(Arc::new(StaticCredentials::new(credentials())), "us-east-1")
    }

    /// Headers of a request signed the way an SDK client would sign it.
    fn signed_headers(body: &[u8]) -> HeaderMap {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let amz_date = at.format(AMZ_DATE_FORMAT).to_string();
        let signed = vec![
            ("content-type".to_string(), "application/x-amz-json-1.1".to_string()),
            ("host".to_string(), "localhost:4573".to_string()),
            ("x-amz-date".to_string(), amz_date),
            (
                "x-amz-target".to_string(),
                "Firehose_20150804.DescribeDeliveryStream".to_string(),
            ),
        ];
        let authorization = Signer::new(credentials(), "us-east-1", SERVICE).authorization(
            &SignableRequest {
                method: "POST",
                path: "/",
                query: "",
                headers: signed.clone(),
                payload: body,
            },
            at,
        );

        let mut headers = HeaderMap::new();
        for (name, value) in signed {
            headers.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(&value).unwrap(),
            );
        }
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization).unwrap());
        headers.insert("user-agent", HeaderValue::from_static("sdk/1.0"));
        headers
    }

    fn request<'a>(headers: &'a HeaderMap, body: &'a [u8]) -> InboundRequest<'a> {
        InboundRequest {
            method: "POST",
            path: "/",
            query: "",
            headers,
            body,
        }
    }

    #[test]
    fn test_valid_signature_verifies() {
        let headers = signed_headers(BODY);
        authenticator().verify(&request(&headers, BODY)).unwrap();
    }

    #[test]
    fn test_unsigned_header_mutation_still_verifies() {
        let mut headers = signed_headers(BODY);
        headers.insert("user-agent", HeaderValue::from_static("something-else/2.0"));
        headers.insert("x-amzn-trace-id", HeaderValue::from_static("Root=1-abc"));
        authenticator().verify(&request(&headers, BODY)).unwrap();
    }

    #[test]
    fn test_signed_header_mutation_fails() {
        let mut headers = signed_headers(BODY);
        headers.insert(
            "x-amz-target",
            HeaderValue::from_static("Firehose_20150804.DeleteDeliveryStream"),
        );
        let err = authenticator().verify(&request(&headers, BODY)).unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn test_body_mutation_fails() {
        let headers = signed_headers(BODY);
        let err = authenticator()
            .verify(&request(&headers, br#"{"DeliveryStreamName":"other"}"#))
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn test_other_secret_fails() {
        let headers = signed_headers(BODY);
        let verifier = RequestAuthenticator::new(
            Arc::new(StaticCredentials::new(Credentials::new("AKIDEXAMPLE", "other"))),
            "us-east-1",
        );
        assert!(verifier.verify(&request(&headers, BODY)).is_err());
    }

    #[test]
    fn test_missing_authorization_is_incomplete() {
        let mut headers = signed_headers(BODY);
        headers.remove(AUTHORIZATION);
        let err = authenticator().verify(&request(&headers, BODY)).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_headers_present_but_signature_forged_fails() {
        let mut headers = signed_headers(BODY);
        let forged = headers
            .get(AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .rsplit_once("Signature=")
            .map(|(head, _)| format!("{head}Signature={}", "0".repeat(64)))
            .unwrap();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&forged).unwrap());
        assert!(authenticator().verify(&request(&headers, BODY)).is_err());
    }

    #[test]
    fn test_parse_authorization() {
        let parsed = parse_authorization(
            "AWS4-HMAC-SHA256 Credential=AKID/20240501/us-east-1/firehose/aws4_request, \
             SignedHeaders=host;x-amz-date, Signature=abc",
        )
        .unwrap();
        assert_eq!(
            parsed.credential,
            "AKID/20240501/us-east-1/firehose/aws4_request"
        );
        assert_eq!(parsed.signed_headers, vec!["host", "x-amz-date"]);
        assert_eq!(parsed.signature, "abc");

        assert!(parse_authorization("AWS4-HMAC-SHA1 Credential=a").is_err());
        assert!(parse_authorization("AWS4-HMAC-SHA256 Credential=a").is_err());
    }

    #[test]
    fn test_invalid_date_is_rejected() {
        let mut headers = signed_headers(BODY);
        headers.insert("x-amz-date", HeaderValue::from_static("yesterday"));
        let err = authenticator().verify(&request(&headers, BODY)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidDate { .. }));
    }
}
