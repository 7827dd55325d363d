//! Request signing and verification (AWS Signature Version 4).
//!
//! - `sigv4`: canonical request construction and the signer
//! - `verifier`: inbound request verification
//! - `credentials`: static and environment credential providers

mod credentials;
pub mod sigv4;
mod verifier;

pub use credentials::{
    CredentialProvider, CredentialProviderRef, Credentials, EnvCredentials, StaticCredentials,
};
pub use sigv4::{AMZ_DATE_FORMAT, SignableRequest, Signer};
pub use verifier::{InboundRequest, RequestAuthenticator, SERVICE, X_AMZ_DATE};
