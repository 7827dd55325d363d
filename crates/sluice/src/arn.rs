//! Resource names.
//!
//! - `PipelineId`: `arn:aws:firehose:<region>:<account>:deliverystream/<name>`
//! - `StreamArn`: `arn:aws:kinesis:<region>:<account>:stream/<name>`
//! - `BucketArn`: `arn:aws:s3:::<bucket>[/<key>]`
//! - `RoleArn`: `arn:aws:iam::<account>:role/<name>`

use std::fmt;
use std::str::FromStr;

use snafu::prelude::*;

use crate::error::{ArnError, MalformedSnafu};

/// Split `arn:aws:<service>:<region>:<account>:<resource>` for the given service.
fn split_arn<'a>(raw: &'a str, service: &str) -> Result<[&'a str; 3], ArnError> {
    let mut parts = raw.splitn(6, ':');
    let malformed = |reason| MalformedSnafu { arn: raw, reason };

    ensure!(parts.next() == Some("arn"), malformed("missing arn prefix"));
    ensure!(parts.next() == Some("aws"), malformed("unsupported partition"));
    ensure!(parts.next() == Some(service), malformed("unexpected service"));

    match (parts.next(), parts.next(), parts.next()) {
        (Some(region), Some(account), Some(resource)) => Ok([region, account, resource]),
        _ => malformed("too few components").fail(),
    }
}

/// Identity of a delivery stream, unique within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineId {
    region: String,
    account: String,
    name: String,
}

impl PipelineId {
    pub fn new(region: impl Into<String>, account: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: account.into(),
            name: name.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:aws:firehose:{}:{}:deliverystream/{}",
            self.region, self.account, self.name
        )
    }
}

impl FromStr for PipelineId {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [region, account, resource] = split_arn(s, "firehose")?;
        let name = resource
            .strip_prefix("deliverystream/")
            .filter(|name| !name.is_empty())
            .context(MalformedSnafu {
                arn: s,
                reason: "expected deliverystream/<name>",
            })?;
        Ok(Self::new(region, account, name))
    }
}

/// A Kinesis data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamArn {
    pub region: String,
    pub account: String,
    pub name: String,
}

impl fmt::Display for StreamArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:aws:kinesis:{}:{}:stream/{}",
            self.region, self.account, self.name
        )
    }
}

impl FromStr for StreamArn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [region, account, resource] = split_arn(s, "kinesis")?;
        let name = resource
            .strip_prefix("stream/")
            .filter(|name| !name.is_empty())
            .context(MalformedSnafu {
                arn: s,
                reason: "expected stream/<name>",
            })?;
        Ok(Self {
            region: region.to_string(),
            account: account.to_string(),
            name: name.to_string(),
        })
    }
}

/// An S3 bucket, optionally with a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketArn {
    pub bucket: String,
    pub key: Option<String>,
}

impl fmt::Display for BucketArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "arn:aws:s3:::{}/{}", self.bucket, key),
            None => write!(f, "arn:aws:s3:::{}", self.bucket),
        }
    }
}

impl FromStr for BucketArn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("arn:aws:s3:::").context(MalformedSnafu {
            arn: s,
            reason: "expected arn:aws:s3::: prefix",
        })?;
        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket, Some(key.to_string())),
            None => (rest, None),
        };
        ensure!(
            !bucket.is_empty(),
            MalformedSnafu {
                arn: s,
                reason: "no bucket name"
            }
        );
        Ok(Self {
            bucket: bucket.to_string(),
            key,
        })
    }
}

/// An IAM role. Only checked for shape; never assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleArn {
    pub account: String,
    pub name: String,
}

impl FromStr for RoleArn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("arn:aws:iam::").context(MalformedSnafu {
            arn: s,
            reason: "expected arn:aws:iam:: prefix",
        })?;
        let (account, resource) = rest.split_once(':').context(MalformedSnafu {
            arn: s,
            reason: "no role assigned",
        })?;
        let name = resource
            .strip_prefix("role/")
            .filter(|name| !name.is_empty())
            .context(MalformedSnafu {
                arn: s,
                reason: "expected role/<name>",
            })?;
        Ok(Self {
            account: account.to_string(),
            name: name.to_string(),
        })
    }
}
