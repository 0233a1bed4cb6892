//! Locator parsing for the two storage schemes the pipeline understands.
//!
//! `file:///path` denotes a local path; `s3://bucket/key` denotes a remote
//! object, where the host is the bucket and the path is the key with leading
//! slashes stripped. Percent-escapes in the path are preserved verbatim.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// A parsed storage locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A path on the local filesystem.
    File(PathBuf),
    /// An object in the remote store.
    Remote {
        /// Bucket name (the URL host).
        bucket: String,
        /// Object key (the URL path, leading slashes stripped).
        key: String,
    },
}

impl Location {
    /// Parses a `file://` or `s3://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for any other scheme or a remote URL
    /// without a bucket.
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| Error::InvalidInput(format!("invalid url: {raw}")))?;

        match scheme {
            "file" => {
                if rest.is_empty() {
                    return Err(Error::InvalidInput(format!("invalid url: {raw}")));
                }
                Ok(Self::File(PathBuf::from(rest)))
            }
            "s3" => {
                let (bucket, path) = match rest.split_once('/') {
                    Some((bucket, path)) => (bucket, path),
                    None => (rest, ""),
                };
                if bucket.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "invalid url, missing bucket: {raw}"
                    )));
                }
                let key = path.trim_start_matches('/');
                if key.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "invalid url, missing key: {raw}"
                    )));
                }
                Ok(Self::Remote {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            other => Err(Error::InvalidInput(format!("invalid url scheme: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_url() {
        let loc = Location::parse("file:///tmp/inventory.json").unwrap();
        assert_eq!(loc, Location::File(PathBuf::from("/tmp/inventory.json")));
    }

    #[test]
    fn parses_remote_url() {
        let loc = Location::parse("s3://my-bucket/some/key.json").unwrap();
        assert_eq!(
            loc,
            Location::Remote {
                bucket: "my-bucket".to_string(),
                key: "some/key.json".to_string(),
            }
        );
    }

    #[test]
    fn strips_extra_leading_slashes_from_key() {
        let loc = Location::parse("s3://b//doubled/key").unwrap();
        assert_eq!(
            loc,
            Location::Remote {
                bucket: "b".to_string(),
                key: "doubled/key".to_string(),
            }
        );
    }

    #[test]
    fn preserves_percent_escapes() {
        let loc = Location::parse("s3://b/a%20key").unwrap();
        assert_eq!(
            loc,
            Location::Remote {
                bucket: "b".to_string(),
                key: "a%20key".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Location::parse("gs://bucket/key").is_err());
        assert!(Location::parse("no-scheme-at-all").is_err());
        assert!(Location::parse("s3://").is_err());
        assert!(Location::parse("s3://bucket-only").is_err());
    }
}
