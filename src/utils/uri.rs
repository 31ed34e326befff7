//! `scheme://path?key=value&key=value` locators used to pick and configure a
//! storage backend.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::RegistryError;
use crate::Result;
use crate::StorageError;

const SCHEME_SEPARATOR: &str = "://";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageUri {
    scheme: String,
    path: String,
    params: BTreeMap<String, String>,
}

impl StorageUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| RegistryError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = uri
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| invalid("missing `://` after scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme").into());
        }
        if !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_'))
        {
            return Err(invalid("scheme contains illegal characters").into());
        }

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut params = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                return Err(invalid("empty option name").into());
            }
            params.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            path: path.to_string(),
            params,
        })
    }

    /// Scheme part of `uri` without validating the rest.
    pub fn scheme_of(uri: &str) -> Option<&str> {
        uri.split_once(SCHEME_SEPARATOR)
            .map(|(scheme, _)| scheme)
            .filter(|s| !s.is_empty())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path component as a directory; rejects an empty path.
    pub fn dir(&self) -> Result<PathBuf> {
        if self.path.is_empty() {
            return Err(StorageError::InvalidArgument(format!("{self}: backend requires a directory path")).into());
        }
        Ok(PathBuf::from(&self.path))
    }

    pub fn param(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Typed option lookup; missing options yield `default`.
    pub fn param_or<T>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.params.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| {
                StorageError::InvalidArgument(format!("{self}: option `{key}`={raw:?} is invalid: {e}")).into()
            }),
        }
    }

    /// Durability flag shared by all disk backends, `sync=true` unless told otherwise.
    pub fn sync(&self) -> Result<bool> {
        self.param_or("sync", true)
    }
}

impl FromStr for StorageUri {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StorageUri {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SCHEME_SEPARATOR, self.path)?;
        let mut sep = '?';
        for (k, v) in &self.params {
            write!(f, "{sep}{k}={v}")?;
            sep = '&';
        }
        Ok(())
    }
}
