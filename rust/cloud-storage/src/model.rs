use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, encoding};

const BUCKET_NAME_MIN: usize = 3;
const BUCKET_NAME_MAX: usize = 63;

/// A named container of objects.
///
/// Construction never fails; [Bucket::validate] checks the naming rules and is
/// called by every operation before any work is done.
///
/// ```
/// use cloud_storage::Bucket;
///
/// let bucket = Bucket::new("my-bucket");
/// assert!(bucket.validate().is_ok());
/// assert!(Bucket::new("My_Bucket").validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bucket {
    name: String,
}

impl Bucket {
    /// Wrap a bucket name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The bucket name as given
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check the name is 3 to 63 characters of lowercase ASCII letters,
    /// digits, `-`, `_` or `.`.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        let length = self.name.len();
        if !(BUCKET_NAME_MIN..=BUCKET_NAME_MAX).contains(&length) {
            return Err(ErrorKind::InvalidInput(format!(
                "Bucket name must be {BUCKET_NAME_MIN} to {BUCKET_NAME_MAX} characters, got {length}"
            )));
        }

        if let Some(invalid) = self.name.chars().find(|c| {
            !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        }) {
            return Err(ErrorKind::InvalidInput(format!(
                "Bucket name contains invalid character {invalid:?}"
            )));
        }

        Ok(())
    }
}

impl Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<&str> for Bucket {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A named blob inside a [Bucket], identified by a slash-delimited path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object {
    path: String,
}

impl Object {
    /// Wrap an object path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The object path as given
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check the path is non-empty, free of control characters and has no
    /// `.` or `..` segments. URL parsers collapse dot segments, so such a
    /// path would address a different object once encoded.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.path.is_empty() {
            return Err(ErrorKind::InvalidInput(
                "Object path must not be empty".into(),
            ));
        }

        if self.path.chars().any(char::is_control) {
            return Err(ErrorKind::InvalidInput(
                "Object path must not contain control characters".into(),
            ));
        }

        if self
            .path
            .split('/')
            .any(|segment| segment == "." || segment == "..")
        {
            return Err(ErrorKind::InvalidInput(format!(
                "Object path {:?} cannot be normalized to a valid encoded form",
                self.path
            )));
        }

        Ok(())
    }

    /// The path encoded for use inside a URL path, keeping `/` as is
    pub fn encoded_path(&self) -> String {
        encoding::encode_path(&self.path)
    }

    /// The path encoded as a single URL component, so `/` becomes `%2F`
    pub fn encoded_component(&self) -> String {
        encoding::encode_query(&self.path)
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl From<&str> for Object {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// What the holder of a signed URL is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignedAction {
    /// Download the object (`GET`)
    Reading,
    /// Upload the object (`PUT`)
    Writing,
}

impl SignedAction {
    /// The HTTP method a URL for this action is signed with
    pub fn method(&self) -> &'static str {
        match self {
            SignedAction::Reading => "GET",
            SignedAction::Writing => "PUT",
        }
    }
}

impl Display for SignedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.method())
    }
}
