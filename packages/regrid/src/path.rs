//! Virtual file paths inside a bucket.

use std::fmt;

/// Errors related to file path parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The path has no components.
    #[error("path '{path}' names no file")]
    Empty { path: String },

    /// A component is not allowed.
    #[error("invalid path component '{component}' at position {position}: {message}")]
    InvalidComponent {
        component: String,
        position: usize,
        message: String,
    },
}

/// A validated, normalized virtual path such as `/files/big.gz`.
///
/// Components are separated by `/`. Empty components are ignored, so
/// `//files/big.gz/` and `files/big.gz` both normalize to `/files/big.gz`.
/// The last component is the file's base name; everything before it is the
/// directory the prefix index groups the file under.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FilePath {
    components: Vec<String>,
}

impl FilePath {
    /// Parse a path string, validating components.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use regrid::FilePath;
    ///
    /// let path = FilePath::parse("/files/2024/big.gz").unwrap();
    /// assert_eq!(path.directory(), ["files", "2024"]);
    /// assert_eq!(path.base_name(), "big.gz");
    /// assert_eq!(path.to_string(), "/files/2024/big.gz");
    /// ```
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let components: Vec<String> = s
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string())
            .collect();

        if components.is_empty() {
            return Err(PathError::Empty {
                path: s.to_string(),
            });
        }

        for (i, component) in components.iter().enumerate() {
            Self::validate_component(component, i)?;
        }

        Ok(FilePath { components })
    }

    fn validate_component(component: &str, position: usize) -> Result<(), PathError> {
        let message = if component == "." || component == ".." {
            "relative components are not allowed"
        } else if component.chars().any(char::is_control) {
            "control characters are not allowed"
        } else {
            return Ok(());
        };

        Err(PathError::InvalidComponent {
            component: component.to_string(),
            position,
            message: message.to_string(),
        })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Directory components, i.e. everything but the base name.
    pub fn directory(&self) -> &[String] {
        &self.components[..self.components.len() - 1]
    }

    pub fn base_name(&self) -> &str {
        &self.components[self.components.len() - 1]
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.components.join("/"))
    }
}

impl std::str::FromStr for FilePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilePath::parse(s)
    }
}
