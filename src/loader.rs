//! Loading templates from the filesystem via [`Environment::set_loader`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Safely joins two paths, rejecting any segment that could escape `base`
/// (a leading dot, or a path separator smuggled in as `\\` on a platform
/// whose real separator is `/`).
pub fn safe_join(base: &Path, template: &str) -> Option<PathBuf> {
    let mut rv = base.to_path_buf();
    for segment in template.split('/') {
        if segment.starts_with('.') || segment.contains('\\') {
            return None;
        }
        rv.push(segment);
    }
    Some(rv)
}

/// Helper to load templates from a given directory.
///
/// This creates a dynamic loader which looks up templates in the given
/// directory.  Templates that start with a dot (`.`) or are contained in a
/// folder starting with a dot cannot be loaded.
///
/// ```rust
/// # use jinja_engine::{Environment, path_loader};
/// let mut env = Environment::new();
/// env.set_loader(path_loader("path/to/templates"));
/// ```
pub fn path_loader<P: AsRef<Path>>(
    dir: P,
) -> impl Fn(&str) -> Result<Option<String>, Error> + Send + Sync + 'static {
    let dir = dir.as_ref().to_path_buf();
    move |name| {
        let path = match safe_join(&dir, name) {
            Some(path) => path,
            None => return Ok(None),
        };
        match fs::read_to_string(path) {
            Ok(result) => Ok(Some(result)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(Error::new(ErrorKind::TemplateError, "could not read template").with_source(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_safe_join() {
        assert_eq!(
            safe_join(Path::new("foo"), "bar/baz"),
            Some(PathBuf::from("foo").join("bar").join("baz"))
        );
        assert_eq!(safe_join(Path::new("foo"), ".bar/baz"), None);
        assert_eq!(safe_join(Path::new("foo"), "bar/.baz"), None);
    }

    #[test]
    fn test_path_loader_missing_returns_none() {
        let loader = path_loader(std::env::temp_dir());
        assert_eq!(loader("definitely-not-here.txt").unwrap(), None);
    }
}
