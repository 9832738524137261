//! SSH key pair references used to inject login access at launch.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::errors::LifecycleError;

/// Reference to an existing SSH key pair on disk.
///
/// The key material itself is never generated here; callers point at keys
/// they already manage. A key pair is associated with one backend session at
/// a time and its public half is injected into instances at launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Name used to reference the key on the backend.
    pub name: String,
    /// Path to the public key file.
    pub public_key_path: Utf8PathBuf,
    /// Path to the matching private key, when available locally.
    pub private_key_path: Option<Utf8PathBuf>,
}

impl KeyPair {
    /// Creates a key pair reference.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        public_key_path: impl Into<Utf8PathBuf>,
        private_key_path: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            public_key_path: public_key_path.into(),
            private_key_path,
        }
    }

    /// Reads the public key material for upload to a backend.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] when the file cannot be read or
    /// contains only whitespace.
    pub fn public_key_content(&self) -> Result<String, LifecycleError> {
        let content = read_to_string_ambient(&self.public_key_path).map_err(|message| {
            LifecycleError::Config(format!(
                "failed to read public key `{}`: {message}",
                self.public_key_path
            ))
        })?;

        if content.trim().is_empty() {
            return Err(LifecycleError::Config(format!(
                "public key `{}` is empty",
                self.public_key_path
            )));
        }

        Ok(content)
    }
}

/// Reads a file through a capability-scoped handle on its parent directory.
pub(crate) fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir_path, file_path) = if path.is_absolute() {
        let parent = path
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path}"))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use camino::Utf8PathBuf;

    use super::KeyPair;
    use crate::errors::LifecycleError;

    fn write_key(dir: &tempfile::TempDir, name: &str, content: &str) -> Utf8PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create key file");
        file.write_all(content.as_bytes()).expect("write key file");
        Utf8PathBuf::from_path_buf(path).expect("utf-8 temp path")
    }

    #[test]
    fn public_key_content_reads_the_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = write_key(&dir, "id_rsa.pub", "ssh-rsa AAAA test@host\n");

        let key = KeyPair::new("test-key", path, None);
        assert_eq!(
            key.public_key_content().expect("read key"),
            "ssh-rsa AAAA test@host\n"
        );
    }

    #[test]
    fn empty_public_key_is_a_config_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = write_key(&dir, "id_rsa.pub", "  \n");

        let key = KeyPair::new("test-key", path, None);
        assert!(matches!(
            key.public_key_content(),
            Err(LifecycleError::Config(_))
        ));
    }

    #[test]
    fn missing_public_key_is_a_config_error() {
        let key = KeyPair::new(
            "test-key",
            Utf8PathBuf::from("/nonexistent/cloudlab/id_rsa.pub"),
            None,
        );
        assert!(matches!(
            key.public_key_content(),
            Err(LifecycleError::Config(_))
        ));
    }
}
