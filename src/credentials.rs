use crate::error::Error;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

/// One row of the external keys table. An empty `client_id` means the
/// account has no Performance API access and must be skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
}

pub trait CredentialSource: Send + Sync + 'static {
    /// Returns the ordered list of account credentials for this run.
    fn load(&self) -> Result<Vec<Credential>, Error>;
}

pub struct JsonCredentialSource {
    path: PathBuf,
}

impl JsonCredentialSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonCredentialSource { path: path.into() }
    }
}

impl CredentialSource for JsonCredentialSource {
    fn load(&self) -> Result<Vec<Credential>, Error> {
        let file = File::open(&self.path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_preserves_order_and_empty_client_ids() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys.json");
        fs::write(
            &path,
            r#"[
                {"account_id": "7", "client_id": "7-abc@advertising.performance.ozon.ru", "client_secret": "s1"},
                {"account_id": "9", "client_id": "", "client_secret": ""}
            ]"#,
        )
        .unwrap();

        let credentials = JsonCredentialSource::new(&path).load().unwrap();
        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials[0].account_id, "7");
        assert!(credentials[1].client_id.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = JsonCredentialSource::new(temp_dir.path().join("absent.json")).load();
        assert!(matches!(result.unwrap_err(), Error::Io(_)));
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys.json");
        fs::write(&path, "not json").unwrap();
        let result = JsonCredentialSource::new(&path).load();
        assert!(matches!(result.unwrap_err(), Error::Json(_)));
    }
}
