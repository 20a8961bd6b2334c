use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use gatekeeper_engine::policy::csv_records;
use gatekeeper_engine::{Adapter, AdapterError, PolicyRule};

/// CSV policy file (`p, alice, data1, read` per line).
///
/// A missing file reads as an empty policy; `save_policy` creates it.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Adapter for FileAdapter {
    fn driver(&self) -> &str {
        "file"
    }

    async fn load_policy(&self) -> Result<Vec<PolicyRule>, AdapterError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AdapterError::Io(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };

        csv_records(&text)
            .into_iter()
            .filter_map(|(line, record)| {
                PolicyRule::from_csv_line(record).map(|parsed| {
                    parsed.map_err(|e| {
                        AdapterError::Format(format!("{}:{line}: {e}", self.path.display()))
                    })
                })
            })
            .collect()
    }

    async fn save_policy(&self, rules: &[PolicyRule]) -> Result<(), AdapterError> {
        let mut body = String::new();
        for rule in rules {
            body.push_str(&rule.to_csv_line());
            body.push('\n');
        }

        // Write then rename so readers never observe a half-written file.
        let staging = self.staging_path();
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| AdapterError::Io(format!("writing {}: {e}", staging.display())))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| AdapterError::Io(format!("replacing {}: {e}", self.path.display())))?;

        tracing::debug!(path = %self.path.display(), rules = rules.len(), "policy file written");
        Ok(())
    }
}
