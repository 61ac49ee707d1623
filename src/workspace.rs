use crate::tokenizer::{BodyCapture, HeaderField};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const PARSED_FILE: &str = "parsed";
const BASE64_FILE: &str = "base64";
const DECODED_FILE: &str = "text64";

/// Scratch directory holding the parse file and the captured body.
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Start from an empty directory, removing leftovers from earlier runs.
    pub fn prepare<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if root.exists() {
            std::fs::remove_dir_all(&root)
                .with_context(|| format!("Failed to clear work directory: {}", root.display()))?;
        }
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create work directory: {}", root.display()))?;
        log::debug!("Work directory ready: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write_parsed(&self, fields: &[HeaderField]) -> Result<PathBuf> {
        let mut content = format!(
            "----- Parse file for header-scan v{} -----\n",
            env!("CARGO_PKG_VERSION")
        );
        for field in fields {
            content.push_str(&field.line());
            content.push('\n');
        }
        self.write(PARSED_FILE, content.as_bytes())
    }

    /// Writes the raw capture, and the decoded body when one was present.
    pub fn write_body(&self, body: &BodyCapture) -> Result<Option<PathBuf>> {
        self.write(BASE64_FILE, body.blob.as_bytes())?;
        if !body.base64_present {
            return Ok(None);
        }
        self.write(DECODED_FILE, &body.decode()).map(Some)
    }

    fn write(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
