use std::path::Path;

use crate::ports::file_system::{FileSystem, FileSystemError, FileSystemResult, OpenedFile};

/// File system adapter backed by `tokio::fs`
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for FileSystemAdapter {
    async fn is_file(&self, path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.is_file(),
            Err(_) => false,
        }
    }

    async fn open(&self, path: &Path) -> FileSystemResult<OpenedFile> {
        let file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;

        // Checked on the open handle so a swap between resolve and open is caught
        if !metadata.is_file() {
            return Err(FileSystemError::NotAFile(path.display().to_string()));
        }

        Ok(OpenedFile {
            size: metadata.len(),
            modified: metadata.modified()?,
            reader: Box::new(file),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    use super::*;

    async fn create_test_file(dir: &TempDir, path: &str, content: &str) -> std::io::Result<()> {
        let full_path = dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full_path, content).await
    }

    #[tokio::test]
    async fn test_is_file() {
        let temp_dir = TempDir::new().unwrap();
        let fs = FileSystemAdapter::new();

        create_test_file(&temp_dir, "sub/test.txt", "content")
            .await
            .unwrap();

        assert!(fs.is_file(&temp_dir.path().join("sub/test.txt")).await);
        assert!(!fs.is_file(&temp_dir.path().join("sub")).await);
        assert!(!fs.is_file(&temp_dir.path().join("nonexistent.txt")).await);
    }

    #[tokio::test]
    async fn test_open_reads_metadata_and_content() {
        let temp_dir = TempDir::new().unwrap();
        let fs = FileSystemAdapter::new();
        let content = "Hello, world!";

        create_test_file(&temp_dir, "test.txt", content)
            .await
            .unwrap();

        let mut opened = fs.open(&temp_dir.path().join("test.txt")).await.unwrap();
        assert_eq!(opened.size, content.len() as u64);

        let mut read = String::new();
        opened.reader.read_to_string(&mut read).await.unwrap();
        assert_eq!(read, content);
    }

    #[tokio::test]
    async fn test_open_errors() {
        let temp_dir = TempDir::new().unwrap();
        let fs = FileSystemAdapter::new();

        let missing = fs.open(&temp_dir.path().join("missing.txt")).await;
        assert!(matches!(missing, Err(FileSystemError::IoError(_))));

        let dir = fs.open(temp_dir.path()).await;
        assert!(matches!(dir, Err(FileSystemError::NotAFile(_))));
    }
}
