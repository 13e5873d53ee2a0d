//! Google Drive facade and the Drive tool family.
//!
//! OAuth, token refresh and the Drive HTTP client live behind
//! [`DriveFacade`]; this module owns only the tool surface the models see.
//! Deletes are soft: files go to the Drive trash.

mod ops;

use async_trait::async_trait;
use serde::Serialize;

pub use ops::drive_tools;

/// Result alias for facade calls.
pub type DriveResult<T> = std::result::Result<T, DriveError>;

/// Facade-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriveError {
    /// Missing, expired or revoked Drive authorization.
    #[error("drive authorization missing or expired")]
    Unauthorized,

    /// The referenced file or folder does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other Drive API failure.
    #[error("drive api error: {0}")]
    Api(String),
}

/// A Drive file or folder entry.
#[derive(Debug, Clone, Serialize)]
pub struct DriveFile {
    /// Drive id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// MIME type; folders use the Drive folder type.
    pub mime_type: String,
    /// Human-readable path, when the caller asked for paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Per-user Google Drive operations.
///
/// One facade per user, constructed on demand with that user's OAuth token;
/// never shared across users. Every method suspends on network I/O and must
/// be cancel-safe.
#[async_trait]
pub trait DriveFacade: Send + Sync {
    /// Full-text search over the user's files.
    async fn search_files(&self, query: &str, scope: Option<&str>) -> DriveResult<Vec<DriveFile>>;

    /// List the direct children of a folder.
    async fn list_folder(&self, folder_id: &str) -> DriveResult<Vec<DriveFile>>;

    /// Find a folder by exact name.
    async fn find_folder(&self, name: &str) -> DriveResult<Option<DriveFile>>;

    /// Resolve a file's path from the Drive root.
    async fn file_path(&self, file_id: &str) -> DriveResult<String>;

    /// List all files with resolved paths.
    async fn list_files_with_paths(&self) -> DriveResult<Vec<DriveFile>>;

    /// Read a document's text content.
    async fn read_document(&self, file_id: &str) -> DriveResult<String>;

    /// Read a spreadsheet range as rows of cells.
    async fn read_spreadsheet(&self, file_id: &str, range: Option<&str>) -> DriveResult<Vec<Vec<String>>>;

    /// Read a presentation's slide text.
    async fn read_presentation(&self, file_id: &str) -> DriveResult<Vec<String>>;

    /// Replace a document's content.
    async fn edit_document(&self, file_id: &str, content: &str) -> DriveResult<()>;

    /// Write values into a spreadsheet range.
    async fn edit_spreadsheet(&self, file_id: &str, range: &str, values: Vec<Vec<String>>) -> DriveResult<()>;

    /// Create a document, optionally inside a folder.
    async fn create_document(&self, title: &str, content: &str, folder_id: Option<&str>) -> DriveResult<DriveFile>;

    /// Create an empty spreadsheet.
    async fn create_spreadsheet(&self, title: &str, folder_id: Option<&str>) -> DriveResult<DriveFile>;

    /// Create an empty presentation.
    async fn create_presentation(&self, title: &str, folder_id: Option<&str>) -> DriveResult<DriveFile>;

    /// Append a slide to a presentation.
    async fn add_slide(&self, file_id: &str, title: &str, body: &str) -> DriveResult<()>;

    /// Copy a file, optionally renaming it or placing it in a folder.
    async fn copy_file(
        &self,
        file_id: &str,
        target_folder_id: Option<&str>,
        new_name: Option<&str>,
    ) -> DriveResult<DriveFile>;

    /// Move a file into a folder.
    async fn move_file(&self, file_id: &str, target_folder_id: &str) -> DriveResult<()>;

    /// Move a file to the trash. Recoverable from the Drive UI.
    async fn trash_file(&self, file_id: &str) -> DriveResult<()>;
}
