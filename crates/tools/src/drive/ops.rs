//! The Drive tool family.
//!
//! One handler drives all operations; each tool descriptor binds a schema to
//! one [`DriveOp`]. Write operations go through the approval workflow when
//! the calling context requires it.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::{Span, Timestamp};
use llm::messages::ToolCapability;
use serde::Deserialize;
use serde_json::{Value, json};
use storage::{ApprovalRecord, ApprovalStatus};

use super::{DriveError, DriveFacade};
use crate::{SchemaBuilder, ToolDescriptor, ToolError, ToolHandler, UserContext};

#[derive(Debug, Clone, Copy)]
enum DriveOp {
    SearchFiles,
    ListFolder,
    FindFolderByName,
    GetFilePath,
    ListFilesWithPaths,
    ReadDocument,
    ReadSpreadsheet,
    ReadPresentation,
    EditDocument,
    EditSpreadsheet,
    CreateDocument,
    CreateSpreadsheet,
    CreatePresentation,
    AddSlide,
    CopyFile,
    MoveFile,
    DeleteFile,
}

struct DriveToolHandler {
    op: DriveOp,
}

fn facade_error(error: DriveError) -> ToolError {
    match error {
        DriveError::Unauthorized => ToolError::Unauthorized("drive authorization missing or expired".into()),
        other => ToolError::HandlerError(other.to_string()),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::ArgumentInvalid(e.to_string()))
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    scope: Option<String>,
}

#[derive(Deserialize)]
struct FolderArgs {
    folder_id: String,
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Deserialize)]
struct FileArgs {
    file_id: String,
}

#[derive(Deserialize)]
struct ReadSheetArgs {
    file_id: String,
    range: Option<String>,
}

#[derive(Deserialize)]
struct EditDocArgs {
    file_id: String,
    content: String,
    reasoning: Option<String>,
    confidence: Option<f64>,
}

#[derive(Deserialize)]
struct EditSheetArgs {
    file_id: String,
    range: String,
    values: Vec<Vec<String>>,
    reasoning: Option<String>,
    confidence: Option<f64>,
}

#[derive(Deserialize)]
struct CreateDocArgs {
    title: String,
    content: String,
    folder_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateArgs {
    title: String,
    folder_id: Option<String>,
}

#[derive(Deserialize)]
struct AddSlideArgs {
    file_id: String,
    title: String,
    body: String,
}

#[derive(Deserialize)]
struct CopyArgs {
    file_id: String,
    target_folder_id: Option<String>,
    new_name: Option<String>,
}

#[derive(Deserialize)]
struct MoveArgs {
    file_id: String,
    target_folder_id: String,
}

/// Queue a proposed edit for user review instead of applying it.
async fn submit_for_approval(
    ctx: &UserContext,
    file_id: String,
    original_content: String,
    proposed_content: String,
    reasoning: Option<String>,
    confidence: Option<f64>,
) -> Result<Value, ToolError> {
    let Some(sink) = &ctx.approvals else {
        return Err(ToolError::HandlerError("approval workflow active but no sink wired".into()));
    };

    let now = Timestamp::now();
    let ttl = Span::new().seconds(ctx.approval_ttl.as_secs().min(i64::MAX as u64) as i64);
    let expires_at = now
        .checked_add(ttl)
        .map_err(|e| ToolError::HandlerError(format!("approval expiry out of range: {e}")))?;

    let record = ApprovalRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: ctx.user_id,
        file_id,
        original_content,
        proposed_content,
        ai_reasoning: reasoning.unwrap_or_default(),
        confidence: confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        status: ApprovalStatus::Pending,
        created_at: now,
        expires_at,
    };

    let id = record.id.clone();
    sink.submit(record).await?;

    Ok(json!({
        "status": "pending_approval",
        "approval_id": id,
        "expires_at": expires_at.to_string(),
        "message": "The edit was queued for user approval and will be applied once approved."
    }))
}

#[async_trait]
impl ToolHandler for DriveToolHandler {
    async fn run(&self, ctx: &UserContext, args: Value) -> Result<Value, ToolError> {
        let drive = ctx
            .drive
            .as_ref()
            .ok_or_else(|| ToolError::Unauthorized("Google Drive is not connected for this user".into()))?;

        match self.op {
            DriveOp::SearchFiles => {
                let args: SearchArgs = parse(args)?;
                let files = drive
                    .search_files(&args.query, args.scope.as_deref())
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"files": files}))
            }
            DriveOp::ListFolder => {
                let args: FolderArgs = parse(args)?;
                let files = drive.list_folder(&args.folder_id).await.map_err(facade_error)?;
                Ok(json!({"files": files}))
            }
            DriveOp::FindFolderByName => {
                let args: NameArgs = parse(args)?;
                let folder = drive.find_folder(&args.name).await.map_err(facade_error)?;
                Ok(json!({"folder": folder}))
            }
            DriveOp::GetFilePath => {
                let args: FileArgs = parse(args)?;
                let path = drive.file_path(&args.file_id).await.map_err(facade_error)?;
                Ok(json!({"path": path}))
            }
            DriveOp::ListFilesWithPaths => {
                let files = drive.list_files_with_paths().await.map_err(facade_error)?;
                Ok(json!({"files": files}))
            }
            DriveOp::ReadDocument => {
                let args: FileArgs = parse(args)?;
                let content = drive.read_document(&args.file_id).await.map_err(facade_error)?;
                Ok(json!({"content": content}))
            }
            DriveOp::ReadSpreadsheet => {
                let args: ReadSheetArgs = parse(args)?;
                let rows = drive
                    .read_spreadsheet(&args.file_id, args.range.as_deref())
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"rows": rows}))
            }
            DriveOp::ReadPresentation => {
                let args: FileArgs = parse(args)?;
                let slides = drive.read_presentation(&args.file_id).await.map_err(facade_error)?;
                Ok(json!({"slides": slides}))
            }
            DriveOp::EditDocument => {
                let args: EditDocArgs = parse(args)?;

                if ctx.require_approval {
                    let original = drive.read_document(&args.file_id).await.map_err(facade_error)?;
                    return submit_for_approval(
                        ctx,
                        args.file_id,
                        original,
                        args.content,
                        args.reasoning,
                        args.confidence,
                    )
                    .await;
                }

                drive
                    .edit_document(&args.file_id, &args.content)
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"status": "applied", "file_id": args.file_id}))
            }
            DriveOp::EditSpreadsheet => {
                let args: EditSheetArgs = parse(args)?;

                if ctx.require_approval {
                    let original = drive
                        .read_spreadsheet(&args.file_id, Some(&args.range))
                        .await
                        .map_err(facade_error)?;

                    let original_content = serde_json::to_string(&original)
                        .map_err(|e| ToolError::HandlerError(e.to_string()))?;
                    let proposed_content = serde_json::to_string(&args.values)
                        .map_err(|e| ToolError::HandlerError(e.to_string()))?;

                    return submit_for_approval(
                        ctx,
                        args.file_id,
                        original_content,
                        proposed_content,
                        args.reasoning,
                        args.confidence,
                    )
                    .await;
                }

                drive
                    .edit_spreadsheet(&args.file_id, &args.range, args.values)
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"status": "applied", "file_id": args.file_id}))
            }
            DriveOp::CreateDocument => {
                let args: CreateDocArgs = parse(args)?;
                let file = drive
                    .create_document(&args.title, &args.content, args.folder_id.as_deref())
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"file": file}))
            }
            DriveOp::CreateSpreadsheet => {
                let args: CreateArgs = parse(args)?;
                let file = drive
                    .create_spreadsheet(&args.title, args.folder_id.as_deref())
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"file": file}))
            }
            DriveOp::CreatePresentation => {
                let args: CreateArgs = parse(args)?;
                let file = drive
                    .create_presentation(&args.title, args.folder_id.as_deref())
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"file": file}))
            }
            DriveOp::AddSlide => {
                let args: AddSlideArgs = parse(args)?;
                drive
                    .add_slide(&args.file_id, &args.title, &args.body)
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"status": "added", "file_id": args.file_id}))
            }
            DriveOp::CopyFile => {
                let args: CopyArgs = parse(args)?;
                let file = drive
                    .copy_file(&args.file_id, args.target_folder_id.as_deref(), args.new_name.as_deref())
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"file": file}))
            }
            DriveOp::MoveFile => {
                let args: MoveArgs = parse(args)?;
                drive
                    .move_file(&args.file_id, &args.target_folder_id)
                    .await
                    .map_err(facade_error)?;
                Ok(json!({"status": "moved", "file_id": args.file_id}))
            }
            DriveOp::DeleteFile => {
                let args: FileArgs = parse(args)?;
                drive.trash_file(&args.file_id).await.map_err(facade_error)?;
                Ok(json!({"status": "trashed", "file_id": args.file_id}))
            }
        }
    }
}

fn descriptor(name: &str, description: &str, schema: Value, op: DriveOp) -> ToolDescriptor {
    // Schemas below are built with SchemaBuilder and always satisfy the
    // strict subset, so construction cannot fail.
    ToolDescriptor::new(
        name,
        description,
        schema,
        ToolCapability::Function,
        Arc::new(DriveToolHandler { op }),
    )
    .expect("drive tool schema is valid")
}

/// All Drive tools, in a stable order.
pub fn drive_tools() -> Vec<ToolDescriptor> {
    vec![
        descriptor(
            "search_drive_files",
            "Search the user's Google Drive files by name or content.",
            SchemaBuilder::new()
                .string("query", "Search query matched against file names and content")
                .nullable_string_enum(
                    "scope",
                    "Restrict results to one document type, or null for all types",
                    &["documents", "spreadsheets", "presentations", "folders"],
                )
                .build(),
            DriveOp::SearchFiles,
        ),
        descriptor(
            "list_drive_folder",
            "List the files directly inside a Drive folder.",
            SchemaBuilder::new()
                .string("folder_id", "Drive id of the folder to list")
                .build(),
            DriveOp::ListFolder,
        ),
        descriptor(
            "find_folder_by_name",
            "Find a Drive folder by its exact name.",
            SchemaBuilder::new().string("name", "Folder name to look for").build(),
            DriveOp::FindFolderByName,
        ),
        descriptor(
            "get_file_path",
            "Resolve the full path of a Drive file from the root folder.",
            SchemaBuilder::new().string("file_id", "Drive id of the file").build(),
            DriveOp::GetFilePath,
        ),
        descriptor(
            "list_files_with_paths",
            "List all of the user's Drive files with their full paths.",
            SchemaBuilder::new().build(),
            DriveOp::ListFilesWithPaths,
        ),
        descriptor(
            "read_document",
            "Read the text content of a Google Doc.",
            SchemaBuilder::new().string("file_id", "Drive id of the document").build(),
            DriveOp::ReadDocument,
        ),
        descriptor(
            "read_spreadsheet",
            "Read cell values from a Google Sheet.",
            SchemaBuilder::new()
                .string("file_id", "Drive id of the spreadsheet")
                .nullable_string("range", "A1-notation range, or null for the whole first sheet")
                .build(),
            DriveOp::ReadSpreadsheet,
        ),
        descriptor(
            "read_presentation",
            "Read the slide text of a Google Slides presentation.",
            SchemaBuilder::new()
                .string("file_id", "Drive id of the presentation")
                .build(),
            DriveOp::ReadPresentation,
        ),
        descriptor(
            "edit_document",
            "Replace the content of a Google Doc. May require user approval.",
            SchemaBuilder::new()
                .string("file_id", "Drive id of the document")
                .string("content", "New document content")
                .nullable_string("reasoning", "Why this edit is being made, shown to the user")
                .nullable_number("confidence", "Confidence in the edit between 0 and 1, or null")
                .build(),
            DriveOp::EditDocument,
        ),
        descriptor(
            "edit_spreadsheet",
            "Write cell values into a Google Sheet range. May require user approval.",
            SchemaBuilder::new()
                .string("file_id", "Drive id of the spreadsheet")
                .string("range", "A1-notation range to write")
                .string_grid("values", "Rows of cell values to write")
                .nullable_string("reasoning", "Why this edit is being made, shown to the user")
                .nullable_number("confidence", "Confidence in the edit between 0 and 1, or null")
                .build(),
            DriveOp::EditSpreadsheet,
        ),
        descriptor(
            "create_document",
            "Create a new Google Doc.",
            SchemaBuilder::new()
                .string("title", "Document title")
                .string("content", "Initial document content")
                .nullable_string("folder_id", "Target folder id, or null for the Drive root")
                .build(),
            DriveOp::CreateDocument,
        ),
        descriptor(
            "create_spreadsheet",
            "Create a new empty Google Sheet.",
            SchemaBuilder::new()
                .string("title", "Spreadsheet title")
                .nullable_string("folder_id", "Target folder id, or null for the Drive root")
                .build(),
            DriveOp::CreateSpreadsheet,
        ),
        descriptor(
            "create_presentation",
            "Create a new empty Google Slides presentation.",
            SchemaBuilder::new()
                .string("title", "Presentation title")
                .nullable_string("folder_id", "Target folder id, or null for the Drive root")
                .build(),
            DriveOp::CreatePresentation,
        ),
        descriptor(
            "add_slide",
            "Append a slide to a Google Slides presentation.",
            SchemaBuilder::new()
                .string("file_id", "Drive id of the presentation")
                .string("title", "Slide title")
                .string("body", "Slide body text")
                .build(),
            DriveOp::AddSlide,
        ),
        descriptor(
            "copy_file",
            "Copy a Drive file, optionally into a folder or under a new name.",
            SchemaBuilder::new()
                .string("file_id", "Drive id of the file to copy")
                .nullable_string("target_folder_id", "Destination folder id, or null to copy in place")
                .nullable_string("new_name", "Name for the copy, or null to keep the original name")
                .build(),
            DriveOp::CopyFile,
        ),
        descriptor(
            "move_file",
            "Move a Drive file into a folder.",
            SchemaBuilder::new()
                .string("file_id", "Drive id of the file to move")
                .string("target_folder_id", "Destination folder id")
                .build(),
            DriveOp::MoveFile,
        ),
        descriptor(
            "delete_file",
            "Move a Drive file to the trash. The user can restore it from Drive.",
            SchemaBuilder::new().string("file_id", "Drive id of the file to trash").build(),
            DriveOp::DeleteFile,
        ),
    ]
}
