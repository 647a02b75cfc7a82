use serde::{Deserialize, Serialize};

/// Success body for `POST /api/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUploadResponse {
    pub message: String,
    pub filename: String,
}

/// Success body for `POST /api/upload_content`.
///
/// `filename` is the server-assigned storage handle the client must echo
/// back when processing; `original_name` is the display name the user
/// uploaded under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentUploadResponse {
    pub filename: String,
    pub original_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub model_filename: String,
    pub content_filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub download_url: String,
}
