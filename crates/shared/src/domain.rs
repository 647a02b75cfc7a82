/// File extension accepted for both model and content uploads.
pub const DOCUMENT_EXTENSION: &str = ".docx";

pub fn has_document_extension(filename: &str) -> bool {
    filename.len() > DOCUMENT_EXTENSION.len()
        && filename
            .to_ascii_lowercase()
            .ends_with(DOCUMENT_EXTENSION)
}
