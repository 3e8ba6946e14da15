use serde::{Deserialize, Serialize};

/// A rendered preview frame, identified by the image file the previewer
/// process wrote it to.
///
/// The supervisor replaces this value wholesale on every frame; it is never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewData {
    pub image_file_name: String,
}

impl PreviewData {
    pub fn new(image_file_name: impl Into<String>) -> Self {
        Self {
            image_file_name: image_file_name.into(),
        }
    }
}
