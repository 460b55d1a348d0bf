//! Represents a single listing entry (file or folder marker) of a bucket.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

/// Coarse grouping of a file by its extension.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Category {
    Images,
    Documents,
    Videos,
    Audio,
    Archives,
    Folders,
    Others,
}

const IMAGE_TYPES: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico"];
const DOCUMENT_TYPES: [&str; 12] = [
    "pdf", "doc", "docx", "txt", "rtf", "odt", "xls", "xlsx", "ppt", "pptx", "ods", "odp",
];
const VIDEO_TYPES: [&str; 7] = ["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv"];
const AUDIO_TYPES: [&str; 6] = ["mp3", "wav", "flac", "aac", "ogg", "wma"];
const ARCHIVE_TYPES: [&str; 5] = ["zip", "rar", "7z", "tar", "gz"];

impl Category {
    /// Map a lower-cased extension to its category. An empty extension is
    /// treated as a folder marker.
    pub fn from_file_type(file_type: &str) -> Self {
        if file_type.is_empty() {
            Category::Folders
        } else if IMAGE_TYPES.contains(&file_type) {
            Category::Images
        } else if DOCUMENT_TYPES.contains(&file_type) {
            Category::Documents
        } else if VIDEO_TYPES.contains(&file_type) {
            Category::Videos
        } else if AUDIO_TYPES.contains(&file_type) {
            Category::Audio
        } else if ARCHIVE_TYPES.contains(&file_type) {
            Category::Archives
        } else {
            Category::Others
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Images => "images",
            Category::Documents => "documents",
            Category::Videos => "videos",
            Category::Audio => "audio",
            Category::Archives => "archives",
            Category::Folders => "folders",
            Category::Others => "others",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "images" => Ok(Category::Images),
            "documents" => Ok(Category::Documents),
            "videos" => Ok(Category::Videos),
            "audio" => Ok(Category::Audio),
            "archives" => Ok(Category::Archives),
            "folders" => Ok(Category::Folders),
            "others" => Ok(Category::Others),
            other => Err(format!("unknown category `{}`", other)),
        }
    }
}

/// Lower-cased text after the last `.` of a key, or empty when there is none.
pub fn file_type_of(key: &str) -> String {
    key.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// A file record built from one `Contents` block, not yet stored.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NewFile {
    /// One value per child tag of the owning bucket, empty when the block
    /// lacked that tag.
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,

    /// `bucket_url + Key`, unencoded.
    pub url: String,

    pub file_type: String,

    pub category: Option<Category>,
}

impl NewFile {
    /// Project an extracted `Contents` map onto `child_tags` and derive the
    /// URL, type and category from its `Key`.
    pub fn from_contents(
        contents: &BTreeMap<String, String>,
        child_tags: &[String],
        bucket_url: &str,
    ) -> Self {
        let fields: BTreeMap<String, String> = child_tags
            .iter()
            .map(|tag| (tag.clone(), contents.get(tag).cloned().unwrap_or_default()))
            .collect();

        let key = fields.get("Key").map(String::as_str).unwrap_or("");
        let url = format!("{}{}", bucket_url, key);
        let (file_type, category) = if key.is_empty() {
            (String::new(), None)
        } else {
            let file_type = file_type_of(key);
            let category = Category::from_file_type(&file_type);
            (file_type, Some(category))
        };

        Self {
            fields,
            url,
            file_type,
            category,
        }
    }

    pub fn key(&self) -> &str {
        self.fields.get("Key").map(String::as_str).unwrap_or("")
    }
}

/// A stored file row.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    #[serde(skip)]
    pub id: i64,

    pub bucket_id: Uuid,

    #[serde(flatten)]
    #[sqlx(json)]
    pub fields: BTreeMap<String, String>,

    pub url: String,

    pub file_type: String,

    pub category: Option<Category>,
}

/// Sort keys offered by [`FileQuery`].
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileSort {
    #[default]
    Name,
    Size,
    Modified,
    Type,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter and ordering applied when reading a bucket's files back.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct FileQuery {
    pub category: Option<Category>,
    /// Case-insensitive substring matched against `Key`.
    pub search: Option<String>,
    #[serde(default)]
    pub sort: FileSort,
    #[serde(default)]
    pub order: SortOrder,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
