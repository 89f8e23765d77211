//! File attachments: images are read and base64-encoded for inline display; other
//! files are echoed by name only and never read.

use anyhow::{Context, Result};
use base64::Engine;
use std::path::Path;

/// An attachment ready to be shown in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Image {
        name: String,
        mime: &'static str,
        /// Base64 payload without any `data:` prefix.
        data: String,
    },
    File {
        name: String,
    },
}

/// MIME type for image extensions we render inline; `None` for anything else.
pub fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Attachment {
    /// Load an attachment from disk. Only image files are read.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = display_name(path);
        match image_mime(path) {
            Some(mime) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading image {}", path.display()))?;
                Ok(Self::from_image_bytes(name, mime, &bytes))
            }
            None => Ok(Attachment::File { name }),
        }
    }

    pub fn from_image_bytes(name: impl Into<String>, mime: &'static str, bytes: &[u8]) -> Self {
        Attachment::Image {
            name: name.into(),
            mime,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Attachment::Image { name, .. } | Attachment::File { name } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn image_extensions_are_case_insensitive() {
        assert_eq!(image_mime(Path::new("cat.PNG")), Some("image/png"));
        assert_eq!(image_mime(Path::new("a/b/photo.jpeg")), Some("image/jpeg"));
        assert_eq!(image_mime(Path::new("notes.txt")), None);
        assert_eq!(image_mime(Path::new("Makefile")), None);
    }

    #[test]
    fn non_image_is_not_read() {
        let a = Attachment::from_path(Path::new("/definitely/missing/report.pdf")).unwrap();
        assert_eq!(a, Attachment::File { name: "report.pdf".into() });
    }

    #[test]
    fn missing_image_is_an_error() {
        assert!(Attachment::from_path(Path::new("/definitely/missing/cat.png")).is_err());
    }

    #[test]
    fn image_is_base64_encoded() {
        let path: PathBuf =
            std::env::temp_dir().join(format!("joshua-upload-test-{}.gif", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"GIF89a").unwrap();
        let a = Attachment::from_path(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let Attachment::Image { mime, data, .. } = a else {
            panic!("expected image");
        };
        assert_eq!(mime, "image/gif");
        assert_eq!(data, "R0lGODlh");
    }
}
