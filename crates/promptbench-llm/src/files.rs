use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use crate::error::{AdapterError, AdapterErrorCode};
use crate::types::{FilePayload, FileReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Pdf,
    Text,
    Other,
}

impl FileKind {
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime.starts_with("image/") {
            return FileKind::Image;
        }
        if mime == "application/pdf" {
            return FileKind::Pdf;
        }
        let textual = mime.starts_with("text/")
            || matches!(
                mime.as_str(),
                "application/json"
                    | "application/xml"
                    | "application/yaml"
                    | "application/x-yaml"
                    | "application/csv"
                    | "application/markdown"
            )
            || mime.ends_with("+json")
            || mime.ends_with("+xml");
        if textual {
            FileKind::Text
        } else {
            FileKind::Other
        }
    }
}

/// A file reference whose bytes are available as base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub name: String,
    pub mime_type: String,
    pub base64: String,
}

impl ResolvedFile {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mime(&self.mime_type)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    pub fn decoded_text(&self) -> Result<String, AdapterError> {
        let bytes = BASE64.decode(self.base64.trim()).map_err(|error| {
            AdapterError::new(
                AdapterErrorCode::FileUnavailable,
                format!("File '{}' is not valid base64: {error}", self.name),
            )
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Resolves stored attachment identifiers into bytes.
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, reference: &FileReference) -> Result<ResolvedFile, AdapterError>;
}

pub async fn resolve_files(
    references: &[FileReference],
    resolver: Option<&dyn FileResolver>,
) -> Result<Vec<ResolvedFile>, AdapterError> {
    let mut resolved = Vec::with_capacity(references.len());
    for reference in references {
        match &reference.payload {
            FilePayload::Inline { base64 } => resolved.push(ResolvedFile {
                name: reference.name.clone(),
                mime_type: reference.mime_type.clone(),
                base64: base64.clone(),
            }),
            FilePayload::Stored { id } => {
                let Some(resolver) = resolver else {
                    return Err(AdapterError::new(
                        AdapterErrorCode::FileUnavailable,
                        format!(
                            "File '{}' references stored id '{id}' but no file resolver is configured",
                            reference.name
                        ),
                    )
                    .with_details(json!({ "fileId": id })));
                };
                resolved.push(resolver.resolve(reference).await?);
            }
        }
    }
    Ok(resolved)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapResolver;

    #[async_trait]
    impl FileResolver for MapResolver {
        async fn resolve(&self, reference: &FileReference) -> Result<ResolvedFile, AdapterError> {
            Ok(ResolvedFile {
                name: reference.name.clone(),
                mime_type: reference.mime_type.clone(),
                base64: encode_base64(b"from store"),
            })
        }
    }

    #[test]
    fn mime_types_map_to_kinds() {
        assert_eq!(FileKind::from_mime("image/png"), FileKind::Image);
        assert_eq!(FileKind::from_mime("application/pdf"), FileKind::Pdf);
        assert_eq!(FileKind::from_mime("text/plain; charset=utf-8"), FileKind::Text);
        assert_eq!(FileKind::from_mime("application/json"), FileKind::Text);
        assert_eq!(FileKind::from_mime("application/ld+json"), FileKind::Text);
        assert_eq!(FileKind::from_mime("application/zip"), FileKind::Other);
    }

    #[test]
    fn decoded_text_reads_inline_bytes() {
        let file = ResolvedFile {
            name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            base64: encode_base64("héllo".as_bytes()),
        };
        assert_eq!(file.decoded_text().expect("decode"), "héllo");
    }

    #[tokio::test]
    async fn stored_reference_without_resolver_fails() {
        let references = vec![FileReference::stored("a.png", "image/png", "file-1")];
        let error = resolve_files(&references, None).await.expect_err("should fail");
        assert_eq!(error.code, AdapterErrorCode::FileUnavailable);
    }

    #[tokio::test]
    async fn stored_reference_uses_resolver() {
        let references = vec![
            FileReference::inline("a.txt", "text/plain", encode_base64(b"inline")),
            FileReference::stored("b.txt", "text/plain", "file-2"),
        ];
        let resolved = resolve_files(&references, Some(&MapResolver))
            .await
            .expect("resolve");
        assert_eq!(resolved[0].decoded_text().expect("decode"), "inline");
        assert_eq!(resolved[1].decoded_text().expect("decode"), "from store");
    }
}
