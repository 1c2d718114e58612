use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;

/// Used when the upload or data URL does not say what kind of image it is.
pub const FALLBACK_MIME: &str = "image/jpeg";

static DATA_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^data:([^;,]*)((?:;[^;,]*)*),(.*)$").unwrap());

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("فایل انتخاب‌شده تصویر نیست ({0})")]
    NotAnImage(String),
    #[error("فایل تصویر خالی است")]
    Empty,
    #[error("داده تصویر قابل خواندن نیست")]
    InvalidBase64,
}

/// A selected image, held as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

impl ImagePayload {
    /// From a file upload. `content_type` must be `image/*`, mirroring the picker filter.
    pub fn from_upload(
        bytes: Vec<u8>,
        content_type: Option<&str>,
        file_name: Option<String>,
    ) -> Result<Self, ImageError> {
        let mime = content_type.map(normalize_mime).unwrap_or_default();
        if !mime.starts_with("image/") {
            return Err(ImageError::NotAnImage(if mime.is_empty() {
                "unknown".to_string()
            } else {
                mime
            }));
        }
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self {
            bytes,
            mime_type: mime,
            file_name,
        })
    }

    /// Accepts either a `data:` URL or bare base64. The prefix, if any, is
    /// stripped and its mime type kept.
    pub fn from_encoded(encoded: &str) -> Result<Self, ImageError> {
        let encoded = encoded.trim();
        let (mime, data) = match DATA_URL_RE.captures(encoded) {
            Some(caps) => {
                let mime = normalize_mime(caps.get(1).map_or("", |m| m.as_str()));
                let data = caps.get(3).map_or("", |m| m.as_str());
                (mime, data)
            }
            None => (String::new(), encoded),
        };

        if !mime.is_empty() && !mime.starts_with("image/") {
            return Err(ImageError::NotAnImage(mime));
        }

        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(ImageError::Empty);
        }
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|_| ImageError::InvalidBase64)?;
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }

        Ok(Self {
            bytes,
            mime_type: if mime.is_empty() {
                FALLBACK_MIME.to_string()
            } else {
                mime
            },
            file_name: None,
        })
    }

    pub fn base64_data(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Preview form for embedding in `<img src>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data())
    }
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}
