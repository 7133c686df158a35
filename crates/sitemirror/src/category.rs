//! Resource classification: which subdirectory a resource lands in and which
//! extension its file gets.

use crate::reference::ResourceUrl;
use crate::snapshot::ResourceType;

/// Top-level entries of a page root owned by the mirror. Cleaning a page
/// root removes exactly these.
pub const MANAGED_ENTRIES: &[&str] = &["index.html", "css", "js", "images", "fonts", "other"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Css,
    Js,
    Image,
    Thumbnail,
    Font,
    Other,
}

impl Category {
    pub fn subdirectory(self) -> &'static str {
        match self {
            Category::Css => "css",
            Category::Js => "js",
            Category::Image => "images",
            Category::Thumbnail => "images/thumbnails",
            Category::Font => "fonts",
            Category::Other => "other",
        }
    }

    fn default_extension(self) -> &'static str {
        match self {
            Category::Css => ".css",
            Category::Js => ".js",
            Category::Image | Category::Thumbnail => ".jpg",
            Category::Font => ".woff",
            Category::Other => "",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".css" => Some(Category::Css),
            ".js" | ".mjs" => Some(Category::Js),
            ".png" | ".jpg" | ".jpeg" | ".gif" | ".svg" | ".webp" | ".avif" | ".ico" | ".bmp"
            | ".tif" | ".tiff" => Some(Category::Image),
            ".woff" | ".woff2" | ".ttf" | ".eot" | ".otf" => Some(Category::Font),
            _ => None,
        }
    }

    fn from_hint(hint: ResourceType) -> Self {
        match hint {
            ResourceType::Script => Category::Js,
            ResourceType::Stylesheet => Category::Css,
            ResourceType::Image => Category::Image,
            ResourceType::Font => Category::Font,
        }
    }
}

/// Category plus the file extension (with leading dot, possibly empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySpec {
    pub category: Category,
    pub extension: String,
}

impl CategorySpec {
    pub fn subdirectory(&self) -> &'static str {
        self.category.subdirectory()
    }
}

/// Classify a resource.
///
/// Priority: declared content type, URL extension, network-observed type,
/// then `other`. Generic binary and plain-text types count as undeclared.
pub fn classify(
    url: &ResourceUrl,
    content_type: Option<&str>,
    hint: Option<ResourceType>,
) -> CategorySpec {
    let mime = content_type.map(mime_essence).filter(|m| !is_undeclared(m));
    let url_ext = url_extension(url);

    let category = mime
        .as_deref()
        .and_then(category_from_mime)
        .or_else(|| url_ext.as_deref().and_then(Category::from_extension))
        .or_else(|| hint.map(Category::from_hint))
        .unwrap_or(Category::Other);

    let extension = choose_extension(category, url_ext.as_deref(), mime.as_deref());
    CategorySpec {
        category,
        extension,
    }
}

fn choose_extension(category: Category, url_ext: Option<&str>, mime: Option<&str>) -> String {
    if let Some(ext) = url_ext {
        let fits = match category {
            Category::Other => true,
            Category::Thumbnail => Category::from_extension(ext) == Some(Category::Image),
            c => Category::from_extension(ext) == Some(c),
        };
        if fits {
            return ext.to_string();
        }
    }

    if let Some(ext) = mime.and_then(extension_from_mime) {
        if category == Category::Other || Category::from_extension(&ext) == Some(category) {
            return ext;
        }
    }

    category.default_extension().to_string()
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_undeclared(mime: &str) -> bool {
    matches!(
        mime,
        "" | "application/octet-stream" | "binary/octet-stream" | "text/plain"
    )
}

fn category_from_mime(mime: &str) -> Option<Category> {
    match mime {
        "text/css" => Some(Category::Css),
        "text/javascript"
        | "application/javascript"
        | "application/x-javascript"
        | "application/ecmascript"
        | "text/ecmascript" => Some(Category::Js),
        "application/font-woff"
        | "application/font-woff2"
        | "application/x-font-woff"
        | "application/x-font-ttf"
        | "application/x-font-otf"
        | "application/x-font-opentype"
        | "application/font-sfnt"
        | "application/vnd.ms-fontobject" => Some(Category::Font),
        m if m.starts_with("image/") => Some(Category::Image),
        m if m.starts_with("font/") => Some(Category::Font),
        _ => None,
    }
}

fn extension_from_mime(mime: &str) -> Option<String> {
    let known = match mime {
        "image/jpeg" | "image/pjpeg" => Some(".jpg"),
        "image/svg+xml" => Some(".svg"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some(".ico"),
        "font/woff2" | "application/font-woff2" => Some(".woff2"),
        "font/woff" | "application/font-woff" | "application/x-font-woff" => Some(".woff"),
        "font/ttf" | "application/x-font-ttf" => Some(".ttf"),
        "font/otf" | "application/x-font-otf" | "application/x-font-opentype" => Some(".otf"),
        "application/vnd.ms-fontobject" => Some(".eot"),
        _ => None,
    };
    if let Some(ext) = known {
        return Some(ext.to_string());
    }
    mime_guess::get_mime_extensions_str(mime)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{ext}"))
}

/// Lowercased extension of the URL's last path segment, with leading dot.
pub(crate) fn url_extension(url: &ResourceUrl) -> Option<String> {
    let segment = url.path().rsplit('/').next().unwrap_or_default();
    let dot = segment.rfind('.')?;
    let ext = &segment[dot + 1..];
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}
