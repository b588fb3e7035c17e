//! PDF signature checks

use std::path::Path;
use tokio::io::AsyncReadExt;

/// Leading bytes of every PDF file
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Returns true iff the buffer starts with `%PDF`
pub fn is_valid_pdf(bytes: &[u8]) -> bool {
    bytes.len() >= PDF_MAGIC.len() && &bytes[..PDF_MAGIC.len()] == PDF_MAGIC
}

/// Whether a link target names a `.pdf` file (query and fragment ignored)
pub fn is_pdf_href(href: &str) -> bool {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    path.trim_end().to_ascii_lowercase().ends_with(".pdf")
}

/// Re-read the first bytes of a written file and check the signature
///
/// Unreadable or truncated files count as invalid.
pub async fn is_valid_pdf_file(path: &Path) -> bool {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(_) => return false,
    };
    let mut head = [0u8; 4];
    match file.read_exact(&mut head).await {
        Ok(_) => is_valid_pdf(&head),
        Err(_) => false,
    }
}
