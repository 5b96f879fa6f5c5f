//! Static file serving for frontend applications.

use tower_http::services::ServeDir;

/// Create the static file service rooted at the configured directory.
///
/// Mounted under `/static` by the assembler, before the session stage, so
/// asset requests never allocate sessions.
pub fn create_static_service(static_dir: &str) -> ServeDir {
    ServeDir::new(static_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_builds_for_missing_directory() {
        // ServeDir resolves paths per request; construction never touches disk.
        let _service = create_static_service("does-not-exist-yet");
    }
}
