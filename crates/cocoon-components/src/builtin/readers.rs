use async_trait::async_trait;

use cocoon_types::Result;

use crate::component::{Reader, Setup};

/// Copies the bytes of `src` to the response unchanged.
pub struct ResourceReader;

fn guess_mime_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "xml" | "xsl" => "text/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}

#[async_trait]
impl Reader for ResourceReader {
    async fn read(&self, setup: &Setup<'_>, out: &mut Vec<u8>) -> Result<()> {
        let src = setup.require_source("resource reader")?;
        let source = setup.resolver.resolve(src, setup.env.context()).await?;
        out.extend_from_slice(&source.content);
        Ok(())
    }

    fn mime_type(&self, setup: &Setup<'_>) -> Option<String> {
        setup
            .params
            .get("mime-type")
            .map(str::to_string)
            .or_else(|| setup.source.and_then(guess_mime_type).map(str::to_string))
    }
}
