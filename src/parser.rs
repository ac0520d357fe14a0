//! The document-parser contract (§6). Out of scope per the daemon's core:
//! character-encoding guessing, HTML unescaping, and multipart
//! decomposition are explicitly NOT implemented here. A minimal
//! header-only parser is provided as the default so the daemon is runnable
//! end-to-end without linking an external MIME decoder; tests substitute a
//! fake that returns canned documents or forced failures.

use crate::document::Document;

/// `parse_mime(bytes, ...) -> Doc|None` from the source, expressed as a
/// trait so a real MIME decoder can be swapped in without touching the
/// draft pipeline.
pub trait MessageParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Option<Document>;
}

/// Reads RFC 822 headers up to the first blank line and the raw body after
/// it. No multipart decomposition, no charset transcoding: headers are
/// decoded as UTF-8 lossily and the body is kept verbatim. Good enough for
/// plain-text mail and for indexing the headers that drive SMEW regardless
/// of body format.
pub struct HeaderOnlyParser;

impl MessageParser for HeaderOnlyParser {
    fn parse(&self, bytes: &[u8]) -> Option<Document> {
        let text = String::from_utf8_lossy(bytes);
        let (header_block, body) = match text.find("\r\n\r\n").or_else(|| text.find("\n\n")) {
            Some(idx) => {
                let sep_len = if text[idx..].starts_with("\r\n\r\n") { 4 } else { 2 };
                (&text[..idx], &text[idx + sep_len..])
            }
            None => (text.as_ref(), ""),
        };

        let headers = unfold_headers(header_block);
        let mut doc = Document::new();
        for (name, value) in &headers {
            doc.add_attr(&name.to_ascii_lowercase(), value);
        }
        doc.body = body.to_string();
        Some(doc)
    }
}

/// Joins RFC 822 header folding (continuation lines starting with
/// whitespace) and splits on the first `:`.
fn unfold_headers(block: &str) -> Vec<(String, String)> {
    let mut logical_lines: Vec<String> = Vec::new();
    for line in block.lines() {
        if (line.starts_with(' ') || line.starts_with('\t')) && !logical_lines.is_empty() {
            let last = logical_lines.last_mut().unwrap();
            last.push(' ');
            last.push_str(line.trim_start());
        } else {
            logical_lines.push(line.to_string());
        }
    }
    logical_lines
        .into_iter()
        .filter_map(|line| {
            let idx = line.find(':')?;
            let (name, value) = line.split_at(idx);
            Some((name.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_body() {
        let raw = b"Subject: Hello\r\nFrom: a@x\r\nMessage-Id: <a@x>\r\n\r\nHi world";
        let doc = HeaderOnlyParser.parse(raw).unwrap();
        assert_eq!(doc.attr("subject"), Some("Hello"));
        assert_eq!(doc.attr("from"), Some("a@x"));
        assert_eq!(doc.attr("message-id"), Some("<a@x>"));
        assert_eq!(doc.body, "Hi world");
    }

    #[test]
    fn unfolds_continuation_lines() {
        let raw = b"Subject: long\r\n subject\r\n line\r\n\r\nbody";
        let doc = HeaderOnlyParser.parse(raw).unwrap();
        assert_eq!(doc.attr("subject"), Some("long subject line"));
    }
}
