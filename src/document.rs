//! The parsed-document contract (§6 "Document-parser contract").
//!
//! `Document` is the in-memory attribute-annotated representation the
//! draft pipeline builds and hands to the DB worker; it stands in for the
//! external parser's `ESTDOC` in the source.

#[derive(Debug, Clone, Default)]
pub struct Document {
    attrs: Vec<(String, String)>,
    pub body: String,
}

impl Document {
    pub fn new() -> Document {
        Document::default()
    }

    pub fn add_attr(&mut self, name: &str, value: &str) {
        if let Some(existing) = self.attrs.iter_mut().find(|(k, _)| k == name) {
            existing.1 = value.to_string();
        } else {
            self.attrs.push((name.to_string(), value.to_string()));
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    /// Trims the body to at most `size` bytes, on a UTF-8 boundary.
    pub fn slim(&mut self, size: usize) {
        if self.body.len() <= size {
            return;
        }
        let mut cut = size;
        while cut > 0 && !self.body.is_char_boundary(cut) {
            cut -= 1;
        }
        self.body.truncate(cut);
    }
}
