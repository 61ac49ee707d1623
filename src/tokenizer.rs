//! Header tokenizer
//!
//! Splits a raw header dump into ordered `HeaderField`s and, once the
//! `MIME-Version:` field has been read, switches to scanning body lines for
//! the first base64-encoded part.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

const MIME_VERSION: &str = "MIME-Version:";
const BASE64_MARKER: &str = "Content-Transfer-Encoding: base64";
const BOUNDARY_PREFIX: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderField {
    /// Field label including the trailing colon, e.g. `Received:`
    pub name: String,
    /// Value tokens joined by single spaces
    pub value: String,
}

impl HeaderField {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
        }
    }

    fn push_token(&mut self, token: &str) {
        if !self.value.is_empty() {
            self.value.push(' ');
        }
        self.value.push_str(token);
    }

    /// The whole record split on whitespace, label first.
    pub fn tokens(&self) -> Vec<String> {
        std::iter::once(self.name.as_str())
            .chain(self.value.split_whitespace())
            .map(String::from)
            .collect()
    }

    /// Last whitespace-delimited token of the value, if any.
    pub fn last_token(&self) -> Option<&str> {
        self.value.split_whitespace().next_back()
    }

    /// Single-line rendering used by the report and the parse file.
    pub fn line(&self) -> String {
        if self.value.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.value)
        }
    }
}

/// Structured field scanning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    Scanning,
    /// `MIME-Version:` seen, its value token ends the header block
    MimeVersionOpen,
    BodyReached,
}

/// Body scanning state for the base64 capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingState {
    Idle,
    Capturing,
    Skipping,
}

impl EncodingState {
    /// Transition on one body line.
    ///
    /// | from      | base64 marker              | `--` boundary | other |
    /// |-----------|----------------------------|---------------|-------|
    /// | Idle      | Capturing                  | Skipping      | Idle  |
    /// | Capturing | Capturing                  | Skipping      | same  |
    /// | Skipping  | Capturing, unless run done | Skipping      | same  |
    fn next(self, line: &str, run_done: bool) -> Self {
        if line.starts_with(BASE64_MARKER) {
            if run_done {
                EncodingState::Skipping
            } else {
                EncodingState::Capturing
            }
        } else if line.starts_with(BOUNDARY_PREFIX) {
            EncodingState::Skipping
        } else {
            self
        }
    }
}

/// The first base64 body part, captured verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyCapture {
    pub base64_present: bool,
    pub blob: String,
}

impl BodyCapture {
    /// Decode the captured blob, ignoring whitespace.
    ///
    /// Invalid payloads decode to nothing rather than failing.
    pub fn decode(&self) -> Vec<u8> {
        let compact: String = self.blob.chars().filter(|c| !c.is_whitespace()).collect();
        match general_purpose::STANDARD.decode(compact.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::debug!("Captured base64 segment is not decodable: {e}");
                Vec::new()
            }
        }
    }

    pub fn decoded_text(&self) -> String {
        String::from_utf8_lossy(&self.decode()).into_owned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedDocument {
    pub fields: Vec<HeaderField>,
    pub body_reached: bool,
    pub body: BodyCapture,
}

pub struct HeaderTokenizer {
    fields: Vec<HeaderField>,
    current: Option<HeaderField>,
    field_state: FieldState,
    encoding_state: EncodingState,
    run_done: bool,
    body: BodyCapture,
}

impl Default for HeaderTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderTokenizer {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            current: None,
            field_state: FieldState::Scanning,
            encoding_state: EncodingState::Idle,
            run_done: false,
            body: BodyCapture::default(),
        }
    }

    /// Tokenize a complete document in one pass.
    pub fn tokenize(raw: &str) -> TokenizedDocument {
        let mut tokenizer = Self::new();
        for line in raw.split_inclusive('\n') {
            tokenizer.feed_line(line);
        }
        tokenizer.finish()
    }

    /// A token starts a new field when it ends with `:` and begins with an
    /// uppercase letter.
    pub fn is_field_name(token: &str) -> bool {
        token.ends_with(':') && token.chars().next().is_some_and(char::is_uppercase)
    }

    pub fn feed_line(&mut self, line: &str) {
        if self.field_state == FieldState::BodyReached {
            self.feed_body_line(line);
        } else {
            self.feed_header_line(line);
        }
    }

    fn feed_header_line(&mut self, line: &str) {
        for token in line.split_whitespace() {
            if self.field_state == FieldState::BodyReached {
                // Remainder of the MIME-Version line is not part of any field
                break;
            }

            if Self::is_field_name(token) {
                self.flush();
                self.current = Some(HeaderField::new(token));
            } else {
                match self.current.as_mut() {
                    Some(field) => field.push_token(token),
                    None => log::debug!("Dropping token before first header field: {token}"),
                }
                if self.field_state == FieldState::MimeVersionOpen {
                    self.flush();
                    self.field_state = FieldState::BodyReached;
                    log::debug!("Header block complete after {} fields", self.fields.len());
                }
            }

            if token == MIME_VERSION {
                self.field_state = FieldState::MimeVersionOpen;
            }
        }
    }

    fn feed_body_line(&mut self, line: &str) {
        let previous = self.encoding_state;
        self.encoding_state = previous.next(line, self.run_done);

        match (previous, self.encoding_state) {
            (EncodingState::Capturing, EncodingState::Skipping) => {
                self.run_done = true;
                log::debug!("Base64 capture closed ({} bytes)", self.body.blob.len());
            }
            (_, EncodingState::Capturing) if line.starts_with(BASE64_MARKER) => {
                if !self.body.base64_present {
                    log::debug!("Base64 body segment found");
                }
                self.body.base64_present = true;
            }
            _ => {}
        }

        if self.encoding_state == EncodingState::Capturing && !line.starts_with(BASE64_MARKER) {
            self.body.blob.push_str(line);
        }
    }

    fn flush(&mut self) {
        if let Some(field) = self.current.take() {
            self.fields.push(field);
        }
    }

    pub fn finish(mut self) -> TokenizedDocument {
        self.flush();
        TokenizedDocument {
            fields: self.fields,
            body_reached: self.field_state == FieldState::BodyReached,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Received: from mail.example.com (1.2.3.4)\n\
        \tby mx.example.org; Mon, 1 Jan 2024\n\
        From: Alice <alice@example.com>\n\
        Subject: Hello there\n\
        MIME-Version: 1.0\n\
        Content-Type: multipart/alternative; boundary=\"b1\"\n\
        \n\
        --b1\n\
        Content-Type: text/plain\n\
        Content-Transfer-Encoding: base64\n\
        \n\
        SGVsbG8g\n\
        V29ybGQ=\n\
        --b1\n\
        Content-Transfer-Encoding: base64\n\
        \n\
        U2Vjb25k\n\
        --b1--\n";

    #[test]
    fn test_field_name_detection() {
        assert!(HeaderTokenizer::is_field_name("Received:"));
        assert!(HeaderTokenizer::is_field_name("X-Spam:"));
        assert!(!HeaderTokenizer::is_field_name("(google.com:"));
        assert!(!HeaderTokenizer::is_field_name("from"));
        assert!(!HeaderTokenizer::is_field_name(":"));
    }

    #[test]
    fn test_fields_in_document_order() {
        let doc = HeaderTokenizer::tokenize(SAMPLE);
        let names: Vec<&str> = doc.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Received:", "From:", "Subject:", "MIME-Version:"]);
        assert_eq!(
            doc.fields[0].value,
            "from mail.example.com (1.2.3.4) by mx.example.org; Mon, 1 Jan 2024"
        );
        assert_eq!(doc.fields[3].value, "1.0");
        assert!(doc.body_reached);
    }

    #[test]
    fn test_mime_version_ends_header_block() {
        let doc = HeaderTokenizer::tokenize(SAMPLE);
        assert!(doc.fields.iter().all(|f| f.name != "Content-Type:"));
    }

    #[test]
    fn test_only_first_base64_run_is_captured() {
        let doc = HeaderTokenizer::tokenize(SAMPLE);
        assert!(doc.body.base64_present);
        assert_eq!(doc.body.blob, "\nSGVsbG8g\nV29ybGQ=\n");
        assert_eq!(doc.body.decoded_text(), "Hello World");
    }

    #[test]
    fn test_no_mime_version_means_no_body() {
        let raw = "From: a@example.com\n\
            Content-Transfer-Encoding: base64\n\
            \n\
            SGVsbG8=\n";
        let doc = HeaderTokenizer::tokenize(raw);
        assert!(!doc.body_reached);
        assert!(!doc.body.base64_present);
        assert!(doc.body.blob.is_empty());
        assert_eq!(doc.fields.len(), 2);
    }

    #[test]
    fn test_invalid_base64_decodes_empty() {
        let body = BodyCapture {
            base64_present: true,
            blob: "Content-Type: text/plain\n!!!\n".to_string(),
        };
        assert!(body.decode().is_empty());
    }

    #[test]
    fn test_encoding_transitions() {
        assert_eq!(
            EncodingState::Idle.next("Content-Transfer-Encoding: base64", false),
            EncodingState::Capturing
        );
        assert_eq!(
            EncodingState::Capturing.next("--boundary", false),
            EncodingState::Skipping
        );
        assert_eq!(
            EncodingState::Skipping.next("Content-Transfer-Encoding: base64", true),
            EncodingState::Skipping
        );
        assert_eq!(EncodingState::Capturing.next("abcd", false), EncodingState::Capturing);
    }

    #[test]
    fn test_tokens_before_first_field_are_dropped() {
        let doc = HeaderTokenizer::tokenize("garbage here\nTo: bob@example.com\n");
        assert_eq!(doc.fields.len(), 1);
        assert_eq!(doc.fields[0].line(), "To: bob@example.com");
    }
}
