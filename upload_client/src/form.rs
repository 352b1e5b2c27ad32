use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};
use rand::distr::Alphanumeric;
use rand::Rng;

const BOUNDARY_LEN: usize = 32;

/// A file carried by a form, sent unescaped after its part headers.
#[derive(Debug, Clone)]
pub struct FileField {
    pub name: String,
    pub filename: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// The result of encoding a form.
#[derive(Debug, Clone)]
pub struct EncodedForm {
    /// `multipart/form-data; boundary=...`
    pub content_type: String,
    pub body: Bytes,
    /// Where the raw file bytes sit inside `body`, if a file field was encoded.
    pub file_range: Option<Range<usize>>,
}

#[derive(Debug, Clone)]
enum FormPart {
    Text { name: String, value: String },
    File(FileField),
}

/// Builds a `multipart/form-data` body. Encoding is deterministic for a fixed boundary and field order.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<FormPart>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    /// A form with a random alphanumeric boundary.
    pub fn new() -> Self {
        let boundary = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LEN)
            .map(char::from)
            .collect::<String>();
        Self::with_boundary(boundary)
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn add_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn add_file(mut self, file: FileField) -> Self {
        self.parts.push(FormPart::File(file));
        self
    }

    pub fn encode(self) -> EncodedForm {
        let content_type = format!("multipart/form-data; boundary={}", self.boundary);

        let capacity = self
            .parts
            .iter()
            .map(|p| match p {
                FormPart::Text { name, value } => name.len() + value.len() + self.boundary.len() + 64,
                FormPart::File(f) => f.data.len() + f.name.len() + f.filename.len() + self.boundary.len() + 128,
            })
            .sum::<usize>()
            + self.boundary.len()
            + 8;

        let mut body = BytesMut::with_capacity(capacity);
        let mut file_range = None;

        for part in &self.parts {
            body.put_slice(b"--");
            body.put_slice(self.boundary.as_bytes());
            body.put_slice(b"\r\n");

            match part {
                FormPart::Text { name, value } => {
                    body.put_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_quoted(name)).as_bytes(),
                    );
                    body.put_slice(value.as_bytes());
                },
                FormPart::File(f) => {
                    body.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            escape_quoted(&f.name),
                            escape_quoted(&f.filename),
                            f.mime_type
                        )
                        .as_bytes(),
                    );
                    let start = body.len();
                    body.put_slice(&f.data);
                    file_range = Some(start..body.len());
                },
            }
            body.put_slice(b"\r\n");
        }

        body.put_slice(b"--");
        body.put_slice(self.boundary.as_bytes());
        body.put_slice(b"--\r\n");

        EncodedForm {
            content_type,
            body: body.freeze(),
            file_range,
        }
    }
}

/// Encodes `fields` in order, followed by the optional file field, under a fresh random boundary.
pub fn encode_body(fields: &[(String, String)], file: Option<FileField>) -> EncodedForm {
    let form = fields
        .iter()
        .fold(MultipartForm::new(), |form, (name, value)| form.add_text(name.as_str(), value.as_str()));

    match file {
        Some(f) => form.add_file(f),
        None => form,
    }
    .encode()
}

/// Quoted header parameters can't carry raw quotes or line breaks; percent-encode those.
fn escape_quoted(s: &str) -> String {
    s.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}
