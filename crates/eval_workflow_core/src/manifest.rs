//! Lazy enumeration of work items from a manifest object.
//!
//! A manifest is either a JSON array of items or newline-delimited JSON. Items
//! are decoded one at a time from the shared buffer, so validation of item `n`
//! never requires materializing items `n + 1..`.

use std::sync::Arc;

use serde_json::Deserializer;

use crate::contract::{IndexedItem, WorkItem};
use crate::error::ManifestError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    JsonArray,
    JsonLines,
}

#[derive(Debug, Clone)]
pub struct ManifestItems {
    body: Arc<[u8]>,
    format: ManifestFormat,
    max_items: Option<usize>,
    cursor: usize,
    next_index: usize,
    finished: bool,
}

impl ManifestItems {
    pub fn new(body: impl Into<Arc<[u8]>>) -> Self {
        let body = body.into();
        let format = detect_format(&body);
        let mut items = Self {
            body,
            format,
            max_items: None,
            cursor: 0,
            next_index: 0,
            finished: false,
        };
        items.restart();
        items
    }

    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn format(&self) -> ManifestFormat {
        self.format
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Rewinds to the first item. There is no way to resume from the middle.
    pub fn restart(&mut self) {
        self.cursor = skip_whitespace(&self.body, content_start(&self.body));
        if self.format == ManifestFormat::JsonArray {
            // Opening bracket, guaranteed by detect_format.
            self.cursor = skip_whitespace(&self.body, self.cursor + 1);
        }
        self.next_index = 0;
        self.finished = false;
    }

    /// Drains a clone of the reader, returning the item count or the first error.
    pub fn validate(&self) -> Result<usize, ManifestError> {
        let mut scan = self.clone();
        scan.restart();
        let mut count = 0usize;
        for item in scan {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn fail(&mut self, error: ManifestError) -> Option<Result<IndexedItem, ManifestError>> {
        self.finished = true;
        Some(Err(error))
    }

    fn next_array_item(&mut self) -> Option<Result<IndexedItem, ManifestError>> {
        let body = Arc::clone(&self.body);
        let Some(&byte) = body.get(self.cursor) else {
            return self.fail(ManifestError::parse("unterminated JSON array"));
        };

        if byte == b']' {
            self.finished = true;
            let rest = skip_whitespace(&body, self.cursor + 1);
            if rest < body.len() {
                return Some(Err(ManifestError::parse(
                    "unexpected trailing content after the item array",
                )));
            }
            return None;
        }

        if self.next_index > 0 {
            if byte != b',' {
                return self.fail(ManifestError::parse_at(
                    self.next_index,
                    "expected `,` or `]` between array items",
                ));
            }
            self.cursor = skip_whitespace(&body, self.cursor + 1);
        }

        let item = self.decode_one(&body);
        if item.is_some() {
            self.cursor = skip_whitespace(&body, self.cursor);
        }
        item
    }

    fn next_line_item(&mut self) -> Option<Result<IndexedItem, ManifestError>> {
        let body = Arc::clone(&self.body);
        if self.cursor >= body.len() {
            self.finished = true;
            return None;
        }
        let item = self.decode_one(&body);
        if item.is_some() {
            self.cursor = skip_whitespace(&body, self.cursor);
        }
        item
    }

    fn decode_one(&mut self, body: &[u8]) -> Option<Result<IndexedItem, ManifestError>> {
        let index = self.next_index;
        let remaining = &body[self.cursor..];
        let mut stream = Deserializer::from_slice(remaining).into_iter::<WorkItem>();
        match stream.next() {
            Some(Ok(item)) => {
                self.cursor += stream.byte_offset();
                self.next_index += 1;
                Some(Ok(IndexedItem { index, item }))
            }
            Some(Err(error)) => self.fail(ManifestError::parse_at(index, error.to_string())),
            None => self.fail(ManifestError::parse_at(index, "expected a JSON object")),
        }
    }
}

impl Iterator for ManifestItems {
    type Item = Result<IndexedItem, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(limit) = self.max_items {
            if self.next_index >= limit {
                self.finished = true;
                return None;
            }
        }

        match self.format {
            ManifestFormat::JsonArray => self.next_array_item(),
            ManifestFormat::JsonLines => self.next_line_item(),
        }
    }
}

fn detect_format(body: &[u8]) -> ManifestFormat {
    match body.get(skip_whitespace(body, content_start(body))) {
        Some(b'[') => ManifestFormat::JsonArray,
        _ => ManifestFormat::JsonLines,
    }
}

/// Editors on some platforms prepend a byte order mark; it is not content.
fn content_start(body: &[u8]) -> usize {
    if body.starts_with(UTF8_BOM) {
        UTF8_BOM.len()
    } else {
        0
    }
}

fn skip_whitespace(body: &[u8], mut cursor: usize) -> usize {
    while cursor < body.len() && body[cursor].is_ascii_whitespace() {
        cursor += 1;
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: &str = r#"{"input":"a","submission":"b","criteria":"c"}"#;
    const SECOND: &str = r#"{"input":"d","submission":"e","criteria":"f"}"#;

    fn collect(body: &str) -> Result<Vec<IndexedItem>, ManifestError> {
        ManifestItems::new(body.as_bytes().to_vec()).collect()
    }

    fn two_item_array() -> Vec<u8> {
        format!("[{FIRST},{SECOND}]").into_bytes()
    }

    #[test]
    fn reads_json_array_items_in_order() {
        let items = collect(
            r#"[
                {"input":"2+2","submission":"4","criteria":"numeric correctness"},
                {"input":"capital of France","submission":"Paris","criteria":"factual"}
            ]"#,
        )
        .expect("manifest should parse");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 0);
        assert_eq!(items[0].item.input, "2+2");
        assert_eq!(items[1].index, 1);
        assert_eq!(items[1].item.submission, "Paris");
    }

    #[test]
    fn reads_newline_delimited_items() {
        let items = collect(&format!("{FIRST}\n{SECOND}\n")).expect("manifest should parse");

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].item.criteria, "f");
    }

    #[test]
    fn empty_manifests_yield_no_items() {
        assert!(collect("[]").expect("empty array").is_empty());
        assert!(collect("  [ ]  ").expect("spaced array").is_empty());
        assert!(collect("").expect("empty body").is_empty());
        assert!(collect("\n\n").expect("blank lines").is_empty());
    }

    #[test]
    fn skips_leading_byte_order_mark() {
        let mut body = UTF8_BOM.to_vec();
        body.extend(two_item_array());
        let items = ManifestItems::new(body);

        assert_eq!(items.format(), ManifestFormat::JsonArray);
        assert_eq!(items.validate().expect("valid"), 2);

        let mut body = UTF8_BOM.to_vec();
        body.extend(format!("{FIRST}\n").into_bytes());
        let items = ManifestItems::new(body);

        assert_eq!(items.format(), ManifestFormat::JsonLines);
        assert_eq!(items.validate().expect("valid"), 1);
    }

    #[test]
    fn ignores_unknown_item_fields() {
        let body = r#"[{"input":"a","submission":"b","criteria":"c","reference":"extra"}]"#;
        let items = collect(body).expect("manifest should parse");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn rejects_item_with_missing_field() {
        let error = collect(r#"[{"input":"a","submission":"b"}]"#).expect_err("should fail");
        match error {
            ManifestError::Parse { index, message } => {
                assert_eq!(index, Some(0));
                assert!(message.contains("criteria"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_object_elements() {
        let error = collect(&format!("[{FIRST}, 42]")).expect_err("should fail");
        assert!(matches!(error, ManifestError::Parse { index: Some(1), .. }));
    }

    #[test]
    fn rejects_unterminated_array_and_trailing_garbage() {
        let unterminated = collect(&format!("[{FIRST}")).expect_err("should fail");
        assert!(unterminated.to_string().contains("unterminated"));

        let trailing = collect(&format!("[{FIRST}] {{}}")).expect_err("should fail");
        assert!(trailing.to_string().contains("trailing"));
    }

    #[test]
    fn rejects_missing_separator() {
        let error = collect(&format!("[{FIRST} {SECOND}]")).expect_err("should fail");
        assert!(matches!(error, ManifestError::Parse { index: Some(1), .. }));
    }

    #[test]
    fn stops_after_first_error() {
        let mut items = ManifestItems::new(b"[1, 2, 3]".to_vec());
        assert!(items.next().expect("first entry").is_err());
        assert!(items.next().is_none());
    }

    #[test]
    fn restart_replays_from_the_first_item() {
        let mut items = ManifestItems::new(two_item_array());
        let first_pass: Vec<_> = items.by_ref().map(|item| item.expect("valid")).collect();
        assert!(items.next().is_none());

        items.restart();
        let second_pass: Vec<_> = items.map(|item| item.expect("valid")).collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn max_items_caps_enumeration() {
        let items = ManifestItems::new(two_item_array()).with_max_items(Some(1));

        assert_eq!(items.validate().expect("valid"), 1);
        assert_eq!(items.count(), 1);
    }

    #[test]
    fn validate_reports_count_without_consuming_reader() {
        let items = ManifestItems::new(format!("[{FIRST}]").into_bytes());
        assert_eq!(items.validate().expect("valid"), 1);
        assert_eq!(items.count(), 1);
    }
}
