//! Open-document store.
//!
//! Holds the live buffer of every document the editor has open. The scheduler
//! reads text from here when a run starts, so runs always lint the buffer as
//! it is at that moment, saved or not.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tsqlls_types::{Position, Range};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    text: String,
    version: i32,
}

impl OpenDocument {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }
}

/// One `contentChanges` entry. No range means "replace everything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub range: Option<Range>,
    pub text: String,
}

impl TextChange {
    #[must_use]
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn replace(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }
}

/// Shared handle to the open documents; clones see the same store.
#[derive(Debug, Clone, Default)]
pub struct Documents {
    inner: Arc<Mutex<HashMap<Url, OpenDocument>>>,
}

impl Documents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Url, OpenDocument>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self, uri: Url, text: String, version: i32) {
        self.lock().insert(uri, OpenDocument { text, version });
    }

    /// Apply edits in order. Returns `false` if the document is not open.
    pub fn change(&self, uri: &Url, version: i32, changes: &[TextChange]) -> bool {
        let mut docs = self.lock();
        let Some(doc) = docs.get_mut(uri) else {
            return false;
        };
        for change in changes {
            apply_change(&mut doc.text, change);
        }
        doc.version = version;
        true
    }

    /// Returns `true` if the document was open.
    pub fn close(&self, uri: &Url) -> bool {
        self.lock().remove(uri).is_some()
    }

    #[must_use]
    pub fn get(&self, uri: &Url) -> Option<OpenDocument> {
        self.lock().get(uri).cloned()
    }

    #[must_use]
    pub fn text(&self, uri: &Url) -> Option<String> {
        self.lock().get(uri).map(|doc| doc.text.clone())
    }

    #[must_use]
    pub fn is_open(&self, uri: &Url) -> bool {
        self.lock().contains_key(uri)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn apply_change(text: &mut String, change: &TextChange) {
    match change.range {
        None => text.clone_from(&change.text),
        Some(range) => {
            let start = byte_offset(text, range.start);
            let end = byte_offset(text, range.end).max(start);
            text.replace_range(start..end, &change.text);
        }
    }
}

/// Byte offset of an LSP position (UTF-16 columns).
///
/// Columns past the end of a line clamp to the line end (before any `\r`);
/// lines past the end of the text clamp to the end of the text.
#[must_use]
pub fn byte_offset(text: &str, position: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);
    let line = &text[line_start..line_end];
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut units = 0u32;
    for (i, ch) in line.char_indices() {
        if units >= position.character {
            return line_start + i;
        }
        units += ch.len_utf16() as u32;
    }
    line_start + line.len()
}

/// Split a buffer into lines the way the editor numbers them.
#[must_use]
pub fn buffer_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}
