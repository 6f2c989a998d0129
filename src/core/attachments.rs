//! Files queued for the next turn and their server-side parse state.

use crate::api::FileParseResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseState {
    Pending,
    Success(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub client_id: u64,
    pub display_name: String,
    pub path: PathBuf,
    pub parse_state: ParseState,
}

impl Attachment {
    pub fn file_id(&self) -> Option<&str> {
        match &self.parse_state {
            ParseState::Success(file_id) => Some(file_id),
            ParseState::Pending | ParseState::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttachmentSet {
    items: Vec<Attachment>,
    next_id: u64,
}

impl AttachmentSet {
    pub fn add(&mut self, path: impl Into<PathBuf>) -> u64 {
        let path = path.into();
        self.next_id += 1;
        let display_name = display_name(&path);
        self.items.push(Attachment {
            client_id: self.next_id,
            display_name,
            path,
            parse_state: ParseState::Pending,
        });
        self.next_id
    }

    pub fn remove(&mut self, client_id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.client_id != client_id);
        self.items.len() != before
    }

    pub fn items(&self) -> &[Attachment] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Attachments that still need uploading, in the order they were added.
    pub fn pending(&self) -> Vec<(u64, PathBuf)> {
        self.items
            .iter()
            .filter(|item| item.parse_state == ParseState::Pending)
            .map(|item| (item.client_id, item.path.clone()))
            .collect()
    }

    /// Match a parse response to the uploaded batch by position. Batch entries
    /// without a corresponding result are marked failed.
    pub fn apply_results(&mut self, batch: &[u64], results: &[FileParseResult]) {
        for (index, client_id) in batch.iter().enumerate() {
            let Some(item) = self.item_mut(*client_id) else {
                continue;
            };
            item.parse_state = match results.get(index) {
                Some(result) => match (&result.file_id, result.success) {
                    (Some(file_id), true) => ParseState::Success(file_id.clone()),
                    _ => ParseState::Failed(result.failure_reason()),
                },
                None => ParseState::Failed("no parse result returned".to_string()),
            };
        }
    }

    pub fn mark_failed(&mut self, batch: &[u64], reason: &str) {
        for client_id in batch {
            if let Some(item) = self.item_mut(*client_id) {
                item.parse_state = ParseState::Failed(reason.to_string());
            }
        }
    }

    /// File ids of successfully parsed attachments. Pending and failed
    /// entries contribute nothing.
    pub fn file_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(Attachment::file_id)
            .map(str::to_string)
            .collect()
    }

    pub fn is_uploading(&self) -> bool {
        self.items
            .iter()
            .any(|item| item.parse_state == ParseState::Pending)
    }

    fn item_mut(&mut self, client_id: u64) -> Option<&mut Attachment> {
        self.items
            .iter_mut()
            .find(|item| item.client_id == client_id)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
