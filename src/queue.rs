//! The up-next queue: a bounded FIFO with reordering (spec.md §4.3).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::ids::QueueItemId;
use crate::video_state::{classify_url, VideoSource};

pub const MAX_QUEUE_LEN: usize = 50;

const OEMBED_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    pub source: QueueSource,
    pub title: Option<String>,
    pub added_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSource {
    pub video_id: String,
    pub video_url: String,
    pub video_type: crate::video_state::VideoType,
}

impl From<VideoSource> for QueueSource {
    fn from(s: VideoSource) -> Self {
        Self {
            video_id: s.video_id,
            video_url: s.video_url,
            video_type: s.video_type,
        }
    }
}

#[derive(Debug, Default)]
pub struct Queue {
    items: Vec<QueueItem>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// add(url): classify, enqueue. Rejects once the queue is at capacity so a
    /// room can't grow the log unboundedly.
    pub fn add(&mut self, raw_url: &str, added_by: String) -> Result<QueueItem, RelayError> {
        if self.items.len() >= MAX_QUEUE_LEN {
            return Err(RelayError::InvalidInput("queue is full".to_owned()));
        }
        let source = classify_url(raw_url)?;
        let item = QueueItem {
            id: QueueItemId::new(),
            source: source.into(),
            title: None,
            added_by,
        };
        self.items.push(item.clone());
        Ok(item)
    }

    pub fn remove(&mut self, item_id: QueueItemId) -> Result<(), RelayError> {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        if self.items.len() == before {
            return Err(RelayError::QueueItemNotFound(item_id));
        }
        Ok(())
    }

    /// reorder(item_id, new_index): move an item to `new_index`, clamping to
    /// the current length.
    pub fn reorder(&mut self, item_id: QueueItemId, new_index: usize) -> Result<(), RelayError> {
        let pos = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(RelayError::QueueItemNotFound(item_id))?;
        let item = self.items.remove(pos);
        let clamped = new_index.min(self.items.len());
        self.items.insert(clamped, item);
        Ok(())
    }

    /// play(item_id): remove the named item and hand it back to the caller to
    /// load into the video state machine.
    pub fn take(&mut self, item_id: QueueItemId) -> Result<QueueItem, RelayError> {
        let pos = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(RelayError::QueueItemNotFound(item_id))?;
        Ok(self.items.remove(pos))
    }

    /// play-next: pop the head of the queue, if any.
    pub fn take_next(&mut self) -> Option<QueueItem> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    pub fn set_title(&mut self, item_id: QueueItemId, title: String) {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) {
            item.title = Some(title);
        }
    }
}

/// Best-effort oEmbed title lookup for a freshly queued YouTube item. Never
/// fatal: a timeout or non-200 response just leaves `title` unset.
pub async fn fetch_oembed_title(client: &reqwest::Client, video_url: &str) -> Option<String> {
    let oembed_url = format!(
        "https://www.youtube.com/oembed?url={}&format=json",
        urlencoding_encode(video_url)
    );
    let resp = tokio::time::timeout(OEMBED_TIMEOUT, client.get(&oembed_url).send())
        .await
        .ok()?
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let body: serde_json::Value = resp.json().await.ok()?;
    body.get("title")?.as_str().map(|s| s.to_owned())
}

fn urlencoding_encode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yt(url: &str) -> String {
        url.to_owned()
    }

    #[test]
    fn add_and_take_next_is_fifo() {
        let mut q = Queue::new();
        q.add(&yt("https://youtu.be/dQw4w9WgXcQ"), "alice".into()).unwrap();
        q.add(&yt("https://youtu.be/AAAAAAAAAAA"), "bob".into()).unwrap();
        let first = q.take_next().unwrap();
        assert_eq!(first.source.video_id, "dQw4w9WgXcQ");
    }

    #[test]
    fn queue_rejects_beyond_capacity() {
        let mut q = Queue::new();
        for _ in 0..MAX_QUEUE_LEN {
            q.add(&yt("https://youtu.be/dQw4w9WgXcQ"), "alice".into()).unwrap();
        }
        assert!(q.add(&yt("https://youtu.be/dQw4w9WgXcQ"), "alice".into()).is_err());
    }

    #[test]
    fn reorder_moves_item() {
        let mut q = Queue::new();
        let a = q.add(&yt("https://youtu.be/AAAAAAAAAAA"), "a".into()).unwrap();
        q.add(&yt("https://youtu.be/BBBBBBBBBBB"), "b".into()).unwrap();
        q.reorder(a.id, 1).unwrap();
        assert_eq!(q.items()[1].id, a.id);
    }

    #[test]
    fn remove_missing_item_errors() {
        let mut q = Queue::new();
        assert!(q.remove(QueueItemId::new()).is_err());
    }
}
