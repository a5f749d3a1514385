//! The shared video playback state machine (spec.md §4.2).
//!
//! The canonical state is an anchor `(position, wallTime)` pair plus
//! `isPlaying`/`rate`; outbound snapshots always carry the *computed*
//! position at emission time so clients never do cross-clock arithmetic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Youtube,
    Direct,
    None,
}

const DIRECT_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "m3u8"];

/// A classified, loadable video source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSource {
    pub video_id: String,
    pub video_url: String,
    pub video_type: VideoType,
    /// Known up front when re-loaded from a queue item whose title was
    /// already backfilled; `None` otherwise (classification never knows a
    /// title, only oEmbed does).
    pub title: Option<String>,
}

/// Classify a user-supplied URL into a playable source, or reject it.
///
/// YouTube URLs are recognized by the common shapes (`youtube.com/watch?v=`,
/// `youtu.be/`, `youtube.com/embed/`, `youtube.com/shorts/`) and yield the
/// 11-char video ID. Anything else is classified as a direct media URL if its
/// path (or, for HLS, its query) ends in a known media extension.
pub fn classify_url(raw: &str) -> Result<VideoSource, RelayError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RelayError::InvalidInput("empty video URL".to_owned()));
    }
    let parsed = url::Url::parse(trimmed)
        .map_err(|_| RelayError::InvalidInput(format!("unparseable URL: {trimmed}")))?;

    if let Some(video_id) = extract_youtube_id(&parsed) {
        return Ok(VideoSource {
            video_id,
            video_url: trimmed.to_owned(),
            video_type: VideoType::Youtube,
            title: None,
        });
    }

    if is_direct_media_url(&parsed) {
        return Ok(VideoSource {
            video_id: String::new(),
            video_url: trimmed.to_owned(),
            video_type: VideoType::Direct,
            title: None,
        });
    }

    Err(RelayError::InvalidInput(format!(
        "unrecognized video URL: {trimmed}"
    )))
}

fn extract_youtube_id(url: &url::Url) -> Option<String> {
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let is_youtube_host = matches!(host, "youtube.com" | "youtu.be" | "music.youtube.com");
    if !is_youtube_host {
        return None;
    }

    let candidate = if host == "youtu.be" {
        url.path().trim_start_matches('/').to_owned()
    } else {
        let path = url.path();
        if let Some(rest) = path.strip_prefix("/embed/") {
            rest.to_owned()
        } else if let Some(rest) = path.strip_prefix("/shorts/") {
            rest.to_owned()
        } else {
            url.query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        }
    };

    let id: String = candidate.chars().take(11).collect();
    if id.len() == 11 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        Some(id)
    } else {
        None
    }
}

fn is_direct_media_url(url: &url::Url) -> bool {
    let path_ext = url
        .path()
        .rsplit('.')
        .next()
        .map(|s| s.to_ascii_lowercase());
    if let Some(ext) = &path_ext {
        if DIRECT_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }
    // HLS playlists are sometimes served behind a query-string suffix rather
    // than a literal `.m3u8` path, e.g. `/stream?file=playlist.m3u8`.
    url.query().map(|q| q.contains("m3u8")).unwrap_or(false)
}

/// Outbound, wire-ready snapshot: the computed effective position "as of"
/// `timestamp`, never the raw anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnapshot {
    pub video_id: String,
    pub video_url: String,
    pub video_type: VideoType,
    pub title: Option<String>,
    pub is_playing: bool,
    pub current_time: f64,
    pub rate: f64,
    pub seq: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
struct Anchor {
    video_id: String,
    video_url: String,
    video_type: VideoType,
    title: Option<String>,
    is_playing: bool,
    anchor_position: f64,
    anchor_wall_time: i64,
    rate: f64,
    seq: u64,
}

impl Anchor {
    fn empty() -> Self {
        Self {
            video_id: String::new(),
            video_url: String::new(),
            video_type: VideoType::None,
            title: None,
            is_playing: false,
            anchor_position: 0.0,
            anchor_wall_time: 0,
            rate: 1.0,
            seq: 0,
        }
    }

    fn effective_position(&self, now_ms: i64) -> f64 {
        if self.is_playing {
            let elapsed_s = (now_ms - self.anchor_wall_time) as f64 / 1000.0;
            self.anchor_position + elapsed_s * self.rate
        } else {
            self.anchor_position
        }
    }

    fn snapshot(&self, now_ms: i64) -> VideoSnapshot {
        VideoSnapshot {
            video_id: self.video_id.clone(),
            video_url: self.video_url.clone(),
            video_type: self.video_type,
            title: self.title.clone(),
            is_playing: self.is_playing,
            current_time: self.effective_position(now_ms),
            rate: self.rate,
            seq: self.seq,
            timestamp: now_ms,
        }
    }
}

/// Per-room video state machine. Mutated only by the event dispatcher, which
/// already serializes access per room (§5); internal mutability here is a
/// convenience, not a second synchronization layer.
pub struct VideoState {
    clock: Arc<dyn Clock>,
    anchor: Anchor,
}

impl VideoState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            anchor: Anchor::empty(),
        }
    }

    pub fn snapshot(&self) -> VideoSnapshot {
        self.anchor.snapshot(self.clock.now_ms())
    }

    pub fn seq(&self) -> u64 {
        self.anchor.seq
    }

    /// load(url): classify, reset the anchor to position 0 and start playing.
    pub fn load(&mut self, source: VideoSource) -> VideoSnapshot {
        let now = self.clock.now_ms();
        self.anchor.video_id = source.video_id;
        self.anchor.video_url = source.video_url;
        self.anchor.video_type = source.video_type;
        self.anchor.title = source.title;
        self.anchor.is_playing = true;
        self.anchor.anchor_position = 0.0;
        self.anchor.anchor_wall_time = now;
        self.anchor.rate = 1.0;
        self.anchor.seq += 1;
        self.anchor.snapshot(now)
    }

    /// play(): echo-suppressed when already playing -- returns `None` and
    /// performs no mutation (spec.md §4.2.1).
    pub fn play(&mut self) -> Option<VideoSnapshot> {
        if self.anchor.is_playing {
            return None;
        }
        let now = self.clock.now_ms();
        self.anchor.is_playing = true;
        self.anchor.anchor_wall_time = now;
        self.anchor.seq += 1;
        Some(self.anchor.snapshot(now))
    }

    /// pause(position): echo-suppressed when already paused.
    pub fn pause(&mut self, client_position: f64) -> Option<VideoSnapshot> {
        if !self.anchor.is_playing {
            return None;
        }
        let now = self.clock.now_ms();
        self.anchor.is_playing = false;
        self.anchor.anchor_position = client_position;
        self.anchor.anchor_wall_time = now;
        self.anchor.seq += 1;
        Some(self.anchor.snapshot(now))
    }

    /// seek(position): always applied -- it carries new information.
    pub fn seek(&mut self, client_position: f64) -> VideoSnapshot {
        let now = self.clock.now_ms();
        self.anchor.anchor_position = client_position;
        self.anchor.anchor_wall_time = now;
        self.anchor.seq += 1;
        self.anchor.snapshot(now)
    }

    /// rate(new_rate): recompute position at the *current* rate before
    /// switching, so the instantaneous position is continuous.
    pub fn set_rate(&mut self, new_rate: f64) -> VideoSnapshot {
        let now = self.clock.now_ms();
        let continuous_position = self.anchor.effective_position(now);
        self.anchor.anchor_position = continuous_position;
        self.anchor.anchor_wall_time = now;
        self.anchor.rate = new_rate;
        self.anchor.seq += 1;
        self.anchor.snapshot(now)
    }

    /// Best-effort oEmbed backfill for the currently loaded video. Advisory
    /// only -- it never touches the anchor or `seq`, since it carries no
    /// playback information a client would need to resync against.
    pub fn set_title(&mut self, title: String) -> VideoSnapshot {
        self.anchor.title = Some(title);
        self.snapshot()
    }

    pub fn has_video(&self) -> bool {
        self.anchor.video_type != VideoType::None
    }

    pub fn is_playing(&self) -> bool {
        self.anchor.is_playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_clock() -> (VideoState, Arc<crate::clock::TestClock>) {
        let clock = Arc::new(crate::clock::TestClock::new(1_000_000));
        let state = VideoState::new(clock.clone());
        (state, clock)
    }

    #[test]
    fn classify_youtube_watch_url() {
        let src = classify_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(src.video_type, VideoType::Youtube);
        assert_eq!(src.video_id, "dQw4w9WgXcQ");
    }

    #[test]
    fn classify_youtube_short_url() {
        let src = classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(src.video_type, VideoType::Youtube);
        assert_eq!(src.video_id, "dQw4w9WgXcQ");
    }

    #[test]
    fn classify_direct_mp4() {
        let src = classify_url("https://cdn.example.com/clip.mp4").unwrap();
        assert_eq!(src.video_type, VideoType::Direct);
    }

    #[test]
    fn classify_hls_query_suffix() {
        let src = classify_url("https://cdn.example.com/stream?file=playlist.m3u8").unwrap();
        assert_eq!(src.video_type, VideoType::Direct);
    }

    #[test]
    fn classify_rejects_unknown() {
        assert!(classify_url("https://example.com/").is_err());
        assert!(classify_url("").is_err());
    }

    #[test]
    fn play_is_echo_suppressed_when_already_playing() {
        let (mut state, _clock) = state_with_clock();
        state.load(classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        let seq_before = state.seq();
        assert!(state.play().is_none());
        assert_eq!(state.seq(), seq_before);
    }

    #[test]
    fn pause_is_echo_suppressed_when_already_paused() {
        let (mut state, _clock) = state_with_clock();
        state.load(classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        state.pause(30.0);
        let seq_before = state.seq();
        assert!(state.pause(31.0).is_none());
        assert_eq!(state.seq(), seq_before);
    }

    #[test]
    fn seek_is_always_applied() {
        let (mut state, _clock) = state_with_clock();
        state.load(classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        state.pause(10.0);
        let seq_before = state.seq();
        let snap = state.seek(42.0);
        assert_eq!(snap.current_time, 42.0);
        assert!(state.seq() > seq_before);
    }

    #[test]
    fn rate_change_is_continuous() {
        let (mut state, clock) = state_with_clock();
        state.load(classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        clock.advance(10_000); // 10s elapsed while playing at rate 1.0
        let snap = state.set_rate(2.0);
        assert!((snap.current_time - 10.0).abs() < 1e-9);
        assert_eq!(snap.rate, 2.0);

        // Position immediately after the rate change (no further elapsed time)
        // must match what was broadcast.
        let snap2 = state.snapshot();
        assert!((snap2.current_time - snap.current_time).abs() < 1e-9);
    }

    #[test]
    fn set_title_backfills_without_bumping_seq() {
        let (mut state, _clock) = state_with_clock();
        state.load(classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        let seq_before = state.seq();
        let snap = state.set_title("Never Gonna Give You Up".to_owned());
        assert_eq!(snap.title.as_deref(), Some("Never Gonna Give You Up"));
        assert_eq!(state.seq(), seq_before);
    }

    #[test]
    fn load_resets_title_to_none() {
        let (mut state, _clock) = state_with_clock();
        state.load(classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        state.set_title("old title".to_owned());
        let mut reloaded = classify_url("https://youtu.be/AAAAAAAAAAA").unwrap();
        reloaded.title = None;
        let snap = state.load(reloaded);
        assert!(snap.title.is_none());
    }

    #[test]
    fn seq_is_strictly_monotonic() {
        let (mut state, clock) = state_with_clock();
        let mut last = 0u64;
        state.load(classify_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        assert!(state.seq() > last);
        last = state.seq();
        clock.advance(1000);
        state.pause(1.0);
        assert!(state.seq() > last);
        last = state.seq();
        clock.advance(1000);
        state.seek(2.0);
        assert!(state.seq() > last);
    }
}
