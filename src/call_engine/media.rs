//! Media Toggles - Kamera, Mikrofon, Bildschirmfreigabe
//!
//! Es werden keine Streams verwaltet, nur die Schalter, die die UI anzeigt.
//! Video und Audio bleiben über Anrufe hinweg erhalten (Nutzerpräferenz),
//! die Bildschirmfreigabe endet mit jedem Anruf.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            video_enabled: true,
            audio_enabled: true,
            screen_sharing: false,
        }
    }
}

impl MediaState {
    /// Schaltet die Kamera um und gibt den neuen Wert zurück
    pub fn toggle_video(&mut self) -> bool {
        self.video_enabled = !self.video_enabled;
        self.video_enabled
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.audio_enabled = !self.audio_enabled;
        self.audio_enabled
    }

    pub fn toggle_screen_share(&mut self) -> bool {
        self.screen_sharing = !self.screen_sharing;
        self.screen_sharing
    }

    /// Beim Auflegen: Freigabe beenden, Präferenzen behalten
    pub fn reset_for_call_end(&mut self) {
        self.screen_sharing = false;
    }
}

// ============================================================================
// TESTS
// ============================================================================
