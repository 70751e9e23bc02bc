//! Broadcast settings with state-dependent mutability.

use livecast_ipc::{AudioQuality, BroadcastSettings, SessionState, MAX_CUSTOM_DATA_BYTES};
use livecast_transport::{ControlMessage, SessionHello, PROTOCOL_VERSION};

use crate::error::EngineError;
use crate::EngineResult;

/// The settings for the next (or current) broadcast.
///
/// Everything except the title and custom data is frozen while a broadcast
/// is connecting or live. Those two setters return the control message to
/// push to the server when a broadcast is live.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    settings: BroadcastSettings,
}

impl SessionSettings {
    pub fn new(settings: BroadcastSettings) -> Self {
        Self { settings }
    }

    pub fn get(&self) -> &BroadcastSettings {
        &self.settings
    }

    fn check_mutable(operation: &'static str, state: &SessionState) -> EngineResult<()> {
        if state.is_broadcast_active() {
            return Err(EngineError::invalid_state(operation, state));
        }
        Ok(())
    }

    pub fn set_application_id(&mut self, state: &SessionState, id: String) -> EngineResult<()> {
        Self::check_mutable("change the application id", state)?;
        self.settings.application_id = id;
        Ok(())
    }

    pub fn set_author(&mut self, state: &SessionState, author: String) -> EngineResult<()> {
        Self::check_mutable("change the author", state)?;
        self.settings.author = author;
        Ok(())
    }

    pub fn set_save_on_server(&mut self, state: &SessionState, save: bool) -> EngineResult<()> {
        Self::check_mutable("change save on server", state)?;
        self.settings.save_on_server = save;
        Ok(())
    }

    pub fn set_save_locally(&mut self, state: &SessionState, save: bool) -> EngineResult<()> {
        Self::check_mutable("change save locally", state)?;
        self.settings.save_locally = save;
        Ok(())
    }

    pub fn set_local_path(&mut self, state: &SessionState, path: Option<String>) -> EngineResult<()> {
        Self::check_mutable("change the local path", state)?;
        if path.as_deref().is_some_and(str::is_empty) {
            return Err(EngineError::InvalidArgument("empty local path".to_string()));
        }
        self.settings.local_path = path;
        Ok(())
    }

    pub fn set_talkback(&mut self, state: &SessionState, enabled: bool) -> EngineResult<()> {
        Self::check_mutable("change talkback", state)?;
        self.settings.talkback = enabled;
        Ok(())
    }

    pub fn set_talkback_mix(&mut self, state: &SessionState, enabled: bool) -> EngineResult<()> {
        Self::check_mutable("change talkback mix", state)?;
        self.settings.talkback_mix = enabled;
        Ok(())
    }

    pub fn set_send_position(&mut self, state: &SessionState, enabled: bool) -> EngineResult<()> {
        Self::check_mutable("change position reporting", state)?;
        self.settings.send_position = enabled;
        Ok(())
    }

    pub fn set_audio_quality(&mut self, state: &SessionState, quality: AudioQuality) -> EngineResult<()> {
        Self::check_mutable("change the audio quality", state)?;
        self.settings.audio_quality = quality;
        Ok(())
    }

    /// Always allowed.
    pub fn set_title(&mut self, state: &SessionState, title: String) -> Option<ControlMessage> {
        self.settings.title = title;
        state.is_broadcasting().then(|| ControlMessage::UpdateTitle {
            title: self.settings.title.clone(),
        })
    }

    /// Always allowed, limited to [`MAX_CUSTOM_DATA_BYTES`].
    pub fn set_custom_data(
        &mut self,
        state: &SessionState,
        custom_data: String,
    ) -> EngineResult<Option<ControlMessage>> {
        if custom_data.len() > MAX_CUSTOM_DATA_BYTES {
            return Err(EngineError::InvalidArgument(format!(
                "custom data is {} bytes, limit is {}",
                custom_data.len(),
                MAX_CUSTOM_DATA_BYTES
            )));
        }
        self.settings.custom_data = custom_data;
        Ok(state.is_broadcasting().then(|| ControlMessage::UpdateCustomData {
            custom_data: self.settings.custom_data.clone(),
        }))
    }

    /// Opening message for a broadcast with the given top video size.
    pub fn hello(&self, video: (u32, u32)) -> SessionHello {
        let s = &self.settings;
        SessionHello {
            protocol_version: PROTOCOL_VERSION,
            application_id: s.application_id.clone(),
            author: s.author.clone(),
            title: s.title.clone(),
            custom_data: s.custom_data.clone(),
            save_on_server: s.save_on_server,
            talkback: s.talkback,
            send_position: s.send_position,
            video_width: video.0,
            video_height: video.1,
            audio_bitrate_kbps: s.audio_quality.bitrate_kbps(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_ipc::StartupPhase;

    fn broadcasting() -> SessionState {
        SessionState::Broadcasting {
            broadcast_id: "b1".into(),
        }
    }

    #[test]
    fn test_frozen_while_broadcast_active() {
        let mut settings = SessionSettings::default();
        let connecting = SessionState::Connecting {
            phase: StartupPhase::ConnectIngest,
        };

        for state in [connecting, broadcasting()] {
            assert!(matches!(
                settings.set_application_id(&state, "app".into()),
                Err(EngineError::InvalidState { .. })
            ));
            assert!(settings.set_talkback(&state, true).is_err());
            assert!(settings.set_audio_quality(&state, AudioQuality::Low).is_err());
        }
        assert!(settings.get().application_id.is_empty());
        assert!(!settings.get().talkback);

        settings
            .set_application_id(&SessionState::Capturing, "app".into())
            .unwrap();
        assert_eq!(settings.get().application_id, "app");
    }

    #[test]
    fn test_title_pushed_only_when_live() {
        let mut settings = SessionSettings::default();
        assert!(settings
            .set_title(&SessionState::Capturing, "first".into())
            .is_none());
        assert_eq!(
            settings.set_title(&broadcasting(), "second".into()),
            Some(ControlMessage::UpdateTitle {
                title: "second".into()
            })
        );
        assert_eq!(settings.get().title, "second");
    }

    #[test]
    fn test_custom_data_limit() {
        let mut settings = SessionSettings::default();
        let at_limit = "x".repeat(MAX_CUSTOM_DATA_BYTES);
        assert!(settings
            .set_custom_data(&broadcasting(), at_limit)
            .unwrap()
            .is_some());

        let over = "x".repeat(MAX_CUSTOM_DATA_BYTES + 1);
        assert!(matches!(
            settings.set_custom_data(&SessionState::Capturing, over),
            Err(EngineError::InvalidArgument(_))
        ));
        assert_eq!(settings.get().custom_data.len(), MAX_CUSTOM_DATA_BYTES);
    }

    #[test]
    fn test_hello_carries_settings() {
        let mut settings = SessionSettings::default();
        let state = SessionState::Capturing;
        settings.set_application_id(&state, "app".into()).unwrap();
        settings.set_talkback(&state, true).unwrap();
        settings.set_audio_quality(&state, AudioQuality::Off).unwrap();

        let hello = settings.hello((1280, 720));
        assert_eq!(hello.protocol_version, PROTOCOL_VERSION);
        assert_eq!(hello.application_id, "app");
        assert!(hello.talkback);
        assert_eq!((hello.video_width, hello.video_height), (1280, 720));
        assert_eq!(hello.audio_bitrate_kbps, None);
    }
}
