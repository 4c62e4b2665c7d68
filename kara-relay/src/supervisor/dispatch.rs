//! Control command handling
//!
//! Each command runs inside the supervisor task against the owned session.
//! Domain errors are returned as [`SessionError`] and reported to the
//! requesting connection as an `error` event; they never change state.
//! Effect acknowledgements are sent after the change reached the engine
//! (parameter file written, or relaunch scheduled).

use std::time::Instant;

use kara_common::effects::EffectValue;
use kara_common::protocol::{Command, Envelope};
use kara_common::{EffectClass, EffectKey, EffectPatch, RelayEvent, VoicePreset};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::engine::{EngineProcess, LaunchSpec};
use super::session::{ConnectionId, Session, SessionState, Transport};
use super::{Message, PendingLaunch, Supervisor};
use crate::error::SessionError;

type CommandResult = std::result::Result<(), SessionError>;

impl Supervisor {
    pub(super) async fn dispatch(&mut self, conn: ConnectionId, envelope: Envelope) {
        debug!(%conn, action = %envelope.action, "Command received");

        let result = match Command::from_envelope(&envelope) {
            Ok(command) => self.execute(conn, command).await,
            Err(e) => Err(SessionError::from(e)),
        };

        if let Err(e) = result {
            warn!(%conn, action = %envelope.action, "Command rejected: {}", e);
            self.reply(conn, RelayEvent::error(e.to_string()));
        }
    }

    async fn execute(&mut self, conn: ConnectionId, command: Command) -> CommandResult {
        match command {
            Command::LoadSong {
                song_id,
                input_device,
                output_device,
            } => self.load_song(conn, song_id, input_device, output_device).await,
            Command::StartSession => self.start_session(conn).await,
            Command::StopSession => self.stop_session(conn),
            Command::Pause => self.echo_transport(conn, Transport::EchoPaused),
            Command::Resume => self.echo_transport(conn, Transport::Playing),
            Command::RefreshSongs => {
                let songs = self.catalog.refresh().await;
                self.reply(
                    conn,
                    RelayEvent::SongsList {
                        songs: songs.as_ref().clone(),
                    },
                );
                Ok(())
            }
            Command::SetVoiceEffect { effect, value } => {
                self.set_voice_effect(conn, &effect, &value).await
            }
            Command::SetVoiceEffects { effects } => self.set_voice_effects(conn, effects).await,
            Command::SetVoicePreset { preset } => self.set_voice_preset(conn, &preset).await,
            Command::Unknown(action) => {
                warn!(%conn, "Unknown action ignored: {}", action);
                Ok(())
            }
        }
    }

    /// Session `conn` is allowed to control
    fn controlled_session(&mut self, conn: ConnectionId) -> Result<&mut Session, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        if !session.may_control(conn) {
            return Err(SessionError::NotSessionOwner);
        }
        session.owner = Some(conn);
        Ok(session)
    }

    async fn load_song(
        &mut self,
        conn: ConnectionId,
        song_id: String,
        input_device: Option<String>,
        output_device: Option<String>,
    ) -> CommandResult {
        let song = self
            .catalog
            .find(&song_id)
            .await
            .ok_or_else(|| SessionError::SongNotFound(song_id.clone()))?;

        match self.session.as_mut() {
            Some(session) => {
                if !session.may_control(conn) {
                    return Err(SessionError::NotSessionOwner);
                }
                session.reload(song, input_device, output_device, conn);
            }
            None => {
                self.session = Some(Session::new(song, input_device, output_device, conn));
            }
        }

        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        info!(
            %conn,
            song = %session.song.id,
            input = %session.input_device,
            output = %session.output_device,
            "Song loaded"
        );
        self.reply(
            conn,
            RelayEvent::SongLoaded {
                song: session.song.clone(),
                input_device: session.input_device.clone(),
                output_device: session.output_device.clone(),
            },
        );

        self.autostart_epoch += 1;
        self.schedule(
            self.timing.autostart_delay,
            Message::AutoStart {
                epoch: self.autostart_epoch,
            },
        );
        Ok(())
    }

    pub(super) async fn auto_start(&mut self, epoch: u64) {
        if epoch != self.autostart_epoch {
            debug!(epoch, "Stale auto-start ignored");
            return;
        }
        let Some(owner) = self.session.as_ref().and_then(|session| session.owner) else {
            return;
        };

        info!(%owner, "Auto-starting session");
        if let Err(e) = self.start_session(owner).await {
            warn!(%owner, "Auto-start failed: {}", e);
            self.reply(owner, RelayEvent::error(e.to_string()));
        }
    }

    async fn start_session(&mut self, conn: ConnectionId) -> CommandResult {
        let session = match self.controlled_session(conn) {
            Err(SessionError::NoActiveSession) => return Err(SessionError::NoSongLoaded),
            other => other?,
        };
        if session.is_running() {
            return Err(SessionError::SessionInProgress);
        }
        let song = session.song.clone();

        if self.pending_launch.is_some() {
            return Err(SessionError::SessionInProgress);
        }
        let song_dir = self.catalog.song_dir(&song);
        if !song_dir.is_dir() {
            return Err(SessionError::SongDirectoryMissing(song.directory));
        }

        // A manual start supersedes a pending auto-start
        self.autostart_epoch += 1;

        if !self.retiring.is_empty() {
            debug!("Start deferred until the previous engine exits");
            self.relaunch_epoch += 1;
            self.pending_launch = Some(PendingLaunch {
                epoch: self.relaunch_epoch,
                due: true,
            });
            return Ok(());
        }
        self.launch().await
    }

    /// Spawn the engine for the current session
    ///
    /// A spawn failure discards the session.
    async fn launch(&mut self) -> CommandResult {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::NoSongLoaded);
        };

        if let Err(e) = self
            .params
            .write_params(session.effects.hot_param_entries())
            .await
        {
            error!("Failed to write initial parameters: {}", e);
        }

        let spec = LaunchSpec::for_session(&self.engine, session);
        self.next_generation += 1;
        let generation = self.next_generation;

        match EngineProcess::spawn(&spec, generation, self.engine_tx.clone()) {
            Ok(process) => {
                info!(
                    generation,
                    pid = ?process.pid,
                    song = %session.song.id,
                    "Engine launched"
                );
                session.started_at = Instant::now();
                session.transport = Transport::Playing;
                session.state = SessionState::Running;
                session.process = Some(process);
                self.launches += 1;
                Ok(())
            }
            Err(e) => {
                error!(generation, "Failed to launch {}: {}", spec.program, e);
                self.session = None;
                Err(SessionError::SpawnFailed(e.to_string()))
            }
        }
    }

    /// Launch if a pending launch is due and no retired process remains
    pub(super) async fn try_pending_launch(&mut self) {
        match self.pending_launch {
            Some(pending) if pending.due && self.retiring.is_empty() => {}
            _ => return,
        }
        self.pending_launch = None;

        let Some(session) = self.session.as_ref() else {
            return;
        };
        // Captured first: a spawn failure discards the session
        let owner = session.owner;

        info!("Relaunching engine");
        if let Err(e) = self.launch().await {
            warn!("Relaunch failed: {}", e);
            match owner {
                Some(owner) => self.reply(owner, RelayEvent::error(e.to_string())),
                None => self.bus.emit_lossy(RelayEvent::error(e.to_string())),
            }
        }
    }

    fn stop_session(&mut self, conn: ConnectionId) -> CommandResult {
        if let Some(session) = self.session.as_ref() {
            if !session.may_control(conn) {
                return Err(SessionError::NotSessionOwner);
            }
        }

        info!(%conn, "Stopping session");
        self.autostart_epoch += 1;
        self.pending_launch = None;
        self.halt_process();
        self.session = None;
        self.reply(conn, RelayEvent::stopped());
        Ok(())
    }

    fn echo_transport(&mut self, conn: ConnectionId, transport: Transport) -> CommandResult {
        let session = match self.controlled_session(conn) {
            Err(SessionError::NoActiveSession) => {
                debug!(%conn, "Pause/resume without a session ignored");
                return Ok(());
            }
            other => other?,
        };

        session.transport = transport;
        let event = RelayEvent::State {
            playing: transport == Transport::Playing,
            position_sec: session.position_sec(),
            song: None,
        };
        self.reply(conn, event);
        Ok(())
    }

    async fn set_voice_effect(
        &mut self,
        conn: ConnectionId,
        effect: &str,
        value: &Value,
    ) -> CommandResult {
        let session = self.controlled_session(conn)?;
        let key: EffectKey = effect.parse()?;
        let value = EffectValue::from_json(key, value)?;
        let stored = session.effects.set(key, value);

        info!(%conn, effect = %key, value = ?stored, "Voice effect updated");
        self.propagate(&[key]).await;
        self.reply(
            conn,
            RelayEvent::VoiceEffectUpdated {
                effect: key.name().to_string(),
                value: stored.to_json(),
            },
        );
        Ok(())
    }

    async fn set_voice_effects(
        &mut self,
        conn: ConnectionId,
        effects: Map<String, Value>,
    ) -> CommandResult {
        let session = self.controlled_session(conn)?;
        let patch = EffectPatch::from_json(&Value::Object(effects))?;
        let touched = session.effects.apply(&patch);
        let merged = session.effects;

        info!(%conn, keys = ?touched, "Voice effects updated");
        self.propagate(&touched).await;
        self.reply(conn, RelayEvent::VoiceEffectsUpdated { effects: merged });
        Ok(())
    }

    async fn set_voice_preset(&mut self, conn: ConnectionId, name: &str) -> CommandResult {
        let session = self.controlled_session(conn)?;
        let preset: VoicePreset = name.parse()?;
        let settings = preset.patch();
        let touched = session.effects.apply(&settings);

        info!(%conn, preset = preset.name(), "Voice preset applied");
        self.propagate(&touched).await;
        self.reply(
            conn,
            RelayEvent::VoicePresetApplied {
                preset: preset.name().to_string(),
                settings,
            },
        );
        Ok(())
    }

    /// Push changed effects to a running engine
    ///
    /// Cold keys restart the engine after the settling delay; hot keys go
    /// through the parameter file. Without a running engine nothing happens:
    /// the next launch uses the stored effects.
    async fn propagate(&mut self, touched: &[EffectKey]) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.is_running() {
            return;
        }

        let cold = touched
            .iter()
            .any(|key| key.class() == EffectClass::Cold);
        if cold {
            info!("Cold effect changed, restarting engine");
            self.halt_process();
            self.relaunch_epoch += 1;
            self.pending_launch = Some(PendingLaunch {
                epoch: self.relaunch_epoch,
                due: false,
            });
            self.schedule(
                self.timing.restart_delay,
                Message::RelaunchDue {
                    epoch: self.relaunch_epoch,
                },
            );
            return;
        }

        let entries = session.effects.param_entries(touched);
        if entries.is_empty() {
            return;
        }
        match self.params.write_params(entries).await {
            Ok(_) => debug!("Hot parameters written"),
            Err(e) => error!("Failed to update parameter file: {}", e),
        }
    }
}
