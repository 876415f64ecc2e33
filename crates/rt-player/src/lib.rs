//! Headless playback controller for retrack.
//!
//! Owns the scheduler on a background control thread (the cooperative
//! control task of the engine) and exposes the transport API plus event
//! subscription. The thread pumps the scheduler on a fixed ~33 ms timer,
//! the cadence used when a host has no frame clock to offer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use rt_engine::{AudioClock, EngineEvent, Scheduler, VoiceRenderer};
use rt_ir::{PlaybackPosition, Song, TransportState};

const PUMP_INTERVAL: Duration = Duration::from_millis(33);

type PositionListener = Box<dyn FnMut(PlaybackPosition) + Send>;
type StateListener = Box<dyn FnMut(TransportState) + Send>;
type ErrorListener = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
struct Listeners {
    position: Vec<PositionListener>,
    state: Vec<StateListener>,
    error: Vec<ErrorListener>,
}

#[derive(Default)]
struct SharedView {
    position: PlaybackPosition,
    transport: TransportState,
}

enum Command {
    Load(Arc<Song>, usize),
    Play,
    Pause,
    Stop,
    Seek(u16),
    SetBpm(u16),
    LoopPattern(bool),
    LoopSong(bool),
    Foreground(bool),
    Shutdown,
}

/// The playback controller.
pub struct Player {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
    listeners: Arc<Mutex<Listeners>>,
    view: Arc<Mutex<SharedView>>,
}

impl Player {
    /// Spawn the control thread. The factory runs on that thread, so the
    /// clock and renderer never have to be `Send` (audio streams rarely
    /// are).
    pub fn new<C, R, F>(make: F) -> Self
    where
        C: AudioClock + 'static,
        R: VoiceRenderer + 'static,
        F: FnOnce() -> (C, R) + Send + 'static,
    {
        let (tx, rx) = channel::<Command>();
        let listeners: Arc<Mutex<Listeners>> = Arc::default();
        let view: Arc<Mutex<SharedView>> = Arc::default();

        let thread_listeners = listeners.clone();
        let thread_view = view.clone();
        let thread = std::thread::spawn(move || {
            let (clock, renderer) = make();
            let mut scheduler = Scheduler::new(clock, renderer);
            loop {
                match rx.recv_timeout(PUMP_INTERVAL) {
                    Ok(Command::Shutdown) => break,
                    Ok(command) => apply_command(&mut scheduler, command),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                // drain anything that queued up behind the first command
                while let Ok(command) = rx.try_recv() {
                    match command {
                        Command::Shutdown => return,
                        other => apply_command(&mut scheduler, other),
                    }
                }
                scheduler.advance();
                for event in scheduler.drain_events() {
                    dispatch(&thread_listeners, &thread_view, event);
                }
            }
        });

        Self {
            commands: tx,
            thread: Some(thread),
            listeners,
            view,
        }
    }

    // --- transport ---

    pub fn load_song(&self, song: Arc<Song>, start_sequence_index: usize) {
        let _ = self.commands.send(Command::Load(song, start_sequence_index));
    }

    pub fn play(&self) {
        let _ = self.commands.send(Command::Play);
    }

    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn seek(&self, row: u16) {
        let _ = self.commands.send(Command::Seek(row));
    }

    pub fn set_bpm(&self, bpm: u16) {
        let _ = self.commands.send(Command::SetBpm(bpm));
    }

    pub fn set_loop_current_pattern(&self, enabled: bool) {
        let _ = self.commands.send(Command::LoopPattern(enabled));
    }

    pub fn set_loop_song(&self, enabled: bool) {
        let _ = self.commands.send(Command::LoopSong(enabled));
    }

    /// Host visibility hint; background hosts get a wider look-ahead.
    pub fn set_foreground(&self, foreground: bool) {
        let _ = self.commands.send(Command::Foreground(foreground));
    }

    // --- observation ---

    pub fn position(&self) -> PlaybackPosition {
        self.view.lock().map(|v| v.position).unwrap_or_default()
    }

    pub fn transport(&self) -> TransportState {
        self.view.lock().map(|v| v.transport).unwrap_or_default()
    }

    pub fn on_position(&self, listener: impl FnMut(PlaybackPosition) + Send + 'static) {
        if let Ok(mut l) = self.listeners.lock() {
            l.position.push(Box::new(listener));
        }
    }

    pub fn on_state(&self, listener: impl FnMut(TransportState) + Send + 'static) {
        if let Ok(mut l) = self.listeners.lock() {
            l.state.push(Box::new(listener));
        }
    }

    pub fn on_error(&self, listener: impl FnMut(&str) + Send + 'static) {
        if let Ok(mut l) = self.listeners.lock() {
            l.error.push(Box::new(listener));
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn apply_command<C: AudioClock, R: VoiceRenderer>(
    scheduler: &mut Scheduler<C, R>,
    command: Command,
) {
    match command {
        Command::Load(song, start) => scheduler.load_song(song, start),
        Command::Play => scheduler.play(),
        Command::Pause => scheduler.pause(),
        Command::Stop => scheduler.stop(),
        Command::Seek(row) => scheduler.seek(row),
        Command::SetBpm(bpm) => scheduler.set_bpm(bpm),
        Command::LoopPattern(enabled) => scheduler.set_loop_pattern(enabled),
        Command::LoopSong(enabled) => scheduler.set_loop_song(enabled),
        Command::Foreground(foreground) => scheduler.set_foreground(foreground),
        Command::Shutdown => {}
    }
}

/// Deliver one engine event to every listener. A panicking listener is
/// logged and skipped; the rest still run.
fn dispatch(listeners: &Mutex<Listeners>, view: &Mutex<SharedView>, event: EngineEvent) {
    match &event {
        EngineEvent::Position(position) => {
            if let Ok(mut v) = view.lock() {
                v.position = *position;
            }
        }
        EngineEvent::State(state) => {
            if let Ok(mut v) = view.lock() {
                v.transport = *state;
            }
        }
        EngineEvent::Error(_) => {}
    }

    let Ok(mut listeners) = listeners.lock() else {
        return;
    };
    match event {
        EngineEvent::Position(position) => {
            for listener in &mut listeners.position {
                if catch_unwind(AssertUnwindSafe(|| listener(position))).is_err() {
                    warn!("position listener panicked");
                }
            }
        }
        EngineEvent::State(state) => {
            for listener in &mut listeners.state {
                if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                    warn!("state listener panicked");
                }
            }
        }
        EngineEvent::Error(message) => {
            for listener in &mut listeners.error {
                if catch_unwind(AssertUnwindSafe(|| listener(&message))).is_err() {
                    warn!("error listener panicked");
                }
            }
        }
    }
}
