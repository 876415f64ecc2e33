//! Transport state and playback position.

/// Coarse transport state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Where playback currently is inside the song.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackPosition {
    /// Row within the current pattern
    pub row: u16,
    /// Pattern index, if the sequence entry resolves
    pub pattern: Option<u8>,
    /// Position in the sequence (order list)
    pub sequence_index: usize,
}
