//! Global application state and its transition table

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    Init,
    ConnectingNetwork,
    AuthRequired,
    Authenticating,
    Ready,
    PlaybackActive,
    Error,
    Settings,
}

impl ApplicationState {
    pub const ALL: [ApplicationState; 8] = [
        Self::Init,
        Self::ConnectingNetwork,
        Self::AuthRequired,
        Self::Authenticating,
        Self::Ready,
        Self::PlaybackActive,
        Self::Error,
        Self::Settings,
    ];

    /// Stable number carried as the int payload of `StateChanged`.
    pub fn ordinal(self) -> i64 {
        self as i64
    }

    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.ordinal() == ordinal)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::ConnectingNetwork => "ConnectingNetwork",
            Self::AuthRequired => "AuthRequired",
            Self::Authenticating => "Authenticating",
            Self::Ready => "Ready",
            Self::PlaybackActive => "PlaybackActive",
            Self::Error => "Error",
            Self::Settings => "Settings",
        }
    }

    /// Whether `self -> to` is an edge of the state machine.
    pub fn can_transition_to(self, to: ApplicationState) -> bool {
        use ApplicationState::*;
        if to == Error {
            return true;
        }
        matches!(
            (self, to),
            (Init, ConnectingNetwork)
                | (ConnectingNetwork, AuthRequired | Ready)
                | (AuthRequired, Authenticating)
                | (Authenticating, Ready | AuthRequired)
                | (Ready, PlaybackActive | Settings)
                | (PlaybackActive, Ready | Settings)
                | (Settings, Ready)
                | (Error, ConnectingNetwork)
        )
    }

    pub fn is_operational(self) -> bool {
        matches!(self, Self::Ready | Self::PlaybackActive)
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
