//! Session lifecycle states

use serde::{Deserialize, Serialize};

/// Status of one device session.
///
/// `Connecting → Connected → Authenticated → (Disconnected | Error)`.
/// The last two are terminal; a reconnect always builds a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SessionStatus {
    Connecting = 0,
    Connected = 1,
    Authenticated = 2,
    Disconnected = 3,
    Error = 4,
}

impl SessionStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Authenticated,
            3 => Self::Disconnected,
            _ => Self::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Connected or authenticated: the device may exchange messages.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Allowed forward transitions.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Error)
                | (Connected, Authenticated)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Authenticated, Disconnected)
                | (Authenticated, Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Authenticated => "AUTHENTICATED",
            Self::Disconnected => "DISCONNECTED",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStatus::*;

    #[test]
    fn transitions_only_move_forward() {
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Error));
        assert!(!Authenticated.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Disconnected));
    }

    #[test]
    fn u8_roundtrip() {
        for s in [Connecting, Connected, Authenticated, Disconnected, Error] {
            assert_eq!(super::SessionStatus::from_u8(s as u8), s);
        }
    }
}
