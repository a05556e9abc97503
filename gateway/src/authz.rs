//! Authorization gate: enforces the sender × command-kind matrix.
//! Untrusted senders may only ever produce a security-event audit record or
//! a silent drop; they never reach the detector stage.

use crate::classifier::PeerIdentity;
use crate::mavlink::CommandKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// Sender is trusted, or the kind is admitted regardless of trust.
    Admit,
    /// Untrusted sender attempted a command-class message; log a security event.
    BlockSecurityEvent,
    /// Untrusted sender sent something harmless (heartbeat, telemetry); drop silently.
    DropSilent,
}

/// Command kinds that are meaningful "command traffic" rather than passive
/// telemetry/heartbeats.
fn is_command_class(kind: CommandKind) -> bool {
    matches!(
        kind,
        CommandKind::Navigation
            | CommandKind::ModeChange
            | CommandKind::ArmDisarm
            | CommandKind::TakeoffLand
            | CommandKind::MissionUpdate
            | CommandKind::ParameterChange
            | CommandKind::Emergency
    )
}

pub fn check(identity: PeerIdentity, kind: CommandKind) -> GateVerdict {
    if identity == PeerIdentity::TrustedGcs {
        return GateVerdict::Admit;
    }
    if is_command_class(kind) {
        GateVerdict::BlockSecurityEvent
    } else {
        GateVerdict::DropSilent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_sender_admits_everything() {
        assert_eq!(
            check(PeerIdentity::TrustedGcs, CommandKind::ArmDisarm),
            GateVerdict::Admit
        );
        assert_eq!(
            check(PeerIdentity::TrustedGcs, CommandKind::Unknown),
            GateVerdict::Admit
        );
    }

    #[test]
    fn untrusted_command_class_is_blocked_as_security_event() {
        assert_eq!(
            check(PeerIdentity::Untrusted, CommandKind::ArmDisarm),
            GateVerdict::BlockSecurityEvent
        );
        assert_eq!(
            check(PeerIdentity::Untrusted, CommandKind::MissionUpdate),
            GateVerdict::BlockSecurityEvent
        );
        assert_eq!(
            check(PeerIdentity::Untrusted, CommandKind::Emergency),
            GateVerdict::BlockSecurityEvent
        );
    }

    #[test]
    fn untrusted_heartbeat_is_dropped_silently() {
        assert_eq!(
            check(PeerIdentity::Untrusted, CommandKind::TelemetryRequest),
            GateVerdict::DropSilent
        );
        assert_eq!(
            check(PeerIdentity::Untrusted, CommandKind::Unknown),
            GateVerdict::DropSilent
        );
    }
}
