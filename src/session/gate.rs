//! Call-mode gate
//!
//! Pure decision table mapping (call mode, audio class) to allow/deny.
//! `listen` exposes the source's captured audio without opening a return
//! channel, `talk` is viewer-to-source only, `both` is full duplex. Every
//! new message class must get an explicit row here before it ships.

use crate::protocol::{CallMode, MessageClass};

/// Whether an audio message of `class` may be forwarded under `mode`.
pub fn allows(mode: CallMode, class: MessageClass) -> bool {
    match (mode, class) {
        (CallMode::Off, _) => false,
        (CallMode::Listen, MessageClass::SourceSystemAudio) => true,
        (CallMode::Listen, MessageClass::SourceMicAudio) => true,
        (CallMode::Listen, MessageClass::ViewerVoice) => false,
        (CallMode::Talk, MessageClass::ViewerVoice) => true,
        (CallMode::Talk, _) => false,
        (CallMode::Both, _) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallMode::*;
    use MessageClass::*;

    #[test]
    fn test_gate_table_is_total_and_exact() {
        let expected = [
            (Off, SourceSystemAudio, false),
            (Off, SourceMicAudio, false),
            (Off, ViewerVoice, false),
            (Listen, SourceSystemAudio, true),
            (Listen, SourceMicAudio, true),
            (Listen, ViewerVoice, false),
            (Talk, SourceSystemAudio, false),
            (Talk, SourceMicAudio, false),
            (Talk, ViewerVoice, true),
            (Both, SourceSystemAudio, true),
            (Both, SourceMicAudio, true),
            (Both, ViewerVoice, true),
        ];

        for (mode, class, allow) in expected {
            assert_eq!(
                allows(mode, class),
                allow,
                "gate mismatch for mode={:?} class={:?}",
                mode,
                class
            );
        }
    }
}
