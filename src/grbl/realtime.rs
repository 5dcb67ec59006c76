/// Single-byte commands the firmware acts on immediately, outside the line
/// protocol and outside receive-buffer accounting. See Serial.h in FluidNC.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeCommand {
    Reset = 0x18,
    StatusReport = b'?',
    CycleStart = b'~',
    FeedHold = b'!',
    FeedOverrideReset = 0x90,
    FeedOverridePlusTen = 0x91,
    FeedOverrideMinusTen = 0x92,
    FeedOverridePlusOne = 0x93,
    FeedOverrideMinusOne = 0x94,
    RapidOverrideReset = 0x95,
    RapidOverrideHalf = 0x96,
    RapidOverrideQuarter = 0x97,
    SpindleOverrideReset = 0x99,
    SpindleOverridePlusTen = 0x9A,
    SpindleOverrideMinusTen = 0x9B,
    SpindleOverridePlusOne = 0x9C,
    SpindleOverrideMinusOne = 0x9D,
}

impl RealtimeCommand {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Override nudges exposed through the submission API, decoupled from the
/// raw byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedOverride {
    FeedReset,
    FeedPlusTen,
    FeedMinusTen,
    FeedPlusOne,
    FeedMinusOne,
    RapidReset,
    RapidHalf,
    RapidQuarter,
    SpindleReset,
    SpindlePlusTen,
    SpindleMinusTen,
    SpindlePlusOne,
    SpindleMinusOne,
}

impl SpeedOverride {
    pub fn realtime(self) -> RealtimeCommand {
        match self {
            SpeedOverride::FeedReset => RealtimeCommand::FeedOverrideReset,
            SpeedOverride::FeedPlusTen => RealtimeCommand::FeedOverridePlusTen,
            SpeedOverride::FeedMinusTen => RealtimeCommand::FeedOverrideMinusTen,
            SpeedOverride::FeedPlusOne => RealtimeCommand::FeedOverridePlusOne,
            SpeedOverride::FeedMinusOne => RealtimeCommand::FeedOverrideMinusOne,
            SpeedOverride::RapidReset => RealtimeCommand::RapidOverrideReset,
            SpeedOverride::RapidHalf => RealtimeCommand::RapidOverrideHalf,
            SpeedOverride::RapidQuarter => RealtimeCommand::RapidOverrideQuarter,
            SpeedOverride::SpindleReset => RealtimeCommand::SpindleOverrideReset,
            SpeedOverride::SpindlePlusTen => RealtimeCommand::SpindleOverridePlusTen,
            SpeedOverride::SpindleMinusTen => RealtimeCommand::SpindleOverrideMinusTen,
            SpeedOverride::SpindlePlusOne => RealtimeCommand::SpindleOverridePlusOne,
            SpeedOverride::SpindleMinusOne => RealtimeCommand::SpindleOverrideMinusOne,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_values_match_the_wire_protocol() {
        assert_eq!(RealtimeCommand::Reset.byte(), 0x18);
        assert_eq!(RealtimeCommand::StatusReport.byte(), b'?');
        assert_eq!(RealtimeCommand::FeedHold.byte(), b'!');
        assert_eq!(RealtimeCommand::CycleStart.byte(), b'~');
        assert_eq!(SpeedOverride::FeedPlusTen.realtime().byte(), 0x91);
        assert_eq!(SpeedOverride::SpindleMinusOne.realtime().byte(), 0x9D);
    }
}
