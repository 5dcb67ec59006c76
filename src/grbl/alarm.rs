use std::collections::BTreeSet;

/// Prefix FluidNC uses when reporting which limit switch pinned an alarm.
pub const LIMIT_MARKER: &str = "Active limit switch on ";

/// One tripped limit switch, identified the way the firmware names it: an
/// axis letter and a motor index on that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LimitAlarm {
    pub axis: char,
    pub motor: u8,
}

impl LimitAlarm {
    /// Setting command that disables hard limits for this motor so the
    /// machine can be jogged off the switch.
    pub fn unlock_command(&self) -> String {
        format!(
            "$/axes/{}/motor{}/hard_limits=false",
            self.axis.to_ascii_lowercase(),
            self.motor
        )
    }

    pub fn relock_command(&self) -> String {
        format!(
            "$/axes/{}/motor{}/hard_limits=true",
            self.axis.to_ascii_lowercase(),
            self.motor
        )
    }
}

/// Scans alarm/warning text for limit-switch reports of the form
/// `Active limit switch on <AXIS> axis motor <N>` and collects the
/// deduplicated set. Text with no such reports yields the empty set.
pub fn extract_alarms(text: &str) -> BTreeSet<LimitAlarm> {
    let mut alarms = BTreeSet::new();
    for line in text.lines() {
        let Some(index) = line.find(LIMIT_MARKER) else {
            continue;
        };
        let tail = &line[index + LIMIT_MARKER.len()..];
        let mut chars = tail.chars();
        let Some(axis) = chars.next().filter(|c| c.is_ascii_alphabetic()) else {
            continue;
        };
        let Some(rest) = chars.as_str().strip_prefix(" axis motor ") else {
            continue;
        };
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(motor) = digits.parse::<u8>() {
            alarms.insert(LimitAlarm {
                axis: axis.to_ascii_uppercase(),
                motor,
            });
        }
    }
    alarms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_deduplicates_limit_reports() {
        let text = "[MSG:WARN: Active limit switch on X axis motor 0]\n\
                    [MSG:WARN: Active limit switch on Z axis motor 1]\n\
                    [MSG:WARN: Active limit switch on X axis motor 0]";
        let alarms = extract_alarms(text);
        let expected: BTreeSet<_> = [
            LimitAlarm { axis: 'X', motor: 0 },
            LimitAlarm { axis: 'Z', motor: 1 },
        ]
        .into_iter()
        .collect();
        assert_eq!(alarms, expected);
    }

    #[test]
    fn unmatchable_text_yields_empty_set() {
        assert!(extract_alarms("ALARM:1").is_empty());
        assert!(extract_alarms("").is_empty());
        assert!(extract_alarms("Active limit switch on ").is_empty());
    }

    #[test]
    fn recovery_command_templates() {
        let alarm = LimitAlarm { axis: 'X', motor: 0 };
        assert_eq!(alarm.unlock_command(), "$/axes/x/motor0/hard_limits=false");
        assert_eq!(alarm.relock_command(), "$/axes/x/motor0/hard_limits=true");
    }
}
