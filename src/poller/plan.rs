//! Per-session measurement plan: active slots, setup commands and cadence.

use crate::error::{AppResult, DaqError};
use crate::instrument::{InstrumentProfile, MeasurementFunction};
use std::collections::HashSet;
use std::time::Duration;

/// One active measurement slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    /// Position in the caller's ordered measurement list
    pub slot_index: usize,
    /// Quantity sampled in this slot
    pub function: MeasurementFunction,
    /// Query issued each cycle
    pub query_command: &'static str,
    /// Unit label for readings of this slot
    pub unit: &'static str,
}

/// Validated slots plus the deduplicated one-time setup commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPlan {
    /// Slots in configured order
    pub requests: Vec<PollRequest>,
    /// Setup commands in first-occurrence order, each at most once
    pub setup_commands: Vec<&'static str>,
}

impl PollPlan {
    /// Builds the plan for `functions` (slot `i` samples `functions[i]`).
    ///
    /// # Errors
    ///
    /// All checks run before any I/O:
    /// - `NoMeasurements` when `functions` is empty
    /// - `DuplicateFunctions` when a function appears twice
    /// - `MultiFunctionUnsupported` when the model samples one function at a time
    /// - `FunctionNotSupported` when the profile lacks a function
    pub fn build(profile: &InstrumentProfile, functions: &[MeasurementFunction]) -> AppResult<Self> {
        if functions.is_empty() {
            return Err(DaqError::NoMeasurements);
        }

        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for function in functions {
            if !seen.insert(*function) && !duplicates.contains(function) {
                duplicates.push(*function);
            }
        }
        if !duplicates.is_empty() {
            return Err(DaqError::DuplicateFunctions(duplicates));
        }

        if functions.len() > 1 && !profile.allows_multi_function {
            return Err(DaqError::MultiFunctionUnsupported(profile.instrument));
        }

        let mut requests = Vec::with_capacity(functions.len());
        let mut setup_commands: Vec<&'static str> = Vec::new();
        for (slot_index, function) in functions.iter().enumerate() {
            let command = profile
                .command(*function)
                .ok_or(DaqError::FunctionNotSupported {
                    function: *function,
                    instrument: profile.instrument,
                })?;

            requests.push(PollRequest {
                slot_index,
                function: *function,
                query_command: command.query_command,
                unit: command.unit,
            });

            for setup in command.setup_commands {
                if !setup_commands.contains(setup) {
                    setup_commands.push(setup);
                }
            }
        }

        Ok(Self {
            requests,
            setup_commands,
        })
    }
}

/// Polling interval validated against the instrument-agnostic range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollInterval(Duration);

impl PollInterval {
    /// Shortest accepted interval in milliseconds.
    pub const MIN_MS: u64 = 200;
    /// Longest accepted interval in milliseconds.
    pub const MAX_MS: u64 = 60_000;

    /// Validates `ms` against `MIN_MS..=MAX_MS`.
    pub fn from_millis(ms: u64) -> AppResult<Self> {
        if (Self::MIN_MS..=Self::MAX_MS).contains(&ms) {
            Ok(Self(Duration::from_millis(ms)))
        } else {
            Err(DaqError::IntervalOutOfRange(ms))
        }
    }

    /// Interval as a `Duration`.
    pub fn as_duration(self) -> Duration {
        self.0
    }

    /// Interval in whole milliseconds.
    pub fn as_millis(self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self(Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{lookup, InstrumentType};

    #[test]
    fn test_plan_for_power_supply_dedups_setup() {
        let profile = lookup(InstrumentType::OwonSpe6103);
        let plan = PollPlan::build(
            profile,
            &[MeasurementFunction::Current, MeasurementFunction::Voltage],
        )
        .unwrap();

        assert_eq!(plan.setup_commands, vec!["SYSTem:REMote"]);
        assert_eq!(plan.requests.len(), 2);
        assert_eq!(plan.requests[0].slot_index, 0);
        assert_eq!(plan.requests[0].function, MeasurementFunction::Current);
        assert_eq!(plan.requests[0].query_command, "MEASure:CURRent?");
        assert_eq!(plan.requests[1].slot_index, 1);
        assert_eq!(plan.requests[1].unit, "V");
    }

    #[test]
    fn test_plan_for_multimeter_single_slot() {
        let profile = lookup(InstrumentType::Mp730889);
        let plan = PollPlan::build(profile, &[MeasurementFunction::Voltage]).unwrap();
        assert_eq!(plan.setup_commands, vec!["SYSTem:REMote", "CONFigure:VOLTage:DC"]);
        assert_eq!(plan.requests[0].query_command, "MEAS1?");
    }

    #[test]
    fn test_duplicate_functions_rejected() {
        let profile = lookup(InstrumentType::OwonSpe6103);
        let err = PollPlan::build(
            profile,
            &[
                MeasurementFunction::Voltage,
                MeasurementFunction::Voltage,
                MeasurementFunction::Voltage,
            ],
        )
        .unwrap_err();
        match err {
            DaqError::DuplicateFunctions(dups) => {
                assert_eq!(dups, vec![MeasurementFunction::Voltage])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_multimeter_rejects_two_functions() {
        let profile = lookup(InstrumentType::Mp730889);
        let err = PollPlan::build(
            profile,
            &[MeasurementFunction::Voltage, MeasurementFunction::Current],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DaqError::MultiFunctionUnsupported(InstrumentType::Mp730889)
        ));
    }

    #[test]
    fn test_empty_plan_rejected() {
        let profile = lookup(InstrumentType::OwonSpe6103);
        assert!(matches!(
            PollPlan::build(profile, &[]),
            Err(DaqError::NoMeasurements)
        ));
    }

    #[test]
    fn test_interval_bounds() {
        assert!(PollInterval::from_millis(199).is_err());
        assert!(PollInterval::from_millis(60_001).is_err());
        assert_eq!(PollInterval::from_millis(200).unwrap().as_millis(), 200);
        assert_eq!(
            PollInterval::from_millis(60_000).unwrap().as_duration(),
            Duration::from_secs(60)
        );
        assert_eq!(PollInterval::default().as_millis(), 1000);
    }
}
