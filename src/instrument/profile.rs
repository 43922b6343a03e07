//! Static instrument catalog and identity validation.
//!
//! Each [`InstrumentProfile`] is built once, on first lookup, and then shared
//! read-only for the life of the process.

use super::{InstrumentType, MeasurementFunction};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Commands needed to activate and sample one measurement function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementCommand {
    /// Function this command samples.
    pub function: MeasurementFunction,
    /// One-time commands sent before polling starts, in order.
    pub setup_commands: &'static [&'static str],
    /// Query issued once per cycle.
    pub query_command: &'static str,
    /// Unit label attached to every reading.
    pub unit: &'static str,
}

/// Identity signature and function-to-command table of one instrument model.
#[derive(Debug, Clone)]
pub struct InstrumentProfile {
    /// Model this profile describes.
    pub instrument: InstrumentType,
    /// Query returning the device identity string.
    pub identity_query: &'static str,
    /// Upper-case tokens, any of which identifies this model.
    pub identity_tokens: &'static [&'static str],
    /// Whether more than one function may be sampled in the same session.
    pub allows_multi_function: bool,
    commands: BTreeMap<MeasurementFunction, MeasurementCommand>,
}

impl InstrumentProfile {
    fn new(
        instrument: InstrumentType,
        identity_query: &'static str,
        identity_tokens: &'static [&'static str],
        allows_multi_function: bool,
        commands: Vec<MeasurementCommand>,
    ) -> Self {
        // keyed by the command's own function so lookups always round-trip
        let commands = commands.into_iter().map(|c| (c.function, c)).collect();
        Self {
            instrument,
            identity_query,
            identity_tokens,
            allows_multi_function,
            commands,
        }
    }

    /// Command for `function`, if this model offers it.
    pub fn command(&self, function: MeasurementFunction) -> Option<&MeasurementCommand> {
        self.commands.get(&function)
    }

    /// Functions offered by this model, in enum order.
    pub fn functions(&self) -> impl Iterator<Item = MeasurementFunction> + '_ {
        self.commands.keys().copied()
    }

    /// Iterates the full command table.
    pub fn commands(&self) -> impl Iterator<Item = (&MeasurementFunction, &MeasurementCommand)> {
        self.commands.iter()
    }

    /// Whether `identity` belongs to this model. See [`identity_matches`].
    pub fn matches_identity(&self, identity: &str) -> bool {
        identity_matches(self, identity)
    }
}

static MP730889: Lazy<InstrumentProfile> = Lazy::new(|| {
    InstrumentProfile::new(
        InstrumentType::Mp730889,
        "*IDN?",
        &["MULTICOMP", "MP730889"],
        // voltage and current share the single MEAS1? channel
        false,
        vec![
            MeasurementCommand {
                function: MeasurementFunction::Voltage,
                setup_commands: &["SYSTem:REMote", "CONFigure:VOLTage:DC"],
                query_command: "MEAS1?",
                unit: "V",
            },
            MeasurementCommand {
                function: MeasurementFunction::Current,
                setup_commands: &["SYSTem:REMote", "CONFigure:CURRent:DC"],
                query_command: "MEAS1?",
                unit: "A",
            },
        ],
    )
});

static OWON_SPE6103: Lazy<InstrumentProfile> = Lazy::new(|| {
    InstrumentProfile::new(
        InstrumentType::OwonSpe6103,
        "*IDN?",
        &["OWON", "SPE6103"],
        true,
        vec![
            MeasurementCommand {
                function: MeasurementFunction::Voltage,
                setup_commands: &["SYSTem:REMote"],
                query_command: "MEASure:VOLTage?",
                unit: "V",
            },
            MeasurementCommand {
                function: MeasurementFunction::Current,
                setup_commands: &["SYSTem:REMote"],
                query_command: "MEASure:CURRent?",
                unit: "A",
            },
        ],
    )
});

/// Returns the catalog profile for `instrument`. Total over every variant.
pub fn lookup(instrument: InstrumentType) -> &'static InstrumentProfile {
    match instrument {
        InstrumentType::Mp730889 => &MP730889,
        InstrumentType::OwonSpe6103 => &OWON_SPE6103,
    }
}

/// True iff the upper-cased `identity` contains at least one of the
/// profile's expected tokens. A miss is `false`, never an error.
pub fn identity_matches(profile: &InstrumentProfile, identity: &str) -> bool {
    let normalized = identity.to_uppercase();
    profile
        .identity_tokens
        .iter()
        .any(|token| normalized.contains(&token.to_uppercase()))
}
