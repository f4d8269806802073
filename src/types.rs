//! Core event types for the tmt-event system
//!
//! Every event is addressed by an [`EventKey`]: a source [`Prefix`]
//! (`<subsystem>.<component>`) followed by an [`EventName`], rendered as
//! `wfos.red.detector.filterWheel`. All types use camelCase JSON
//! serialization for wire compatibility.

use crate::error::{EventError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between key segments
pub const KEY_SEPARATOR: char = '.';

/// Id carried by the invalid-event sentinel
pub const INVALID_EVENT_ID: &str = "-1";

/// Canonical form of the key carried by [`Event::invalid`]
pub const INVALID_KEY: &str = "csw.invalid.*";

/// Characters reserved for key patterns and never allowed inside a key
const RESERVED_CHARS: &[char] = &['*', '?', '[', ']', '{', '}', '>'];

/// Observatory subsystem owning a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Aoesw,
    Aps,
    Cis,
    Csw,
    Dms,
    Dps,
    Enc,
    Esen,
    Esw,
    Gms,
    Iris,
    Irms,
    Lgsf,
    M1cs,
    M2cs,
    M3cs,
    Mcs,
    Nfiraos,
    Nscu,
    Oss,
    Pfcs,
    Psfr,
    Rtc,
    Rpg,
    Scms,
    Soss,
    Str,
    Sum,
    Tcs,
    Tinc,
    Wfos,
    Test,
}

impl Subsystem {
    /// Every known subsystem
    pub const ALL: [Subsystem; 32] = [
        Subsystem::Aoesw,
        Subsystem::Aps,
        Subsystem::Cis,
        Subsystem::Csw,
        Subsystem::Dms,
        Subsystem::Dps,
        Subsystem::Enc,
        Subsystem::Esen,
        Subsystem::Esw,
        Subsystem::Gms,
        Subsystem::Iris,
        Subsystem::Irms,
        Subsystem::Lgsf,
        Subsystem::M1cs,
        Subsystem::M2cs,
        Subsystem::M3cs,
        Subsystem::Mcs,
        Subsystem::Nfiraos,
        Subsystem::Nscu,
        Subsystem::Oss,
        Subsystem::Pfcs,
        Subsystem::Psfr,
        Subsystem::Rtc,
        Subsystem::Rpg,
        Subsystem::Scms,
        Subsystem::Soss,
        Subsystem::Str,
        Subsystem::Sum,
        Subsystem::Tcs,
        Subsystem::Tinc,
        Subsystem::Wfos,
        Subsystem::Test,
    ];

    /// Lowercase name used in keys, channels, and subjects
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Aoesw => "aoesw",
            Subsystem::Aps => "aps",
            Subsystem::Cis => "cis",
            Subsystem::Csw => "csw",
            Subsystem::Dms => "dms",
            Subsystem::Dps => "dps",
            Subsystem::Enc => "enc",
            Subsystem::Esen => "esen",
            Subsystem::Esw => "esw",
            Subsystem::Gms => "gms",
            Subsystem::Iris => "iris",
            Subsystem::Irms => "irms",
            Subsystem::Lgsf => "lgsf",
            Subsystem::M1cs => "m1cs",
            Subsystem::M2cs => "m2cs",
            Subsystem::M3cs => "m3cs",
            Subsystem::Mcs => "mcs",
            Subsystem::Nfiraos => "nfiraos",
            Subsystem::Nscu => "nscu",
            Subsystem::Oss => "oss",
            Subsystem::Pfcs => "pfcs",
            Subsystem::Psfr => "psfr",
            Subsystem::Rtc => "rtc",
            Subsystem::Rpg => "rpg",
            Subsystem::Scms => "scms",
            Subsystem::Soss => "soss",
            Subsystem::Str => "str",
            Subsystem::Sum => "sum",
            Subsystem::Tcs => "tcs",
            Subsystem::Tinc => "tinc",
            Subsystem::Wfos => "wfos",
            Subsystem::Test => "test",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subsystem {
    type Err = EventError;

    /// Case-insensitive: `WFOS`, `wfos` and `Wfos` are the same subsystem
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Subsystem::ALL
            .iter()
            .copied()
            .find(|sub| sub.as_str() == lower)
            .ok_or_else(|| EventError::Parse(format!("Unknown subsystem '{}'", s)))
    }
}

/// Check one dotted segment (or a whole event name) for forbidden characters
fn validate_segment(kind: &str, value: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(EventError::InvalidKeyFormat(format!(
            "{} '{}' has an empty segment",
            kind, value
        )));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| c.is_whitespace() || RESERVED_CHARS.contains(c))
    {
        return Err(EventError::InvalidKeyFormat(format!(
            "{} '{}' contains forbidden character '{}'",
            kind, value, c
        )));
    }
    Ok(())
}

/// Source of an event: owning subsystem plus a (possibly dotted) component name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix {
    subsystem: Subsystem,
    component_name: String,
}

impl Prefix {
    /// Build a prefix, validating the component name
    pub fn new(subsystem: Subsystem, component_name: impl Into<String>) -> Result<Self> {
        let component_name = component_name.into();
        if component_name.is_empty() {
            return Err(EventError::InvalidKeyFormat(
                "Component name must not be empty".to_string(),
            ));
        }
        for segment in component_name.split(KEY_SEPARATOR) {
            validate_segment("Component name", &component_name, segment)?;
        }
        Ok(Self {
            subsystem,
            component_name,
        })
    }

    /// Parse `<subsystem>.<component>`
    pub fn parse(s: &str) -> Result<Self> {
        let (subsystem, component) = s
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| EventError::Parse(format!("Prefix '{}' has no component name", s)))?;
        let subsystem = subsystem.parse::<Subsystem>()?;
        Prefix::new(subsystem, component).map_err(|e| EventError::Parse(e.to_string()))
    }

    /// Owning subsystem
    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    /// Component name without the subsystem
    pub fn component_name(&self) -> &str {
        &self.component_name
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.subsystem, KEY_SEPARATOR, self.component_name)
    }
}

impl FromStr for Prefix {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        Prefix::parse(s)
    }
}

impl TryFrom<String> for Prefix {
    type Error = EventError;

    fn try_from(s: String) -> Result<Self> {
        Prefix::parse(&s)
    }
}

impl From<Prefix> for String {
    fn from(p: Prefix) -> Self {
        p.to_string()
    }
}

/// Name of an event within its prefix; never contains the key separator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventName(String);

impl EventName {
    /// Build an event name, rejecting separators and pattern characters
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.contains(KEY_SEPARATOR) {
            return Err(EventError::InvalidKeyFormat(format!(
                "Event name '{}' must not contain '{}'",
                name, KEY_SEPARATOR
            )));
        }
        validate_segment("Event name", &name, &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EventName {
    type Error = EventError;

    fn try_from(s: String) -> Result<Self> {
        EventName::new(s)
    }
}

impl From<EventName> for String {
    fn from(n: EventName) -> Self {
        n.0
    }
}

/// Canonical address of an event stream: `<prefix>.<name>`
///
/// Used verbatim as the cache key, channel name, and (under a subject
/// prefix) the log subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventKey {
    prefix: Prefix,
    name: EventName,
}

impl EventKey {
    /// Combine an already validated prefix and name
    pub fn new(prefix: Prefix, name: EventName) -> Self {
        Self { prefix, name }
    }

    /// Build a key from raw prefix and name strings
    pub fn of(prefix: &str, name: &str) -> Result<Self> {
        let prefix = Prefix::parse(prefix).map_err(|e| match e {
            EventError::Parse(msg) => EventError::InvalidKeyFormat(msg),
            other => other,
        })?;
        Ok(Self::new(prefix, EventName::new(name)?))
    }

    /// Parse the canonical string form, splitting at the last separator
    pub fn parse(s: &str) -> Result<Self> {
        if s == INVALID_KEY {
            return Ok(Self::invalid());
        }
        let (prefix, name) = s
            .rsplit_once(KEY_SEPARATOR)
            .ok_or_else(|| EventError::Parse(format!("Event key '{}' has no event name", s)))?;
        let prefix = Prefix::parse(prefix)?;
        let name = EventName::new(name).map_err(|e| EventError::Parse(e.to_string()))?;
        Ok(Self::new(prefix, name))
    }

    /// The wildcard key carried by [`Event::invalid`]
    pub fn invalid() -> Self {
        Self {
            prefix: Prefix {
                subsystem: Subsystem::Csw,
                component_name: "invalid".to_string(),
            },
            name: EventName("*".to_string()),
        }
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn name(&self) -> &EventName {
        &self.name
    }

    pub fn subsystem(&self) -> Subsystem {
        self.prefix.subsystem
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix, KEY_SEPARATOR, self.name)
    }
}

impl FromStr for EventKey {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        EventKey::parse(s)
    }
}

impl TryFrom<String> for EventKey {
    type Error = EventError;

    fn try_from(s: String) -> Result<Self> {
        EventKey::parse(&s)
    }
}

impl From<EventKey> for String {
    fn from(k: EventKey) -> Self {
        k.to_string()
    }
}

/// Event category, carried through untouched by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventCategory {
    /// Component state and telemetry
    #[default]
    System,
    /// Observation lifecycle (exposure start/end, readout, ...)
    Observe,
}

/// A single named parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: serde_json::Value,
}

/// A timestamped parameter bundle published under an [`EventKey`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier (uuid, or `-1` for the sentinel)
    pub id: String,

    /// Key this event is published under
    pub key: EventKey,

    #[serde(default)]
    pub category: EventCategory,

    /// Creation time
    pub event_time: DateTime<Utc>,

    /// Ordered parameter set
    #[serde(default)]
    pub params: Vec<Parameter>,
}

impl Event {
    /// Create an event with a fresh id and the current time
    pub fn new(key: EventKey, category: EventCategory) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            category,
            event_time: Utc::now(),
            params: Vec::new(),
        }
    }

    /// Create a system event
    pub fn system(prefix: Prefix, name: EventName) -> Self {
        Self::new(EventKey::new(prefix, name), EventCategory::System)
    }

    /// Create an observe event
    pub fn observe(prefix: Prefix, name: EventName) -> Self {
        Self::new(EventKey::new(prefix, name), EventCategory::Observe)
    }

    /// The invalid-event sentinel with the wildcard key
    pub fn invalid() -> Self {
        Self::invalid_for(EventKey::invalid())
    }

    /// The invalid-event sentinel for a key that has no value yet
    pub fn invalid_for(key: EventKey) -> Self {
        Self {
            id: INVALID_EVENT_ID.to_string(),
            key,
            category: EventCategory::System,
            event_time: DateTime::<Utc>::default(),
            params: Vec::new(),
        }
    }

    /// Whether this is the "no data yet" sentinel
    pub fn is_invalid(&self) -> bool {
        self.id == INVALID_EVENT_ID
    }

    /// Add or replace a parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.params.push(Parameter { name, value }),
        }
        self
    }

    /// Look up a parameter value by name
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Same key, category, and parameters under a new id and timestamp
    pub fn renew(&self) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_time: Utc::now(),
            ..self.clone()
        }
    }
}
