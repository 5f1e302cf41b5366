// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Phases – the named, priority-ordered stages of a chain.
//!
//! A [`PhaseSet`] is built once at startup and shared read-only by every
//! chain built from it.  The [`PhaseManager`] owns the inbound and outbound
//! sets used by a bus.


use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{ChainError, Direction};

/// Curated phase names.  Interceptor authors pick their phase from here.
pub mod names {
    pub const SETUP: &str = "setup";
    pub const SETUP_ENDING: &str = "setup-ending";
    pub const RECEIVE: &str = "receive";
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const WRITE_ENDING: &str = "write-ending";
    pub const PRE_STREAM: &str = "pre-stream";
    pub const PRE_STREAM_ENDING: &str = "pre-stream-ending";
    pub const USER_STREAM: &str = "user-stream";
    pub const USER_STREAM_ENDING: &str = "user-stream-ending";
    pub const POST_STREAM: &str = "post-stream";
    pub const POST_STREAM_ENDING: &str = "post-stream-ending";
    pub const PRE_PROTOCOL: &str = "pre-protocol";
    pub const PRE_PROTOCOL_ENDING: &str = "pre-protocol-ending";
    pub const PRE_PROTOCOL_FRONTEND: &str = "pre-protocol-frontend";
    pub const PRE_PROTOCOL_FRONTEND_ENDING: &str = "pre-protocol-frontend-ending";
    pub const USER_PROTOCOL: &str = "user-protocol";
    pub const USER_PROTOCOL_ENDING: &str = "user-protocol-ending";
    pub const POST_PROTOCOL: &str = "post-protocol";
    pub const POST_PROTOCOL_ENDING: &str = "post-protocol-ending";
    pub const UNMARSHAL: &str = "unmarshal";
    pub const PRE_LOGICAL: &str = "pre-logical";
    pub const PRE_LOGICAL_ENDING: &str = "pre-logical-ending";
    pub const USER_LOGICAL: &str = "user-logical";
    pub const USER_LOGICAL_ENDING: &str = "user-logical-ending";
    pub const POST_LOGICAL: &str = "post-logical";
    pub const POST_LOGICAL_ENDING: &str = "post-logical-ending";
    pub const PRE_INVOKE: &str = "pre-invoke";
    pub const INVOKE: &str = "invoke";
    pub const POST_INVOKE: &str = "post-invoke";
    pub const PREPARE_SEND: &str = "prepare-send";
    pub const PREPARE_SEND_ENDING: &str = "prepare-send-ending";
    pub const PRE_MARSHAL: &str = "pre-marshal";
    pub const MARSHAL: &str = "marshal";
    pub const POST_MARSHAL: &str = "post-marshal";
    pub const SEND: &str = "send";
    pub const SEND_ENDING: &str = "send-ending";
}

/// A named pipeline stage.  Ordered by priority, then by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    name: String,
    priority: i32,
}

impl Phase {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl Ord for Phase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Phase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.priority)
    }
}

#[derive(Debug)]
struct PhaseSetInner {
    phases: Vec<Phase>,
    index: HashMap<String, usize>,
}

/// An immutable, sorted set of phases with by-name lookup.
///
/// Cloning is cheap: clones share the same allocation, which also lets the
/// chain cache recognise an unchanged phase set by pointer.
#[derive(Debug, Clone)]
pub struct PhaseSet {
    inner: Arc<PhaseSetInner>,
}

/// Priority for the phase at `index` in a name list, `None` once it leaves `i32`.
pub(crate) fn priority_at(index: usize) -> Option<i32> {
    i32::try_from(index).ok()?.checked_mul(1000)
}

impl PhaseSet {
    /// Sort the given phases and index them by name.
    pub fn new(phases: impl IntoIterator<Item = Phase>) -> Result<Self, ChainError> {
        let mut phases: Vec<Phase> = phases.into_iter().collect();
        phases.sort();

        let mut index = HashMap::with_capacity(phases.len());
        for (i, phase) in phases.iter().enumerate() {
            if index.insert(phase.name.clone(), i).is_some() {
                return Err(ChainError::DuplicatePhase(phase.name.clone()));
            }
        }

        Ok(Self {
            inner: Arc::new(PhaseSetInner { phases, index }),
        })
    }

    /// Build a set from names, assigning priorities `index * 1000`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ChainError> {
        let phases = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let priority = priority_at(i).ok_or_else(|| {
                    ChainError::ConfigError(format!(
                        "too many phases: no priority for '{}' at position {i}",
                        name.as_ref()
                    ))
                })?;
                Ok(Phase::new(name.as_ref(), priority))
            })
            .collect::<Result<Vec<_>, ChainError>>()?;
        Self::new(phases)
    }

    // Default name lists are known to be unique.
    fn defaults(names: &[&str]) -> Self {
        let phases: Vec<Phase> = names
            .iter()
            .enumerate()
            .map(|(i, name)| Phase::new(*name, priority_at(i).unwrap_or(i32::MAX)))
            .collect();
        let index = phases
            .iter()
            .enumerate()
            .map(|(i, phase)| (phase.name.clone(), i))
            .collect();

        Self {
            inner: Arc::new(PhaseSetInner { phases, index }),
        }
    }

    /// Position of the named phase in the sorted set.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.index.get(name).copied()
    }

    pub fn get(&self, index: usize) -> Option<&Phase> {
        self.inner.phases.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Phase> {
        self.inner.phases.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.phases.is_empty()
    }

    /// True when both sets share one allocation.
    pub fn ptr_eq(&self, other: &PhaseSet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for PhaseSet {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.inner.phases == other.inner.phases
    }
}

impl Eq for PhaseSet {}

impl<'a> IntoIterator for &'a PhaseSet {
    type Item = &'a Phase;
    type IntoIter = std::slice::Iter<'a, Phase>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Phase definition as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    pub priority: i32,
}

/// Optional phase overrides read from `bus.phases`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesConfig {
    #[serde(default)]
    pub inbound: Option<Vec<PhaseConfig>>,
    #[serde(default)]
    pub outbound: Option<Vec<PhaseConfig>>,
}

const DEFAULT_IN_PHASES: &[&str] = &[
    names::RECEIVE,
    names::PRE_STREAM,
    names::USER_STREAM,
    names::POST_STREAM,
    names::READ,
    names::PRE_PROTOCOL,
    names::PRE_PROTOCOL_FRONTEND,
    names::USER_PROTOCOL,
    names::POST_PROTOCOL,
    names::UNMARSHAL,
    names::PRE_LOGICAL,
    names::USER_LOGICAL,
    names::POST_LOGICAL,
    names::PRE_INVOKE,
    names::INVOKE,
    names::POST_INVOKE,
];

const DEFAULT_OUT_PHASES: &[&str] = &[
    names::SETUP,
    names::PRE_LOGICAL,
    names::USER_LOGICAL,
    names::POST_LOGICAL,
    names::PREPARE_SEND,
    names::PRE_STREAM,
    names::PRE_PROTOCOL,
    names::PRE_PROTOCOL_FRONTEND,
    names::WRITE,
    names::PRE_MARSHAL,
    names::MARSHAL,
    names::POST_MARSHAL,
    names::USER_PROTOCOL,
    names::POST_PROTOCOL,
    names::USER_STREAM,
    names::POST_STREAM,
    names::SEND,
    names::SEND_ENDING,
    names::POST_STREAM_ENDING,
    names::USER_STREAM_ENDING,
    names::POST_PROTOCOL_ENDING,
    names::USER_PROTOCOL_ENDING,
    names::WRITE_ENDING,
    names::PRE_PROTOCOL_FRONTEND_ENDING,
    names::PRE_PROTOCOL_ENDING,
    names::PRE_STREAM_ENDING,
    names::PREPARE_SEND_ENDING,
    names::POST_LOGICAL_ENDING,
    names::USER_LOGICAL_ENDING,
    names::PRE_LOGICAL_ENDING,
    names::SETUP_ENDING,
];

/// Owns the inbound and outbound phase sets of a bus.
#[derive(Debug, Clone)]
pub struct PhaseManager {
    in_phases: PhaseSet,
    out_phases: PhaseSet,
}

impl PhaseManager {
    pub fn new(in_phases: PhaseSet, out_phases: PhaseSet) -> Self {
        Self {
            in_phases,
            out_phases,
        }
    }

    /// Apply configured overrides on top of the default phase sets.
    pub fn from_config(config: &PhasesConfig) -> Result<Self, ChainError> {
        let defaults = Self::default();

        let in_phases = match &config.inbound {
            Some(phases) => Self::from_configs(phases)?,
            None => defaults.in_phases,
        };
        let out_phases = match &config.outbound {
            Some(phases) => Self::from_configs(phases)?,
            None => defaults.out_phases,
        };

        Ok(Self::new(in_phases, out_phases))
    }

    fn from_configs(phases: &[PhaseConfig]) -> Result<PhaseSet, ChainError> {
        PhaseSet::new(phases.iter().map(|p| Phase::new(&p.name, p.priority)))
    }

    pub fn in_phases(&self) -> &PhaseSet {
        &self.in_phases
    }

    pub fn out_phases(&self) -> &PhaseSet {
        &self.out_phases
    }

    pub fn phases(&self, direction: Direction) -> &PhaseSet {
        match direction {
            Direction::Inbound => &self.in_phases,
            Direction::Outbound => &self.out_phases,
        }
    }
}

impl Default for PhaseManager {
    fn default() -> Self {
        Self::new(
            PhaseSet::defaults(DEFAULT_IN_PHASES),
            PhaseSet::defaults(DEFAULT_OUT_PHASES),
        )
    }
}
