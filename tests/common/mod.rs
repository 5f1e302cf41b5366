// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common test utilities shared by the integration tests.

use serde_json::Value;
use sluice::config::{ConfigError, ConfigProvider};
use sluice::{Fault, InterceptorBase, Message, PhaseInterceptor, PhaseInterceptorChain};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// Shared record of interceptor invocations, in call order.
pub type Journal = Arc<Mutex<Vec<String>>>;

#[allow(dead_code)]
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

#[allow(dead_code)]
pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// What a [`Recording`] interceptor does after recording the call.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Pass,
    Fail,
    Suspend,
}

/// Interceptor that appends `msg:<id>` / `fault:<id>` to a journal.
#[derive(Debug)]
pub struct Recording {
    base: InterceptorBase,
    behavior: Behavior,
    journal: Journal,
}

#[allow(dead_code)]
impl Recording {
    pub fn new(base: InterceptorBase, behavior: Behavior, journal: &Journal) -> Arc<dyn PhaseInterceptor> {
        Arc::new(Self {
            base,
            behavior,
            journal: journal.clone(),
        })
    }

    pub fn pass(id: &str, phase: &str, journal: &Journal) -> Arc<dyn PhaseInterceptor> {
        Self::new(InterceptorBase::new(id, phase), Behavior::Pass, journal)
    }
}

impl PhaseInterceptor for Recording {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn phase(&self) -> &str {
        self.base.phase()
    }

    fn before(&self) -> &BTreeSet<String> {
        self.base.before()
    }

    fn after(&self) -> &BTreeSet<String> {
        self.base.after()
    }

    fn handle_message(
        &self,
        _message: &mut Message,
        chain: &mut PhaseInterceptorChain,
    ) -> Result<(), Fault> {
        self.journal.lock().unwrap().push(format!("msg:{}", self.id()));
        match self.behavior {
            Behavior::Pass => Ok(()),
            Behavior::Fail => Err(Fault::new(format!("{} failed", self.id()))),
            Behavior::Suspend => {
                chain.suspend();
                Ok(())
            }
        }
    }

    fn handle_fault(&self, _message: &mut Message) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("fault:{}", self.id()));
    }
}

/// In-memory configuration keyed by full dotted key.
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct TestConfigProvider {
    values: HashMap<String, Value>,
}

#[allow(dead_code)]
impl TestConfigProvider {
    pub fn from_json(values: Value) -> Self {
        let values = match values {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self { values }
    }
}

impl ConfigProvider for TestConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}
