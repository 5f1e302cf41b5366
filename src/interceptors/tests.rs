// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::chain::{ChainState, PhaseInterceptorChain};
    use crate::core::{ChainError, Fault, Message, PhaseInterceptor};
    use crate::interceptor::InterceptorBase;
    use crate::interceptors::{
        register_interceptor, InterceptorDefinition, InterceptorFactory, LoggingInterceptor,
        LoggingInterceptorConfig, PlacementConfig, PropertyInterceptor,
        PropertyInterceptorConfig, TimingInterceptor,
    };
    use crate::phase::{names, PhaseManager};
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Marker {
        base: InterceptorBase,
    }

    impl PhaseInterceptor for Marker {
        fn id(&self) -> &str {
            self.base.id()
        }

        fn phase(&self) -> &str {
            self.base.phase()
        }

        fn handle_message(
            &self,
            message: &mut Message,
            _chain: &mut PhaseInterceptorChain,
        ) -> Result<(), Fault> {
            message.put("marked", json!(true));
            Ok(())
        }
    }

    fn marker_ctor(config: Value) -> Result<Arc<dyn PhaseInterceptor>, ChainError> {
        let placement: PlacementConfig = serde_json::from_value(config)
            .map_err(|e| ChainError::InterceptorError(e.to_string()))?;
        Ok(Arc::new(Marker {
            base: placement.base::<Marker>(names::INVOKE),
        }))
    }

    #[test]
    fn test_placement_defaults_to_type_name() {
        let base = PlacementConfig::default().base::<Marker>(names::INVOKE);
        assert!(base.id().ends_with("Marker"));
        assert_eq!(base.phase(), names::INVOKE);
    }

    #[test]
    fn test_placement_overrides() {
        let placement: PlacementConfig = serde_json::from_value(json!({
            "id": "audit",
            "phase": "pre-invoke",
            "before": ["b"],
            "after": ["a"]
        }))
        .unwrap();
        let base = placement.base::<Marker>(names::INVOKE);
        assert_eq!(base.id(), "audit");
        assert_eq!(base.phase(), "pre-invoke");
        assert!(base.before().contains("b"));
        assert!(base.after().contains("a"));
    }

    #[test]
    fn test_unique_placement_ids_differ() {
        let placement = PlacementConfig {
            unique: true,
            ..PlacementConfig::default()
        };
        assert_ne!(
            placement.base::<Marker>(names::INVOKE).id(),
            placement.base::<Marker>(names::INVOKE).id()
        );
    }

    #[test]
    fn test_factory_creates_builtins() {
        let logging = InterceptorFactory::create_interceptor("logging", Value::Null).unwrap();
        assert_eq!(logging.phase(), names::PRE_STREAM);
        assert!(logging.id().ends_with("LoggingInterceptor"));

        let property = InterceptorFactory::create_interceptor(
            "property",
            json!({"id": "props", "set": {"a": 1}}),
        )
        .unwrap();
        assert_eq!(property.id(), "props");
        assert_eq!(property.phase(), names::USER_LOGICAL);

        let timing =
            InterceptorFactory::create_interceptor("timing", json!({"phase": "receive"})).unwrap();
        assert_eq!(timing.phase(), names::RECEIVE);
    }

    #[test]
    fn test_factory_rejects_unknown_and_invalid() {
        let err = InterceptorFactory::create_interceptor("nope", json!({})).unwrap_err();
        assert!(matches!(err, ChainError::InterceptorError(ref msg) if msg.contains("nope")));

        let err =
            InterceptorFactory::create_interceptor("property", json!({"remove": 5})).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_registered_interceptor_takes_precedence() {
        register_interceptor("marker", marker_ctor);

        let definition = InterceptorDefinition::new("marker", json!({"id": "m"}));
        let marker = definition.create().unwrap();
        assert_eq!(marker.id(), "m");
        assert_eq!(marker.phase(), names::INVOKE);
    }

    #[test]
    fn test_definition_deserializes_type_key() {
        let definition: InterceptorDefinition =
            serde_json::from_value(json!({"type": "logging"})).unwrap();
        assert_eq!(definition.interceptor_type, "logging");
        assert!(definition.config.is_null());
        assert!(definition.create().is_ok());
    }

    #[test]
    fn test_property_interceptor_sets_and_removes() {
        let config: PropertyInterceptorConfig = serde_json::from_value(json!({
            "set": {"tenant": "acme", "retries": 3},
            "remove": ["secret"]
        }))
        .unwrap();
        let interceptor: Arc<dyn PhaseInterceptor> = Arc::new(PropertyInterceptor::new(config));

        let phases = PhaseManager::default().in_phases().clone();
        let mut chain = PhaseInterceptorChain::build(&phases, &[&[interceptor]]).unwrap();
        let mut message = Message::inbound();
        message.put("secret", json!("hunter2"));

        chain.do_intercept(&mut message).unwrap();
        assert_eq!(message.get("tenant"), Some(&json!("acme")));
        assert_eq!(message.get("retries"), Some(&json!(3)));
        assert!(message.get("secret").is_none());
    }

    #[test]
    fn test_timing_interceptor_records_elapsed_on_completion() {
        let timing: Arc<dyn PhaseInterceptor> = Arc::new(TimingInterceptor::default());
        let phases = PhaseManager::default().out_phases().clone();
        let mut chain = PhaseInterceptorChain::build(&phases, &[&[timing]]).unwrap();

        let mut message = Message::outbound();
        assert_eq!(chain.do_intercept(&mut message).unwrap(), ChainState::Complete);
        assert!(message.get("sluice.started_at").unwrap().is_string());
        assert!(message.get("sluice.elapsed_ms").unwrap().as_i64().unwrap() >= 0);
    }

    #[test]
    fn test_logging_after_named_timing_in_shared_phase() {
        let definitions: Vec<InterceptorDefinition> = serde_yaml::from_str(
            r#"
- type: logging
  config:
    level: info
    after: [timing]
- type: timing
  config:
    id: timing
"#,
        )
        .unwrap();
        let interceptors: Vec<Arc<dyn PhaseInterceptor>> = definitions
            .iter()
            .map(|definition| definition.create().unwrap())
            .collect();
        assert_eq!(interceptors[0].phase(), interceptors[1].phase());

        let phases = PhaseManager::default().in_phases().clone();
        let chain = PhaseInterceptorChain::build(&phases, &[interceptors.as_slice()]).unwrap();
        let ids = chain.interceptor_ids();
        assert_eq!(ids[0], "timing");
        assert!(ids[1].ends_with("LoggingInterceptor"));
    }

    #[test]
    fn test_logging_interceptor_describe() {
        let interceptor = LoggingInterceptor::new(LoggingInterceptorConfig {
            level: "info".to_string(),
            include_message_context: Some(true),
            ..LoggingInterceptorConfig::default()
        });
        let mut message = Message::inbound();
        message.put("b", json!(2));
        message.put("a", json!("x"));

        let line = interceptor.describe(&message);
        assert!(line.starts_with(&format!("inbound message {}", message.id())));
        assert!(line.ends_with("[a=\"x\", b=2]"));

        let quiet = LoggingInterceptor::new(LoggingInterceptorConfig {
            log_properties: false,
            ..LoggingInterceptorConfig::default()
        });
        assert!(!quiet.describe(&message).contains('['));
    }

    #[test]
    fn test_logging_interceptor_without_message_context() {
        let interceptor = LoggingInterceptor::new(
            serde_json::from_value(json!({"id": "log", "include_message_context": false}))
                .unwrap(),
        );
        let mut message = Message::outbound();
        message.put("tenant", json!("acme"));

        let line = interceptor.describe(&message);
        assert_eq!(line, "message [tenant=\"acme\"]");
        assert!(!line.contains(&message.id().to_string()));
        assert!(!line.contains("outbound"));

        let logging: Arc<dyn PhaseInterceptor> = Arc::new(interceptor);
        let phases = PhaseManager::default().out_phases().clone();
        let mut chain = PhaseInterceptorChain::build(&phases, &[&[logging]]).unwrap();
        assert_eq!(chain.do_intercept(&mut message).unwrap(), ChainState::Complete);
    }

    #[test]
    fn test_logging_interceptor_handles_fault() {
        let interceptor = LoggingInterceptor::default();
        let mut message = Message::inbound();
        interceptor.handle_fault(&mut message);
        message.set_fault(Fault::new("boom"));
        interceptor.handle_fault(&mut message);
        assert!(message.has_fault());
    }
}
