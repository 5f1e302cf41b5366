// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::core::Message;
    use crate::logging::config::LoggingConfig;
    use crate::logging::structured::{self, LogFormat, MessageInfo};
    use crate::logging::{init, is_structured_logging, parse_level, test_logger};
    use log::LevelFilter;
    use slog::{Discard, Logger, o};

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), LevelFilter::Info);
    }

    #[test]
    fn test_init_is_idempotent() {
        init(Some(LevelFilter::Debug));
        init(Some(LevelFilter::Trace));
        assert!(!is_structured_logging());
    }

    #[test]
    fn test_logging_config_defaults_from_empty_object() {
        let config: LoggingConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.structured);
        assert_eq!(config.format, "terminal");
        assert_eq!(config.level, "info");
        assert!(config.include_message_context);
    }

    #[test]
    fn test_to_logger_config() {
        let mut config = LoggingConfig {
            format: "JSON".to_string(),
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        config
            .static_fields
            .insert("service".to_string(), "orders".to_string());

        let logger_config = config.to_logger_config();
        assert_eq!(logger_config.format, LogFormat::Json);
        assert_eq!(logger_config.level, slog::Level::Warning);
        assert_eq!(
            logger_config.static_fields,
            vec![("service".to_string(), "orders".to_string())]
        );

        config.level = "bogus".to_string();
        assert_eq!(config.to_logger_config().level, slog::Level::Info);
    }

    #[test]
    fn test_message_info() {
        test_logger::init_test_logger();

        let message = Message::outbound();
        let info = MessageInfo::new(&message, "orders");
        assert_eq!(info.message_id, message.id().to_string());
        assert_eq!(info.direction, "outbound");
        assert_eq!(info.chain, "orders");
        assert_eq!(info.trace_id.len(), 36);
        assert!(info.elapsed_ms() >= 0);

        let logger = structured::with_message_context(&Logger::root(Discard, o!()), &info);
        slog::info!(logger, "message context attached");
        slog::info!(slog_scope::logger(), "global logger available");
    }

    #[test]
    fn test_trace_ids_are_unique() {
        assert_ne!(structured::generate_trace_id(), structured::generate_trace_id());
    }
}
