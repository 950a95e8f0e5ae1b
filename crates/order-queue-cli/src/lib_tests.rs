//! Tests for the order-queue-cli library module.

use super::*;
use clap::Parser;
use order_queue::{OrderStatus, Timestamp};
use rust_decimal_macros::dec;
use std::io::Write;

mod parsing {
    use super::*;

    #[test]
    fn test_status_defaults_to_text() {
        let cli = Cli::try_parse_from(["order-queue", "status"]).unwrap();

        match cli.command {
            Commands::Status { format } => assert_eq!(format, OutputFormat::Text),
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_worker_mode_override() {
        let cli = Cli::try_parse_from(["order-queue", "worker", "--mode", "event-driven"]).unwrap();

        match cli.command {
            Commands::Worker { mode } => assert_eq!(mode, Some(ReceiveModeArg::EventDriven)),
            _ => panic!("Expected Worker command"),
        }
    }

    #[test]
    fn test_send_requires_order_fields() {
        let result = Cli::try_parse_from(["order-queue", "send", "--customer", "Ann"]);

        assert!(result.is_err());
    }

    #[test]
    fn test_send_test_conflicts_with_fields() {
        let result = Cli::try_parse_from(["order-queue", "send", "--test", "--customer", "Ann"]);

        assert!(result.is_err());
    }

    #[test]
    fn test_send_parses_decimal_amount() {
        let cli = Cli::try_parse_from([
            "order-queue",
            "send",
            "--customer",
            "Ann",
            "--product",
            "Widget",
            "--quantity",
            "3",
            "--amount",
            "19.99",
        ])
        .unwrap();

        match cli.command {
            Commands::Send {
                quantity, amount, ..
            } => {
                assert_eq!(quantity, 3);
                assert_eq!(amount, Some(dec!(19.99)));
            }
            _ => panic!("Expected Send command"),
        }
    }
}

mod orders {
    use super::*;

    #[test]
    fn test_build_order_fills_identity() {
        let order = build_order(
            false,
            Some("Ann".to_string()),
            Some("Widget".to_string()),
            3,
            Some(dec!(19.99)),
            None,
        )
        .unwrap();

        assert!(!order.order_id.is_empty());
        assert!(order.order_date.is_some());
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn test_build_order_keeps_explicit_id() {
        let order = build_order(
            false,
            Some("Ann".to_string()),
            Some("Widget".to_string()),
            1,
            Some(dec!(5)),
            Some("O-42".to_string()),
        )
        .unwrap();

        assert_eq!(order.order_id.as_str(), "O-42");
    }

    #[test]
    fn test_build_order_rejects_negative_amount() {
        let result = build_order(
            false,
            Some("Ann".to_string()),
            Some("Widget".to_string()),
            1,
            Some(dec!(-1)),
            None,
        );

        assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
    }

    #[test]
    fn test_build_test_order() {
        let order = build_order(true, None, None, 1, None, None).unwrap();

        assert_eq!(order.customer_name, "Test Customer");
        assert_eq!(order.total_amount, dec!(99.99));
    }
}

mod configuration {
    use super::*;

    #[test]
    fn test_explicit_file_is_loaded() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[queue]
queue_path = '.\private$\Orders2'
receive_mode = "event_driven"

[queue.transport]
kind = "memory"

[worker]
idle_delay_ms = 250
"#
        )
        .unwrap();

        let config = load_configuration(Some(file.path())).unwrap();

        assert_eq!(config.queue.queue_path, r".\private$\Orders2");
        assert_eq!(config.queue.receive_mode, ReceiveMode::EventDriven);
        assert_eq!(config.queue.receive_timeout_ms, 500);
        assert_eq!(config.worker.idle_delay_ms, 250);
        assert_eq!(config.worker.message_delay_ms, 500);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");

        let result = load_configuration(Some(missing.as_path()));

        assert!(matches!(result, Err(CliError::Configuration(_))));
    }

    #[test]
    fn test_command_line_overrides_win() {
        let cli = Cli::try_parse_from([
            "order-queue",
            "--queue",
            r".\private$\Other",
            "worker",
            "--mode",
            "event-driven",
        ])
        .unwrap();

        let config = apply_overrides(CliConfig::default(), &cli);

        assert_eq!(config.queue.queue_path, r".\private$\Other");
        assert_eq!(config.queue.receive_mode, ReceiveMode::EventDriven);
    }
}

mod rendering {
    use super::*;

    fn status(message_count: i64) -> QueueStatus {
        QueueStatus {
            queue_path: r".\private$\OrderQueue".to_string(),
            transport: "memory".to_string(),
            receive_mode: ReceiveMode::Polling,
            queue_available: true,
            message_count,
            buffered_messages: 0,
            handle_generation: 2,
            dead_lettered: 1,
            disposed: false,
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn test_text_status_lists_fields() {
        let text = render_status(&status(4), OutputFormat::Text).unwrap();

        assert!(text.contains(r".\private$\OrderQueue"));
        assert!(text.contains("Messages:         4"));
        assert!(text.contains("generation 2"));
    }

    #[test]
    fn test_uncountable_queue_renders_unknown() {
        let text = render_status(&status(-1), OutputFormat::Text).unwrap();

        assert!(text.contains("Messages:         unknown"));
    }

    #[test]
    fn test_json_status_is_parseable() {
        let json = render_status(&status(4), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["message_count"], 4);
        assert_eq!(value["receive_mode"], "polling");
    }
}
