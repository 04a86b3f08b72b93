//! Property-based tests for odyssey-controller
//!
//! These tests verify correctness properties using proptest.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use odyssey_core::limits::NATIVE_MINT;
    use odyssey_core::session::{AllowanceView, SessionStatus, SessionView};
    use odyssey_core::transactions::{Transaction, TransactionKind, TransactionStatus};
    use odyssey_core::types::{Agent, AgentStatus};

    use crate::cli::parse_token_limit;
    use crate::config::{CliOverrides, Config};
    use crate::output::{JsonResponse, OutputFormat, OutputFormatter};

    fn output_format() -> impl Strategy<Value = OutputFormat> {
        prop_oneof![
            Just(OutputFormat::Table),
            Just(OutputFormat::Json),
            Just(OutputFormat::Quiet),
        ]
    }

    // Command-line values take precedence over the file; absent flags keep
    // whatever the file says.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_config_override_output_format(
            format in output_format(),
            file_format in output_format(),
        ) {
            let mut config = Config::default();
            config.output.format = file_format.to_string();
            let overrides = CliOverrides {
                output_format: Some(format.to_string()),
                ..Default::default()
            };
            let config = config.with_overrides(&overrides);
            prop_assert_eq!(config.output.format.parse::<OutputFormat>().unwrap(), format);
        }

        #[test]
        fn test_config_preserves_values_when_no_override(
            file_format in output_format(),
            verbose in any::<bool>(),
            interval in 1u64..600,
            attempts in 1u32..1000,
        ) {
            let mut config = Config::default();
            config.output.format = file_format.to_string();
            config.output.verbose = verbose;
            config.polling.interval_seconds = interval;
            config.polling.max_attempts = attempts;

            let config = config.with_overrides(&CliOverrides::default());
            prop_assert_eq!(&config.output.format, &file_format.to_string());
            prop_assert_eq!(config.output.verbose, verbose);

            let authz = config.authz_config();
            prop_assert_eq!(authz.poll.interval.as_secs(), interval);
            prop_assert_eq!(authz.poll.max_attempts, attempts);
        }

        #[test]
        fn test_config_override_api_url(host in "[a-z]{1,12}", port in 1u16..65535) {
            let url = format!("http://{host}.test:{port}");
            let overrides = CliOverrides {
                api_url: Some(url.clone()),
                ..Default::default()
            };
            let config = Config::default().with_overrides(&overrides);
            prop_assert!(config.validate().is_ok());
            prop_assert_eq!(&config.backend.base_url, &url);
            prop_assert_eq!(&config.ledger_config().authority_url, &url);
        }

        #[test]
        fn test_output_format_parse_is_case_insensitive(format in output_format(), upper in any::<bool>()) {
            let text = if upper {
                format.to_string().to_uppercase()
            } else {
                format.to_string()
            };
            prop_assert_eq!(text.parse::<OutputFormat>().unwrap(), format);
        }
    }

    // Token allowances given on the command line keep mint, decimals, and
    // symbol exactly.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_token_limit_argument_parses(
            mint in "[1-9A-HJ-NP-Za-km-z]{32,44}",
            whole in 0u32..1_000_000,
            decimals in 0u8..=18,
            symbol in proptest::option::of("[A-Z]{2,6}"),
        ) {
            let mut arg = format!("{mint}:{whole}:{decimals}");
            if let Some(symbol) = &symbol {
                arg.push(':');
                arg.push_str(symbol);
            }
            let limit = parse_token_limit(&arg).unwrap();
            prop_assert_eq!(limit.mint, mint);
            prop_assert_eq!(limit.amount, f64::from(whole));
            prop_assert_eq!(limit.decimals, decimals);
            prop_assert_eq!(limit.symbol, symbol);
        }
    }

    fn agent_strategy() -> impl Strategy<Value = Agent> {
        (
            "[a-z0-9-]{1,16}",
            "[A-Za-z ]{1,24}",
            1_600_000_000_000u64..2_000_000_000_000,
            proptest::option::of(1_600_000_000_000u64..2_000_000_000_000),
        )
            .prop_map(|(id, name, paired_at, last_seen)| Agent {
                id,
                name,
                paired_at,
                last_seen,
                status: AgentStatus::Active,
            })
    }

    fn view_strategy() -> impl Strategy<Value = SessionView> {
        ("[a-z0-9-]{1,16}", 0.0f64..100.0, 0.0f64..=1.0, 0u64..86_400).prop_map(
            |(id, limit, fraction, secs)| {
                let spent = limit * fraction;
                SessionView {
                    id,
                    agent_id: "agent-1".into(),
                    status: SessionStatus::Active,
                    message: "Expires soon".into(),
                    expires_at: 1_700_000_000_000 + secs * 1000,
                    time_remaining_secs: secs,
                    duration: "1h".into(),
                    allowances: vec![AllowanceView {
                        mint: NATIVE_MINT.into(),
                        symbol: None,
                        limit,
                        spent,
                        remaining: limit - spent,
                        percent_spent: fraction * 100.0,
                    }],
                }
            },
        )
    }

    // Every JSON document carries the same envelope.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn test_json_output_agents_is_valid_json(agents in prop::collection::vec(agent_strategy(), 0..5)) {
            let formatter = OutputFormatter::new(OutputFormat::Json, false);
            let value: serde_json::Value = serde_json::from_str(&formatter.format_agents(&agents)).unwrap();
            prop_assert_eq!(&value["success"], true);
            prop_assert_eq!(&value["command"], "agents");
            prop_assert_eq!(value["data"]["count"].as_u64(), Some(agents.len() as u64));
            prop_assert!(value.get("error").is_none());
        }

        #[test]
        fn test_json_output_sessions_is_valid_json(views in prop::collection::vec(view_strategy(), 0..5)) {
            let formatter = OutputFormatter::new(OutputFormat::Json, false);
            let value: serde_json::Value = serde_json::from_str(&formatter.format_sessions(&views)).unwrap();
            prop_assert_eq!(&value["success"], true);
            let sessions = value["data"]["sessions"].as_array().unwrap();
            prop_assert_eq!(sessions.len(), views.len());
            for session in sessions {
                prop_assert!(session["allowances"].is_array());
                prop_assert!(session["timeRemainingSecs"].is_u64());
            }
        }

        #[test]
        fn test_json_output_transaction_is_valid_json(
            amount in 0.0f64..1000.0,
            pending in any::<bool>(),
        ) {
            let tx = Transaction {
                signature: "sig-1".into(),
                kind: TransactionKind::Transfer,
                from: "from".into(),
                to: "to".into(),
                amount,
                mint: None,
                symbol: None,
                timestamp: 1_700_000_000_000,
                status: if pending { TransactionStatus::Pending } else { TransactionStatus::Confirmed },
                session_id: None,
            };
            let formatter = OutputFormatter::new(OutputFormat::Json, false);
            let value: serde_json::Value =
                serde_json::from_str(&formatter.format_transaction(&tx, "send")).unwrap();
            prop_assert_eq!(&value["command"], "send");
            let encoded = value["data"]["amount"].as_f64().unwrap();
            prop_assert!((encoded - amount).abs() < 1e-9);
        }

        #[test]
        fn test_json_error_response_schema(message in "[ -~]{0,64}") {
            let response = JsonResponse::error_with_command(&message, "pair");
            let value = serde_json::to_value(&response).unwrap();
            prop_assert_eq!(&value["success"], false);
            prop_assert_eq!(value["error"].as_str(), Some(message.as_str()));
            prop_assert!(value.get("data").is_none());
            prop_assert!(value["timestamp"].is_string());
        }
    }
}
