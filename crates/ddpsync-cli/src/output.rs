//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use ddpsync_core::{ChangeType, SessionEvent};
use serde_json::Value;
use tracing::warn;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a method result
    pub fn print_value(&self, value: &Value) {
        match self.format {
            OutputFormat::Human => match value {
                Value::String(s) => println!("{}", s),
                other => println!("{:#}", other),
            },
            OutputFormat::Json | OutputFormat::Quiet => println!("{}", value),
        }
    }

    /// Print one session event as it arrives
    pub fn print_event(&self, event: &SessionEvent) {
        match self.format {
            OutputFormat::Human => println!("{}", describe_event(event)),
            OutputFormat::Json => match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Could not encode event: {}", e),
            },
            OutputFormat::Quiet => {}
        }
    }

    /// Print document counts per collection
    pub fn print_collections(&self, collections: &[(String, usize)]) {
        match self.format {
            OutputFormat::Human => {
                if collections.is_empty() {
                    println!("No documents received.");
                    return;
                }
                println!("── Collections ──");
                for (name, count) in collections {
                    println!("{} ({})", name, count);
                }
            }
            OutputFormat::Json => {
                let json_collections: Vec<_> = collections
                    .iter()
                    .map(|(name, count)| serde_json::json!({"name": name, "count": count}))
                    .collect();
                println!("{}", Value::Array(json_collections));
            }
            OutputFormat::Quiet => {
                for (name, count) in collections {
                    println!("{}\t{}", name, count);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// One-line human description of an event
fn describe_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::ConnectionStateChanged { state, user_id, .. } => match user_id {
            Some(user_id) => format!("state  {} ({})", state, user_id),
            None => format!("state  {}", state),
        },
        SessionEvent::Error { message } => format!("error  {}", message),
        SessionEvent::SubscriptionChanged {
            subscription,
            change: ChangeType::Ready,
            ..
        } => format!("ready  {}", subscription),
        SessionEvent::SubscriptionChanged {
            subscription,
            change,
            doc_id,
        } => format!(
            "{:<6} {}/{}",
            change.as_str(),
            subscription,
            doc_id.as_deref().unwrap_or("-")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddpsync_core::SessionState;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_describe_event() {
        assert_eq!(
            describe_event(&SessionEvent::ConnectionStateChanged {
                state: SessionState::LoggedIn,
                user_id: Some("u1".to_string()),
                resume_token: Some("T".to_string()),
            }),
            "state  logged_in (u1)"
        );
        assert_eq!(
            describe_event(&SessionEvent::SubscriptionChanged {
                subscription: "parties".to_string(),
                change: ChangeType::Added,
                doc_id: Some("p1".to_string()),
            }),
            "added  parties/p1"
        );
        assert_eq!(
            describe_event(&SessionEvent::SubscriptionChanged {
                subscription: "partiesSub".to_string(),
                change: ChangeType::Ready,
                doc_id: None,
            }),
            "ready  partiesSub"
        );
        assert_eq!(
            describe_event(&SessionEvent::Error {
                message: "denied".to_string()
            }),
            "error  denied"
        );
    }
}
