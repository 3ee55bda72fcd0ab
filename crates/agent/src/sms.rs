//! SMS entity modes
//!
//! A text can switch the thread into an entity mode with a short prefix
//! (`n:`, `/node`, ...). In an entity mode the last queried entity carries
//! across messages and mode switches.

use std::fmt;

/// Help reply, followed by the current mode
pub const HELP_TEXT: &str = "Charlotte SMS modes:\n\
n: entity — Node (who/what)\n\
e: entity — Edge (relationships)\n\
m: entity — Metric (numbers)\n\
s: entity — Signal (conditions)\n\
p: entity — Protocol (procedures)\n\
x — reset to general\n\
? — this help\n\
Entity carries across mode switches.";

pub const RESET_REPLY: &str = "Mode reset. Back to general Charlotte.";
pub const EMPTY_BODY_REPLY: &str = "I received an empty message. Send me some text and I'll respond.";
pub const ERROR_REPLY: &str = "Sorry, I hit an error processing that. Try again in a moment.";

const PREFIXES: &[(&str, EntityMode)] = &[
    ("/protocol", EntityMode::Protocol),
    ("/metric", EntityMode::Metric),
    ("/signal", EntityMode::Signal),
    ("/node", EntityMode::Node),
    ("/edge", EntityMode::Edge),
    ("n:", EntityMode::Node),
    ("e:", EntityMode::Edge),
    ("m:", EntityMode::Metric),
    ("s:", EntityMode::Signal),
    ("p:", EntityMode::Protocol),
];
const RESET_COMMANDS: &[&str] = &["x", "reset", "/reset", "/general", "/exit"];
const HELP_COMMANDS: &[&str] = &["?", "/help", "help", "/modes"];

/// Queries of at most this many words get the last entity appended
const SHORT_QUERY_WORDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityMode {
    #[default]
    General,
    Node,
    Edge,
    Metric,
    Signal,
    Protocol,
}

impl EntityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityMode::General => "general",
            EntityMode::Node => "node",
            EntityMode::Edge => "edge",
            EntityMode::Metric => "metric",
            EntityMode::Signal => "signal",
            EntityMode::Protocol => "protocol",
        }
    }

    /// Reply tag, empty for general
    pub fn tag(&self) -> &'static str {
        match self {
            EntityMode::General => "",
            EntityMode::Node => "[N]",
            EntityMode::Edge => "[E]",
            EntityMode::Metric => "[M]",
            EntityMode::Signal => "[S]",
            EntityMode::Protocol => "[P]",
        }
    }

    pub fn is_general(&self) -> bool {
        *self == EntityMode::General
    }
}

impl fmt::Display for EntityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed SMS body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsCommand {
    Help,
    Reset,
    /// Mode prefix, with the rest of the body (may be empty)
    Switch { mode: EntityMode, rest: String },
    /// Plain text in whatever mode the thread is in
    Query(String),
}

impl SmsCommand {
    pub fn parse(body: &str) -> Self {
        let body = body.trim();
        let lower = body.to_lowercase();

        if HELP_COMMANDS.contains(&lower.as_str()) {
            return SmsCommand::Help;
        }
        if RESET_COMMANDS.contains(&lower.as_str()) {
            return SmsCommand::Reset;
        }
        for (prefix, mode) in PREFIXES {
            if lower.starts_with(prefix) {
                // Prefixes are ASCII, so the byte offset is the same in `body`
                let rest = body.get(prefix.len()..).unwrap_or_default().trim();
                return SmsCommand::Switch {
                    mode: *mode,
                    rest: rest.to_string(),
                };
            }
        }
        SmsCommand::Query(body.to_string())
    }
}

/// Per-thread SMS state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmsThread {
    pub mode: EntityMode,
    pub last_entity: String,
}

/// What to do with a query after entity carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityQuery {
    /// Send this text to the agent
    Ask(String),
    /// Entity mode with nothing to query; reply with this prompt
    NeedEntity(String),
}

impl SmsThread {
    pub fn reset(&mut self) {
        self.mode = EntityMode::General;
        self.last_entity.clear();
    }

    pub fn help_reply(&self) -> String {
        format!("{}\nCurrent: {}", HELP_TEXT, self.mode)
    }

    /// Apply entity carry to a query in the current mode
    pub fn resolve(&mut self, query: &str) -> EntityQuery {
        if self.mode.is_general() {
            return EntityQuery::Ask(query.to_string());
        }

        if query.is_empty() {
            if self.last_entity.is_empty() {
                return EntityQuery::NeedEntity(format!(
                    "{} Mode set to {}. Send an entity to query.",
                    self.mode.tag(),
                    self.mode
                ));
            }
            return EntityQuery::Ask(format!("(regarding: {})", self.last_entity));
        }

        if query.split_whitespace().count() <= SHORT_QUERY_WORDS && !self.last_entity.is_empty() {
            return EntityQuery::Ask(format!("{} (regarding: {})", query, self.last_entity));
        }

        self.last_entity = query.to_string();
        EntityQuery::Ask(query.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(SmsCommand::parse(" HELP "), SmsCommand::Help);
        assert_eq!(SmsCommand::parse("?"), SmsCommand::Help);
        assert_eq!(SmsCommand::parse("X"), SmsCommand::Reset);
        assert_eq!(
            SmsCommand::parse("n: Pump Station 4"),
            SmsCommand::Switch {
                mode: EntityMode::Node,
                rest: "Pump Station 4".to_string()
            }
        );
        assert_eq!(
            SmsCommand::parse("/Metric"),
            SmsCommand::Switch {
                mode: EntityMode::Metric,
                rest: String::new()
            }
        );
        assert_eq!(
            SmsCommand::parse("how are things"),
            SmsCommand::Query("how are things".to_string())
        );
    }

    #[test]
    fn test_entity_carry() {
        let mut thread = SmsThread {
            mode: EntityMode::Node,
            ..Default::default()
        };

        assert!(matches!(
            thread.resolve(""),
            EntityQuery::NeedEntity(reply)
                if reply == "[N] Mode set to node. Send an entity to query."
        ));

        assert_eq!(
            thread.resolve("the north pump station"),
            EntityQuery::Ask("the north pump station".to_string())
        );
        assert_eq!(thread.last_entity, "the north pump station");

        assert_eq!(
            thread.resolve("flow rate"),
            EntityQuery::Ask("flow rate (regarding: the north pump station)".to_string())
        );

        thread.mode = EntityMode::Signal;
        assert_eq!(
            thread.resolve(""),
            EntityQuery::Ask("(regarding: the north pump station)".to_string())
        );
    }

    #[test]
    fn test_general_mode_passes_through() {
        let mut thread = SmsThread::default();
        assert_eq!(thread.resolve("hi"), EntityQuery::Ask("hi".to_string()));
        assert!(thread.last_entity.is_empty());
        assert!(thread.help_reply().ends_with("Current: general"));
    }
}
