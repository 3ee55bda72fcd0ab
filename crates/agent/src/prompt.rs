//! System prompt assembly

use crate::sms::EntityMode;

/// Base persona and voice rules
pub const SYSTEM_PROMPT: &str = "You are Charlotte, a voice AI assistant. You are part of Charlotte OS, a universal substrate for modeling observable reality.

Voice interaction rules:
- Keep responses SHORT: 1-3 sentences max. This is spoken aloud, not read.
- Never use markdown, bullet points, code blocks, or formatting. Just speak naturally.
- Be warm, direct, and confident. You are Charlotte, not \"an AI assistant.\"
- When using tools, briefly state what you're doing: \"Let me check that...\" or \"Taking that note now...\"
- If a task is complex, summarize the result concisely. Don't read file contents aloud verbatim.
- For errors, give a plain-English explanation. No stack traces.
- You can take notes, search notes, read and write files, and run commands.
- The caller may be the architect, a team member, or anyone with access. Be helpful to all.";

/// Where a request originates; selects the prompt addendum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    Phone,
    PhoneBriefing,
    Sms,
    SmsEntity(EntityMode),
    Demo,
    App,
}

impl PromptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptSource::Phone => "phone",
            PromptSource::PhoneBriefing => "phone_briefing",
            PromptSource::Sms => "sms",
            PromptSource::SmsEntity(EntityMode::General) => "sms",
            PromptSource::SmsEntity(EntityMode::Node) => "sms_node",
            PromptSource::SmsEntity(EntityMode::Edge) => "sms_edge",
            PromptSource::SmsEntity(EntityMode::Metric) => "sms_metric",
            PromptSource::SmsEntity(EntityMode::Signal) => "sms_signal",
            PromptSource::SmsEntity(EntityMode::Protocol) => "sms_protocol",
            PromptSource::Demo => "demo",
            PromptSource::App => "app",
        }
    }

    fn addendum(&self) -> &'static str {
        match self {
            PromptSource::Phone => {
                "You are on a live phone call. The caller hears your words through text-to-speech, \
                 so spell out numbers and symbols the way you would say them."
            }
            PromptSource::PhoneBriefing => {
                "You are giving a spoken briefing on a phone call. Lead with the most important \
                 point, then cover what changed and what needs attention. You may use up to six \
                 sentences. Answer follow-up questions in the same briefing style."
            }
            PromptSource::Sms | PromptSource::SmsEntity(EntityMode::General) => {
                "You are replying by text message. Keep it under 300 characters when you can. \
                 Plain text only, no markdown."
            }
            PromptSource::SmsEntity(EntityMode::Node) => {
                "SMS node mode: describe the entity itself. Who or what it is, its role, and \
                 its current state. Plain text, under 300 characters."
            }
            PromptSource::SmsEntity(EntityMode::Edge) => {
                "SMS edge mode: describe the entity's relationships. What it connects to, \
                 depends on, or influences. Plain text, under 300 characters."
            }
            PromptSource::SmsEntity(EntityMode::Metric) => {
                "SMS metric mode: give the numbers for the entity. Counts, rates, trends and \
                 thresholds. Plain text, under 300 characters."
            }
            PromptSource::SmsEntity(EntityMode::Signal) => {
                "SMS signal mode: report conditions around the entity. Alerts, anomalies and \
                 anything that changed recently. Plain text, under 300 characters."
            }
            PromptSource::SmsEntity(EntityMode::Protocol) => {
                "SMS protocol mode: give the procedure for the entity. Numbered steps are fine, \
                 keep them short. Plain text, under 300 characters."
            }
            PromptSource::Demo => {
                "You are running from the demo endpoint. Reply as you would on a phone call."
            }
            PromptSource::App => {
                "You are talking through the companion app. Your reply is shown as text and \
                 played aloud, so keep it short and speakable."
            }
        }
    }
}

/// Base prompt, source addendum and optional style hint
pub fn build_system_prompt(source: PromptSource, style_hint: Option<&str>) -> String {
    let mut prompt = String::with_capacity(SYSTEM_PROMPT.len() + 512);
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n\n");
    prompt.push_str(source.addendum());
    if let Some(hint) = style_hint.filter(|h| !h.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(hint);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_source_and_hint() {
        let prompt = build_system_prompt(PromptSource::PhoneBriefing, Some("Be brief."));
        assert!(prompt.starts_with("You are Charlotte"));
        assert!(prompt.contains("spoken briefing"));
        assert!(prompt.ends_with("Be brief."));

        let plain = build_system_prompt(PromptSource::Phone, None);
        assert!(plain.contains("live phone call"));
        assert!(!plain.contains("Be brief."));
    }

    #[test]
    fn test_source_keys() {
        assert_eq!(PromptSource::SmsEntity(EntityMode::Metric).as_str(), "sms_metric");
        assert_eq!(PromptSource::SmsEntity(EntityMode::General).as_str(), "sms");
        assert_eq!(PromptSource::PhoneBriefing.as_str(), "phone_briefing");
        assert_eq!(PromptSource::App.as_str(), "app");
    }
}
