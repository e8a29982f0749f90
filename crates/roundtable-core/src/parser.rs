//! Best-effort extraction of the two labeled sections from free-form
//! model output.
//!
//! Models are asked for a `PUBLIC RESPONSE:` section followed by a
//! `PRIVATE THOUGHTS:` section. Headers are matched case-insensitively and
//! tolerate markdown emphasis (`**PUBLIC RESPONSE:**`). When the public
//! header is missing the whole text becomes the public reply, so model
//! output is never dropped.
//!
//! Echoed speaker labels ("User A: User A: ...") are removed only where
//! they are clearly artifacts: a run at the very start of a section, or a
//! run of two or more at the start of a later line. A label is only
//! removed when text follows it on the same line.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Generic speaker labels models echo back: "User A", "agent BC".
/// The keyword is case-insensitive, the name must be agent-style capitals.
const GENERIC_LABEL: &str = r"(?i:user|agent)[ \t]+[A-Z]{1,3}";

static PUBLIC_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)PUBLIC[ \t]+RESPONSE\**[ \t]*:\**(.*?)(?:[#*]*[ \t]*PRIVATE[ \t]+THOUGHTS\**[ \t]*:|\z)",
    )
    .unwrap()
});

static PRIVATE_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)PRIVATE[ \t]+THOUGHTS\**[ \t]*:\**(.*)\z").unwrap());

static GENERIC_PARSER: LazyLock<ResponseParser> =
    LazyLock::new(|| ResponseParser::with_labels(GENERIC_LABEL).unwrap());

/// The split result of one model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub public_response: String,
    pub private_thoughts: String,
}

impl AgentResponse {
    /// Substitute reply used when the backend call fails.
    pub fn unavailable(agent_name: &str, error: &dyn std::fmt::Display) -> Self {
        Self {
            public_response: format!("[{agent_name} is unavailable and could not respond this turn.]"),
            private_thoughts: format!("Backend error: {error}"),
        }
    }
}

/// Section splitter with its label-stripping patterns compiled once.
///
/// Build one per agent with [`ResponseParser::for_agent`] and reuse it.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    leading: Regex,
    repeated: Regex,
}

impl ResponseParser {
    /// Strips the generic labels plus `agent_name`'s own label, matched
    /// case-insensitively and optionally qualified as "User <name>".
    pub fn for_agent(agent_name: &str) -> Self {
        let name = agent_name.trim();
        if name.is_empty() {
            return GENERIC_PARSER.clone();
        }
        let own = format!(r"(?i:(?:user|agent)[ \t]+)?(?i:{})", regex::escape(name));
        Self::with_labels(&format!("{GENERIC_LABEL}|{own}"))
            .unwrap_or_else(|_| GENERIC_PARSER.clone())
    }

    fn with_labels(labels: &str) -> Result<Self, regex::Error> {
        let label = format!(r"(?:{labels})[ \t]*:[ \t]*");
        // `(\S)` keeps the first character of the remaining text, so a label
        // with nothing after it on its line is left alone.
        Ok(Self {
            leading: Regex::new(&format!(r"\A(?:{label})+(\S)"))?,
            repeated: Regex::new(&format!(r"(?m)^[ \t]*(?:{label}){{2,}}(\S)"))?,
        })
    }

    pub fn parse(&self, raw: &str) -> AgentResponse {
        let Some(public) = PUBLIC_SECTION.captures(raw).and_then(|c| c.get(1)) else {
            return AgentResponse {
                public_response: self.strip_labels(raw),
                private_thoughts: String::new(),
            };
        };

        let private = PRIVATE_SECTION
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| self.strip_labels(m.as_str()))
            .unwrap_or_default();

        AgentResponse {
            public_response: self.strip_labels(public.as_str()),
            private_thoughts: private,
        }
    }

    fn strip_labels(&self, text: &str) -> String {
        let text = self.leading.replace(text.trim(), "${1}");
        self.repeated.replace_all(&text, "${1}").trim().to_string()
    }
}

/// Split a raw reply, stripping only the generic "User X: " label family.
pub fn parse_response(raw: &str) -> AgentResponse {
    GENERIC_PARSER.parse(raw)
}

/// Split a raw reply from `agent_name`, additionally stripping that
/// agent's own "<name>: " echoes.
pub fn parse_response_for(raw: &str, agent_name: &str) -> AgentResponse {
    ResponseParser::for_agent(agent_name).parse(raw)
}
