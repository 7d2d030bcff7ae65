use regex::Regex;
use std::sync::OnceLock;

fn sentinel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Retry the (\S+) tool call now\.").expect("sentinel pattern is valid")
    })
}

/// Compose the user-turn text that instructs a resumed agent to re-raise
/// a specific tool call.
pub fn retry_sentinel(tool_name: &str) -> String {
    format!(
        "Retry the {} tool call now. Use exactly the same tool and input as the \
         pending call; do not run anything else first.",
        tool_name
    )
}

/// Recognize the sentinel produced by [`retry_sentinel`]; returns the tool
/// name when the text is one.
pub fn parse_retry_sentinel(text: &str) -> Option<String> {
    sentinel_re()
        .captures(text)
        .map(|caps| caps[1].to_string())
}
