use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

/// Outcome of the decode-with-fallback contract: either the structured
/// payload, or the raw text when the model ignored the JSON instruction.
/// The decode step itself never fails.
#[derive(Debug, Clone)]
pub enum Decoded<T> {
    Parsed(T),
    Raw(String),
}

impl<T> Decoded<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            Decoded::Parsed(value) => Some(value),
            Decoded::Raw(_) => None,
        }
    }
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?").unwrap())
}

fn quote_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^"+|"+$"#).unwrap())
}

/// Strip Markdown code-fence markup the model sometimes wraps JSON in.
pub fn clean_model_output(raw: &str) -> String {
    fence_regex().replace_all(raw, "").trim().to_string()
}

/// Strip leading/trailing double quotes from user-facing text, per line.
pub fn strip_outer_quotes(text: &str) -> String {
    quote_regex().replace_all(text, "").to_string()
}

/// Attempt a strict structured decode; on failure hand back the raw text.
pub fn decode_or_text<T: DeserializeOwned>(raw: &str) -> Decoded<T> {
    let cleaned = clean_model_output(raw);
    match serde_json::from_str::<T>(&cleaned) {
        Ok(value) => Decoded::Parsed(value),
        Err(_) => Decoded::Raw(cleaned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Reply {
        response: String,
    }

    #[test]
    fn test_decode_plain_json() {
        let decoded: Decoded<Reply> = decode_or_text(r#"{"response": "hello"}"#);
        assert_eq!(decoded.parsed().unwrap().response, "hello");
    }

    #[test]
    fn test_decode_fenced_json() {
        let raw = "```json\n{\"response\": \"hello\"}\n```";
        let decoded: Decoded<Reply> = decode_or_text(raw);
        assert_eq!(decoded.parsed().unwrap().response, "hello");
    }

    #[test]
    fn test_decode_falls_back_to_raw_text() {
        let decoded: Decoded<Reply> = decode_or_text("not json");
        match decoded {
            Decoded::Raw(text) => assert_eq!(text, "not json"),
            Decoded::Parsed(_) => panic!("expected raw fallback"),
        }
    }

    #[test]
    fn test_decode_incomplete_json_is_raw() {
        // Syntactically valid JSON that misses the expected key.
        let decoded: Decoded<Reply> = decode_or_text(r#"{"other": 1}"#);
        assert!(matches!(decoded, Decoded::Raw(_)));
    }

    #[test]
    fn test_strip_outer_quotes() {
        assert_eq!(strip_outer_quotes("\"hello\""), "hello");
        assert_eq!(strip_outer_quotes("\"\"hi\"\""), "hi");
        assert_eq!(strip_outer_quotes("say \"hi\" now"), "say \"hi\" now");
    }

    #[test]
    fn test_clean_model_output_keeps_prose() {
        assert_eq!(clean_model_output("  plain answer  "), "plain answer");
    }
}
