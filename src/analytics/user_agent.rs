//! User-agent classification

use woothee::parser::Parser;

use crate::models::BrowserFact;

const WOOTHEE_UNKNOWN: &str = "UNKNOWN";

/// Parses a raw user-agent string into browser facts
pub trait BrowserParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> BrowserFact;
}

/// `BrowserParser` backed by woothee
pub struct WootheeParser {
    parser: Parser,
}

impl WootheeParser {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }
}

impl Default for WootheeParser {
    fn default() -> Self {
        Self::new()
    }
}

fn known(value: &str) -> String {
    if value.is_empty() || value == WOOTHEE_UNKNOWN {
        String::new()
    } else {
        value.to_string()
    }
}

impl BrowserParser for WootheeParser {
    fn parse(&self, user_agent: &str) -> BrowserFact {
        if user_agent.is_empty() {
            return BrowserFact::default();
        }

        match self.parser.parse(user_agent) {
            Some(result) => BrowserFact {
                name: known(result.name),
                version: known(result.version),
                platform: known(result.os),
                is_mobile: matches!(result.category, "smartphone" | "mobilephone"),
            },
            None => BrowserFact::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";

    #[test]
    fn test_desktop_browser() {
        let fact = WootheeParser::new().parse(FIREFOX_LINUX);
        assert_eq!(fact.name, "Firefox");
        assert_eq!(fact.version, "121.0");
        assert_eq!(fact.platform, "Linux");
        assert!(!fact.is_mobile);
    }

    #[test]
    fn test_mobile_browser() {
        let fact = WootheeParser::new().parse(SAFARI_IPHONE);
        assert_eq!(fact.name, "Safari");
        assert_eq!(fact.platform, "iPhone");
        assert!(fact.is_mobile);
    }

    #[test]
    fn test_empty_and_garbage() {
        let parser = WootheeParser::new();
        assert_eq!(parser.parse(""), BrowserFact::default());
        assert!(!parser.parse("definitely not a browser").is_mobile);
    }

    #[test]
    fn test_same_input_same_fact() {
        let parser = WootheeParser::new();
        assert_eq!(parser.parse(SAFARI_IPHONE), parser.parse(SAFARI_IPHONE));
    }
}
