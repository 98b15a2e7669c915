//! User-agent classification into device type, OS and browser families.
//!
//! Deliberately coarse: the dashboard buckets by family, not version, so a
//! handful of substring and pattern checks covers the traffic that matters.

use regex::Regex;

use crate::model::DeviceType;

pub struct AgentParser {
    tablet: Regex,
    mobile: Regex,
}

impl Default for AgentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentParser {
    pub fn new() -> Self {
        Self {
            tablet: Regex::new(r"ipad|tablet|playbook|silk").unwrap(),
            mobile: Regex::new(
                r"mobile|iphone|ipod|android|blackberry|opera mini|opera mobi|webos|windows phone|iemobile",
            )
            .unwrap(),
        }
    }

    /// Tablets are matched before mobiles because tablet user agents usually
    /// carry mobile markers too. Android without `mobile` counts as a tablet.
    pub fn device_type(&self, user_agent: &str) -> DeviceType {
        let ua = user_agent.to_lowercase();
        if self.tablet.is_match(&ua) || (ua.contains("android") && !ua.contains("mobile")) {
            return DeviceType::Tablet;
        }
        if self.mobile.is_match(&ua) {
            return DeviceType::Mobile;
        }
        DeviceType::Desktop
    }

    /// Mobile platforms go first: iPhone agents say "like Mac OS X" and
    /// Android agents say "Linux", so the desktop checks would shadow them.
    pub fn os(&self, user_agent: &str) -> String {
        let ua = user_agent.to_lowercase();
        let os = if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
            "iOS"
        } else if ua.contains("android") {
            "Android"
        } else if ua.contains("win") {
            "Windows"
        } else if ua.contains("mac") {
            "macOS"
        } else if ua.contains("linux") {
            "Linux"
        } else {
            "Unknown"
        };
        os.to_string()
    }

    /// Order matters: Chrome advertises `safari`, Edge and Opera advertise
    /// `chrome`, so the more specific tokens are checked first.
    pub fn browser(&self, user_agent: &str) -> String {
        let ua = user_agent.to_lowercase();
        let browser = if ua.contains("firefox") {
            "Firefox"
        } else if ua.contains("edg/") {
            "Edge"
        } else if ua.contains("opr/") || ua.contains("opera") {
            "Opera"
        } else if ua.contains("safari") && !ua.contains("chrome") {
            "Safari"
        } else if ua.contains("chrome") {
            "Chrome"
        } else if ua.contains("msie") || ua.contains("trident/") {
            "Internet Explorer"
        } else {
            "Unknown"
        };
        browser.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0";
    const EDGE_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";
    const ANDROID_PHONE: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
    const ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X710) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

    #[test]
    fn desktops_phones_and_tablets() {
        let parser = AgentParser::new();
        assert_eq!(parser.device_type(CHROME_MAC), DeviceType::Desktop);
        assert_eq!(parser.device_type(SAFARI_IPHONE), DeviceType::Mobile);
        assert_eq!(parser.device_type(ANDROID_PHONE), DeviceType::Mobile);
        assert_eq!(parser.device_type(ANDROID_TABLET), DeviceType::Tablet);
        assert_eq!(parser.device_type(IPAD), DeviceType::Tablet);
    }

    #[test]
    fn browser_families() {
        let parser = AgentParser::new();
        assert_eq!(parser.browser(CHROME_MAC), "Chrome");
        assert_eq!(parser.browser(SAFARI_IPHONE), "Safari");
        assert_eq!(parser.browser(FIREFOX_LINUX), "Firefox");
        assert_eq!(parser.browser(EDGE_WINDOWS), "Edge");
        assert_eq!(parser.browser("some bot"), "Unknown");
    }

    #[test]
    fn os_families() {
        let parser = AgentParser::new();
        assert_eq!(parser.os(CHROME_MAC), "macOS");
        assert_eq!(parser.os(FIREFOX_LINUX), "Linux");
        assert_eq!(parser.os(EDGE_WINDOWS), "Windows");
        assert_eq!(parser.os(ANDROID_PHONE), "Android");
        assert_eq!(parser.os(SAFARI_IPHONE), "iOS");
        assert_eq!(parser.os("curl/8.0"), "Unknown");
    }
}
