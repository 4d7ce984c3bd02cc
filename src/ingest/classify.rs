/// Coarse browser / OS / language bucketing for visit records.
///
/// Every rule is a set of lowercase substrings that must all be present in the
/// lowercased input. Rules are checked top to bottom and the first match wins,
/// so more specific rules sit above the generic ones they would otherwise shadow.
type Rule = (&'static [&'static str], &'static str);

/// Bucket used when no browser or OS rule matches.
pub const OTHER: &str = "Other";

/// Bucket used when no language rule matches.
pub const OTHER_LANGUAGE: &str = "other";

const BROWSER_RULES: &[Rule] = &[
    (&["msie 6"], "MSIE 6.x"),
    (&["msie 5"], "MSIE 5.x"),
    (&["msie 4"], "MSIE 4.x"),
    (&["netscape"], "Netscape"),
    // Edge and Opera both carry "chrome" in their UA
    (&["edg/"], "Edge"),
    (&["edge/"], "Edge"),
    (&["opr/"], "Opera"),
    (&["firefox"], "Firefox"),
    (&["chrome"], "Chrome"),
    // Chrome carries "safari" too, so Safari must come after it
    (&["safari"], "Safari"),
    (&["opera"], "Opera"),
];

const OS_RULES: &[Rule] = &[
    (&["windows 98"], "Windows 98"),
    (&["win98"], "Windows 98"),
    (&["win", "nt 5.0"], "Windows 2000"),
    (&["win", "nt 5.1"], "Windows XP"),
    (&["win", "nt 5.2"], "Windows 2003"),
    (&["win", "nt 6.0"], "Windows Vista"),
    (&["win", "nt 6.1"], "Windows 7"),
    (&["win", "nt 6.2"], "Windows 8"),
    (&["win", "nt 6.3"], "Windows 8.1"),
    (&["win", "nt 10.0"], "Windows 10"),
    (&["windows"], "Windows"),
    // Android UAs contain "linux", iOS UAs contain "mac os x"
    (&["android"], "Android"),
    (&["iphone"], "iOS"),
    (&["ipad"], "iOS"),
    (&["linux"], "Linux"),
    (&["unix"], "Unix"),
    (&["mac"], "Mac OS"),
];

const LANGUAGE_RULES: &[Rule] = &[
    (&["zh-cn"], "zh-cn"),
    (&["zh-tw"], "zh-tw"),
    (&["en"], "en"),
];

/// Result of classifying one beacon's user agent and language tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub browser: &'static str,
    pub os: &'static str,
    pub language: &'static str,
}

/// Classify a User-Agent string and a language tag into coarse buckets.
///
/// Total and deterministic: unknown or empty input lands in the fallback bucket.
pub fn classify(user_agent: &str, language: &str) -> Classification {
    Classification {
        browser: browser_bucket(user_agent),
        os: os_bucket(user_agent),
        language: language_bucket(language),
    }
}

pub fn browser_bucket(user_agent: &str) -> &'static str {
    first_match(BROWSER_RULES, user_agent).unwrap_or(OTHER)
}

pub fn os_bucket(user_agent: &str) -> &'static str {
    first_match(OS_RULES, user_agent).unwrap_or(OTHER)
}

pub fn language_bucket(language: &str) -> &'static str {
    first_match(LANGUAGE_RULES, language).unwrap_or(OTHER_LANGUAGE)
}

fn first_match(rules: &[Rule], input: &str) -> Option<&'static str> {
    let input = input.to_lowercase();
    rules
        .iter()
        .find(|(needles, _)| needles.iter().all(|needle| input.contains(needle)))
        .map(|(_, bucket)| *bucket)
}
