use serde::{Deserialize, Serialize};
use url::Url;

/// One search-engine attribution rule.
///
/// A referrer whose base (`scheme://host`) contains any of `domains` is
/// attributed to `name`; the keyword is the first non-empty value among
/// `query_params`, probed in listed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerRule {
    pub name: String,
    pub domains: Vec<String>,
    pub query_params: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl ReferrerRule {
    pub fn new(name: &str, domains: &[&str], query_params: &[&str], priority: i32) -> Self {
        Self {
            name: name.to_string(),
            domains: domains.iter().map(|d| (*d).to_string()).collect(),
            query_params: query_params.iter().map(|p| (*p).to_string()).collect(),
            priority,
        }
    }

    fn matches(&self, base_referrer: &str) -> bool {
        self.domains
            .iter()
            .any(|domain| !domain.is_empty() && base_referrer.contains(domain.as_str()))
    }

    fn keyword(&self, url: &Url) -> Option<String> {
        self.query_params.iter().find_map(|param| {
            url.query_pairs()
                .find(|(key, _)| key == param)
                .map(|(_, value)| value.into_owned())
                .filter(|value| !value.is_empty())
        })
    }
}

/// The rules in evaluation order.
///
/// Sorted by ascending `priority` once at construction; rules sharing a
/// priority keep the order they were configured in.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ReferrerRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ReferrerRule>) -> Self {
        let mut rules: Vec<ReferrerRule> = rules
            .into_iter()
            .map(|mut rule| {
                rule.domains = rule
                    .domains
                    .iter()
                    .map(|d| d.trim().to_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect();
                rule.query_params = rule
                    .query_params
                    .iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                rule
            })
            .collect();
        rules.sort_by_key(|rule| rule.priority);
        Self { rules }
    }

    /// Search-engine seed set shipped as the default configuration.
    pub fn default_rules() -> Vec<ReferrerRule> {
        vec![
            ReferrerRule::new("Baidu", &["baidu.com"], &["wd", "word"], 1),
            ReferrerRule::new("Google", &["google.cn", "google.com"], &["q"], 2),
            ReferrerRule::new("Yahoo", &["yahoo.com"], &["p"], 3),
            ReferrerRule::new("Bing", &["bing.com"], &["q"], 4),
            ReferrerRule::new("Sogou", &["sogou.com"], &["query"], 5),
        ]
    }

    pub fn rules(&self) -> &[ReferrerRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// How a visit arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerKind {
    Direct,
    SearchEngine,
    External,
}

/// Attribution of a single referrer URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub kind: ReferrerKind,
    pub base_referrer: Option<String>,
    pub search_engine: Option<String>,
    pub keyword: Option<String>,
}

impl Attribution {
    const fn direct() -> Self {
        Self {
            kind: ReferrerKind::Direct,
            base_referrer: None,
            search_engine: None,
            keyword: None,
        }
    }
}

/// Attribute a referrer URL to a search engine, an external site, or direct traffic.
///
/// Attribution stops at the first rule (in `RuleSet` order) whose domain list
/// matches the base referrer. A non-empty referrer without a parseable host is
/// reported as external with no base referrer.
pub fn attribute(referrer: &str, rules: &RuleSet) -> Attribution {
    let referrer = referrer.trim();
    if referrer.is_empty() {
        return Attribution::direct();
    }

    let Some((url, base)) = parse_base(referrer) else {
        return Attribution {
            kind: ReferrerKind::External,
            base_referrer: None,
            search_engine: None,
            keyword: None,
        };
    };

    match rules.rules.iter().find(|rule| rule.matches(&base)) {
        Some(rule) => Attribution {
            kind: ReferrerKind::SearchEngine,
            search_engine: Some(rule.name.clone()),
            keyword: rule.keyword(&url),
            base_referrer: Some(base),
        },
        None => Attribution {
            kind: ReferrerKind::External,
            base_referrer: Some(base),
            search_engine: None,
            keyword: None,
        },
    }
}

/// Parse a referrer and return it together with its `scheme://host[:port]` base.
fn parse_base(referrer: &str) -> Option<(Url, String)> {
    let url = Url::parse(referrer).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?;
    let base = match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    };
    Some((url, base))
}
