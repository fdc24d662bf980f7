//! Include/exclude domain filtering for search results.

use url::Url;

use crate::jobs::model::DomainFilters;

/// Lowercased host of `raw`. Accepts full URLs or bare domains.
pub fn extract_domain(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = Url::parse(raw)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| Url::parse(&format!("https://{raw}")).ok())?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Whether a URL passes the job's domain filters.
///
/// Domains are compared exactly: `blog.example.com` does not match
/// `example.com`. An empty include list admits every domain.
pub fn passes(url: &str, filters: &DomainFilters) -> bool {
    let Some(host) = extract_domain(url) else {
        return false;
    };
    let listed = |terms: &[String]| {
        terms
            .iter()
            .filter_map(|t| extract_domain(t))
            .any(|d| d == host)
    };

    if !filters.include_domains.is_empty() && !listed(&filters.include_domains) {
        return false;
    }
    !listed(&filters.exclude_domains)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(include: &[&str], exclude: &[&str]) -> DomainFilters {
        DomainFilters {
            include_domains: include.iter().map(|s| s.to_string()).collect(),
            exclude_domains: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn extracts_hosts() {
        assert_eq!(extract_domain("https://Example.COM/path?q=1").as_deref(), Some("example.com"));
        assert_eq!(extract_domain("example.com").as_deref(), Some("example.com"));
        assert_eq!(extract_domain("http://www.site.org").as_deref(), Some("www.site.org"));
        assert_eq!(extract_domain(""), None);
    }

    #[test]
    fn no_filters_admit_everything() {
        assert!(passes("https://anything.net/a", &DomainFilters::default()));
    }

    #[test]
    fn include_list_is_exact() {
        let f = filters(&["example.com"], &[]);
        assert!(passes("https://example.com/poem", &f));
        assert!(!passes("https://blog.example.com/poem", &f));
        assert!(!passes("https://notexample.com/poem", &f));
    }

    #[test]
    fn exclude_wins() {
        let f = filters(&["https://example.com"], &["example.com"]);
        assert!(!passes("https://example.com/poem", &f));

        let f = filters(&[], &["wikipedia.org"]);
        assert!(!passes("https://wikipedia.org/wiki/Poem", &f));
        assert!(passes("https://en.wikipedia.org/wiki/Poem", &f));
    }

    #[test]
    fn unparseable_url_is_rejected() {
        assert!(!passes("", &DomainFilters::default()));
    }
}
