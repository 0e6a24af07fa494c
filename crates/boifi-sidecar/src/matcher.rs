use boifi_domain::{FaultRule, MatchPredicate, StringMatch};
use regex::Regex;
use tracing::warn;

fn string_match(m: &StringMatch, value: &str) -> bool {
    match m {
        StringMatch::Exact(want) => want == value,
        StringMatch::Prefix(want) => value.starts_with(want.as_str()),
        StringMatch::Regex(pattern) => match Regex::new(pattern) {
            Ok(re) => re.is_match(value),
            Err(e) => {
                warn!(pattern, error = %e, "invalid regex in match predicate, treating as no-match");
                false
            }
        },
    }
}

/// Whether an intercepted request's attributes satisfy a rule's predicate.
/// A predicate field left unset matches anything.
pub fn matches_request(predicate: &MatchPredicate, method: &str, path: &str, headers: &[(String, String)]) -> bool {
    if let Some(m) = &predicate.method {
        if !string_match(m, method) {
            return false;
        }
    }
    if let Some(p) = &predicate.path {
        if !string_match(p, path) {
            return false;
        }
    }
    for (name, want) in &predicate.headers {
        let found = headers.iter().any(|(n, v)| n.eq_ignore_ascii_case(name) && v == want);
        if !found {
            return false;
        }
    }
    true
}

/// First rule in `rules` whose predicate matches, in list order.
pub fn first_match<'a>(
    rules: &'a [FaultRule],
    method: &str,
    path: &str,
    headers: &[(String, String)],
) -> Option<&'a FaultRule> {
    rules.iter().find(|r| matches_request(&r.match_predicate, method, path, headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boifi_domain::{FaultAction, FaultRule};

    fn rule(method: Option<StringMatch>, path: Option<StringMatch>) -> FaultRule {
        FaultRule {
            match_predicate: MatchPredicate { method, path, headers: Default::default() },
            fault: FaultAction::Abort { http_status: 503 },
            percentage: 100.0,
            start_delay_ms: None,
            duration_seconds: None,
        }
    }

    #[test]
    fn unset_fields_match_anything() {
        let r = rule(None, None);
        assert!(matches_request(&r.match_predicate, "GET", "/anything", &[]));
    }

    #[test]
    fn exact_method_must_match() {
        let r = rule(Some(StringMatch::Exact("POST".into())), None);
        assert!(!matches_request(&r.match_predicate, "GET", "/x", &[]));
        assert!(matches_request(&r.match_predicate, "POST", "/x", &[]));
    }

    #[test]
    fn prefix_path_matches() {
        let r = rule(None, Some(StringMatch::Prefix("/api/v1/".into())));
        assert!(matches_request(&r.match_predicate, "GET", "/api/v1/orders", &[]));
        assert!(!matches_request(&r.match_predicate, "GET", "/api/v2/orders", &[]));
    }

    #[test]
    fn regex_path_matches() {
        let r = rule(None, Some(StringMatch::Regex(r"^/users/\d+$".into())));
        assert!(matches_request(&r.match_predicate, "GET", "/users/42", &[]));
        assert!(!matches_request(&r.match_predicate, "GET", "/users/abc", &[]));
    }

    #[test]
    fn missing_required_header_fails() {
        let mut r = rule(None, None);
        r.match_predicate.headers.insert("x-boifi-request-id".into(), "probe".into());
        assert!(!matches_request(&r.match_predicate, "GET", "/x", &[]));
        assert!(matches_request(
            &r.match_predicate,
            "GET",
            "/x",
            &[("X-Boifi-Request-Id".to_string(), "probe".to_string())]
        ));
    }

    #[test]
    fn first_match_wins() {
        let rules = vec![rule(Some(StringMatch::Exact("GET".into())), None), rule(None, None)];
        let m = first_match(&rules, "GET", "/x", &[]).unwrap();
        assert!(std::ptr::eq(m, &rules[0]));
    }
}
