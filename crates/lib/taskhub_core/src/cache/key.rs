//! Cache key derivation and glob patterns.
//!
//! Layout:
//!
//! ```text
//! cache:tenant:<tenant>:<audience>:<route>[?<sorted query>]
//! cache:anon:<route>[?<sorted query>]
//! ```
//!
//! The tenant is percent-encoded so it can never contain `:` and two tenants
//! can never produce the same prefix. Anonymous reads live under their own
//! partition.

use std::fmt;

use url::form_urlencoded;

use crate::models::resource::ResourceKind;

const PREFIX: &str = "cache";

/// Who a cached view was computed for, inside one tenant.
///
/// Views that are identical for every member of the tenant use `Tenant`.
/// Views filtered by the caller (a non-admin's project listing) use `User`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Tenant,
    User(String),
}

/// A fully derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a read of `route` with an optional raw query string.
    /// `tenant_id` is `None` for unauthenticated reads.
    pub fn for_request(
        route: &str,
        query: Option<&str>,
        tenant_id: Option<&str>,
        audience: &Audience,
    ) -> Self {
        let target = match query.map(normalize_query).filter(|q| !q.is_empty()) {
            Some(q) => format!("{route}?{q}"),
            None => route.to_string(),
        };
        match tenant_id {
            Some(tenant) => {
                let audience = match audience {
                    Audience::Tenant => "all".to_string(),
                    Audience::User(id) => format!("user:{}", encode(id)),
                };
                CacheKey(format!(
                    "{PREFIX}:tenant:{}:{audience}:{target}",
                    encode(tenant)
                ))
            }
            None => CacheKey(format!("{PREFIX}:anon:{target}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pattern matching every entry of `tenant_id` whose route mentions `segment`.
pub fn tenant_pattern(tenant_id: &str, segment: &str) -> String {
    format!(
        "{PREFIX}:tenant:{}:*{}*",
        escape_glob(&encode(tenant_id)),
        escape_glob(segment)
    )
}

/// Patterns to delete when a resource of `kind` changes in `tenant_id`.
pub fn invalidation_patterns(kind: ResourceKind, tenant_id: &str) -> Vec<String> {
    kind.cache_segments()
        .iter()
        .map(|segment| tenant_pattern(tenant_id, segment))
        .collect()
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Sort query pairs so `?a=1&b=2` and `?b=2&a=1` share one entry.
fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Escape glob metacharacters so the text matches only itself.
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Redis-compatible glob match: `*`, `?`, `[...]` classes (with `^` negation
/// and ranges) and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
            continue;
        }
        if pi < p.len()
            && let Some(next) = step(&p, pi, t[ti])
        {
            pi = next;
            ti += 1;
            continue;
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match one non-star token at `pi` against `c`, returning the next index.
fn step(p: &[char], pi: usize, c: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        '[' => match class_end(p, pi) {
            Some(end) => class_matches(&p[pi + 1..end], c).then_some(end + 1),
            None => (c == '[').then_some(pi + 1),
        },
        lit => (lit == c).then_some(pi + 1),
    }
}

fn class_end(p: &[char], open: usize) -> Option<usize> {
    let mut i = open + 1;
    while i < p.len() {
        match p[i] {
            '\\' => i += 2,
            ']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn class_matches(body: &[char], c: char) -> bool {
    let (negated, body) = match body.first() {
        Some('^') => (true, &body[1..]),
        _ => (false, body),
    };
    let mut i = 0;
    let mut found = false;
    while i < body.len() {
        let lo = if body[i] == '\\' && i + 1 < body.len() {
            i += 1;
            body[i]
        } else {
            body[i]
        };
        if i + 2 < body.len() && body[i + 1] == '-' {
            let hi = body[i + 2];
            if lo <= c && c <= hi {
                found = true;
            }
            i += 3;
        } else {
            if lo == c {
                found = true;
            }
            i += 1;
        }
    }
    found != negated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_keys_never_collide() {
        let a = CacheKey::for_request("/api/projects", None, Some("t1"), &Audience::Tenant);
        let b = CacheKey::for_request("/api/projects", None, Some("t2"), &Audience::Tenant);
        assert_ne!(a, b);
    }

    #[test]
    fn anonymous_partition_is_distinct() {
        let anon = CacheKey::for_request("/api/projects", None, None, &Audience::Tenant);
        let named_anon = CacheKey::for_request("/api/projects", None, Some("anon"), &Audience::Tenant);
        assert_eq!(anon.as_str(), "cache:anon:/api/projects");
        assert_ne!(anon, named_anon);
    }

    #[test]
    fn tenant_with_separator_cannot_spoof_another_tenant() {
        let tricky = CacheKey::for_request("x", None, Some("t1:all:/api"), &Audience::Tenant);
        let plain = CacheKey::for_request("/api:x", None, Some("t1"), &Audience::Tenant);
        assert_ne!(tricky, plain);
        assert!(!glob_match(&tenant_pattern("t1", "api"), tricky.as_str()));
    }

    #[test]
    fn query_order_is_normalized() {
        let a = CacheKey::for_request("/r", Some("b=2&a=1"), Some("t1"), &Audience::Tenant);
        let b = CacheKey::for_request("/r", Some("a=1&b=2"), Some("t1"), &Audience::Tenant);
        assert_eq!(a, b);
        let none = CacheKey::for_request("/r", Some(""), Some("t1"), &Audience::Tenant);
        assert_eq!(none.as_str(), "cache:tenant:t1:all:/r");
    }

    #[test]
    fn audiences_are_separate() {
        let all = CacheKey::for_request("/r", None, Some("t1"), &Audience::Tenant);
        let u1 = CacheKey::for_request("/r", None, Some("t1"), &Audience::User("u1".into()));
        let u2 = CacheKey::for_request("/r", None, Some("t1"), &Audience::User("u2".into()));
        assert_ne!(all, u1);
        assert_ne!(u1, u2);
    }

    #[test]
    fn invalidation_pattern_scopes_tenant_and_resource() {
        let pattern = tenant_pattern("t1", "projects");
        let hit = CacheKey::for_request("/api/projects/p1", None, Some("t1"), &Audience::Tenant);
        let user_hit =
            CacheKey::for_request("/api/projects", None, Some("t1"), &Audience::User("u9".into()));
        let other_tenant = CacheKey::for_request("/api/projects", None, Some("t2"), &Audience::Tenant);
        let other_route = CacheKey::for_request("/api/tasks/k1", None, Some("t1"), &Audience::Tenant);
        assert!(glob_match(&pattern, hit.as_str()));
        assert!(glob_match(&pattern, user_hit.as_str()));
        assert!(!glob_match(&pattern, other_tenant.as_str()));
        assert!(!glob_match(&pattern, other_route.as_str()));
    }

    #[test]
    fn task_changes_invalidate_project_views() {
        let patterns = invalidation_patterns(ResourceKind::Task, "t1");
        let project_view = CacheKey::for_request("/api/projects", None, Some("t1"), &Audience::Tenant);
        assert!(patterns.iter().any(|p| glob_match(p, project_view.as_str())));
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
        assert!(glob_match(&escape_glob("t[1]*"), "t[1]*"));
    }
}
