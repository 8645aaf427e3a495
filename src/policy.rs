use http::{HeaderMap, Method, Uri};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Type alias for the skip predicate function
type SkipFn = Arc<dyn Fn(&Method, &Uri, &HeaderMap) -> bool + Send + Sync>;

/// Decides per request whether the retention layer steps aside entirely.
///
/// A skipped request is forwarded straight to the inner service: no key is
/// derived, storage is never read or written, and the response body is
/// passed through untouched.
#[derive(Clone)]
pub struct Skipper {
    inner: SkipFn,
}

impl Skipper {
    /// Never skips. This is the default.
    pub fn never() -> Self {
        Self::custom(|_, _, _| false)
    }

    /// Skips requests whose path equals one of `paths`.
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: HashSet<String> = paths.into_iter().map(Into::into).collect();
        Self::custom(move |_, uri, _| paths.contains(uri.path()))
    }

    /// Skips requests whose path starts with one of `prefixes`.
    pub fn path_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        Self::custom(move |_, uri, _| {
            prefixes
                .iter()
                .any(|prefix| uri.path().starts_with(prefix.as_str()))
        })
    }

    /// Skips requests made with any of `methods`.
    pub fn methods(methods: impl IntoIterator<Item = Method>) -> Self {
        let methods: HashSet<Method> = methods.into_iter().collect();
        Self::custom(move |method, _, _| methods.contains(method))
    }

    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&Method, &Uri, &HeaderMap) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(func),
        }
    }

    /// Skips when either `self` or `other` skips.
    pub fn or(self, other: Skipper) -> Self {
        Self::custom(move |method, uri, headers| {
            self.should_skip(method, uri, headers) || other.should_skip(method, uri, headers)
        })
    }

    pub fn should_skip(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
        (self.inner)(method, uri, headers)
    }
}

impl Default for Skipper {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for Skipper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Skipper").finish_non_exhaustive()
    }
}

/// Runtime retention policy shared by the layer and every service it builds.
///
/// Policies are cheap to clone and immutable; the `with_*` helpers return
/// new copies with the requested change.
#[derive(Clone, Default)]
pub struct RetentionPolicy {
    skipper: Skipper,
    max_body_size: Option<usize>,
}

impl fmt::Debug for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionPolicy")
            .field("skipper", &self.skipper)
            .field("max_body_size", &self.max_body_size)
            .finish()
    }
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skipper(mut self, skipper: Skipper) -> Self {
        self.skipper = skipper;
        self
    }

    /// Caps the size of bodies that are retained.
    ///
    /// Larger bodies still stream to the caller in full; they are just not
    /// stored. `None` (the default) retains bodies of any size.
    pub fn with_max_body_size(mut self, size: Option<usize>) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn skipper(&self) -> &Skipper {
        &self.skipper
    }

    pub fn max_body_size(&self) -> Option<usize> {
        self.max_body_size
    }

    pub fn should_skip(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
        self.skipper.should_skip(method, uri, headers)
    }

    /// Whether a body of `len` bytes fits under the configured cap.
    pub fn body_fits(&self, len: usize) -> bool {
        self.max_body_size.map_or(true, |max| len <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &str) -> Uri {
        path.parse().unwrap()
    }

    #[test]
    fn default_policy_never_skips() {
        let policy = RetentionPolicy::default();
        assert!(!policy.should_skip(&Method::GET, &uri("/health"), &HeaderMap::new()));
        assert!(policy.body_fits(usize::MAX));
    }

    #[test]
    fn path_skipper_matches_exact_paths_only() {
        let skipper = Skipper::paths(["/health"]);
        let headers = HeaderMap::new();
        assert!(skipper.should_skip(&Method::GET, &uri("/health"), &headers));
        assert!(skipper.should_skip(&Method::GET, &uri("/health?verbose=1"), &headers));
        assert!(!skipper.should_skip(&Method::GET, &uri("/healthz"), &headers));
    }

    #[test]
    fn prefix_and_method_skippers_combine() {
        let skipper = Skipper::path_prefixes(["/admin/"]).or(Skipper::methods([Method::POST]));
        let headers = HeaderMap::new();
        assert!(skipper.should_skip(&Method::GET, &uri("/admin/stats"), &headers));
        assert!(skipper.should_skip(&Method::POST, &uri("/api/orders"), &headers));
        assert!(!skipper.should_skip(&Method::GET, &uri("/api/orders"), &headers));
    }

    #[test]
    fn custom_skipper_sees_headers() {
        let skipper = Skipper::custom(|_, _, headers| headers.contains_key("x-no-retain"));
        let mut headers = HeaderMap::new();
        assert!(!skipper.should_skip(&Method::GET, &uri("/"), &headers));
        headers.insert("x-no-retain", http::HeaderValue::from_static("1"));
        assert!(skipper.should_skip(&Method::GET, &uri("/"), &headers));
    }

    #[test]
    fn max_body_size_caps_retention() {
        let policy = RetentionPolicy::new().with_max_body_size(Some(4));
        assert!(policy.body_fits(4));
        assert!(!policy.body_fits(5));
    }
}
