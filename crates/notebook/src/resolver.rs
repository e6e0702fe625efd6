//! Import specifier classification.
//!
//! A specifier names either another module of the same request (internal),
//! a remote `https://` URL, or a bare package name that is rewritten onto the
//! package CDN.

use std::collections::BTreeSet;

pub const DEFAULT_PACKAGE_CDN: &str = "https://cdn.skypack.dev/";

const SECURE_REMOTE_SCHEME: &str = "https://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    pub resolved_location: String,
    pub is_internal: bool,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    internal_names: BTreeSet<String>,
    package_cdn: String,
}

impl Resolver {
    pub fn new<I, S>(internal_names: I, package_cdn: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            internal_names: internal_names.into_iter().map(Into::into).collect(),
            package_cdn: package_cdn.into(),
        }
    }

    pub fn is_internal(&self, name: &str) -> bool {
        self.internal_names.contains(name)
    }

    pub fn resolve(&self, specifier: &str) -> ResolvedImport {
        if self.internal_names.contains(specifier) {
            return ResolvedImport {
                resolved_location: specifier.to_string(),
                is_internal: true,
            };
        }
        if specifier.starts_with(SECURE_REMOTE_SCHEME) {
            return ResolvedImport {
                resolved_location: specifier.to_string(),
                is_internal: false,
            };
        }
        ResolvedImport {
            resolved_location: package_url(&self.package_cdn, specifier),
            is_internal: false,
        }
    }
}

/// Classifies `specifier` against `internal_names` using the default CDN.
pub fn resolve(specifier: &str, internal_names: &BTreeSet<String>) -> ResolvedImport {
    Resolver {
        internal_names: internal_names.clone(),
        package_cdn: DEFAULT_PACKAGE_CDN.to_string(),
    }
    .resolve(specifier)
}

fn package_url(package_cdn: &str, specifier: &str) -> String {
    format!(
        "{}/{}",
        package_cdn.trim_end_matches('/'),
        specifier.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_internal_names_win_over_shape() {
        let internal = names(&["utils", "https://looks-remote.dev/x", "lodash"]);
        for specifier in ["utils", "https://looks-remote.dev/x", "lodash"] {
            let resolved = resolve(specifier, &internal);
            assert!(resolved.is_internal, "{specifier} should be internal");
            assert_eq!(resolved.resolved_location, specifier);
        }
    }

    #[test]
    fn test_remote_url_is_unchanged() {
        let resolved = resolve("https://esm.sh/canvas-confetti", &names(&[]));
        assert_eq!(
            resolved,
            ResolvedImport {
                resolved_location: "https://esm.sh/canvas-confetti".to_string(),
                is_internal: false,
            }
        );
    }

    #[test]
    fn test_package_falls_back_to_cdn() {
        let resolved = resolve("d3-array", &names(&["utils"]));
        assert!(!resolved.is_internal);
        assert_eq!(resolved.resolved_location, "https://cdn.skypack.dev/d3-array");

        // Plain http is not a secure remote scheme.
        let resolved = resolve("http://example.com/a.js", &names(&[]));
        assert_eq!(
            resolved.resolved_location,
            "https://cdn.skypack.dev/http://example.com/a.js"
        );
    }

    #[test]
    fn test_custom_cdn() {
        let resolver = Resolver::new(["utils"], "https://esm.sh");
        assert_eq!(resolver.resolve("@scope/pkg").resolved_location, "https://esm.sh/@scope/pkg");
        assert!(resolver.is_internal("utils"));
    }
}
