//! Per-ecosystem download locations.

use url::Url;

/// Knows where an ecosystem's registry serves package archives.
pub trait RegistryUrlBuilder: Send + Sync {
    /// The ecosystem name used in artifact identifiers, e.g. `npm`.
    fn ecosystem(&self) -> &'static str;

    /// The registry used when none is configured.
    fn default_registry(&self) -> &'static str;

    /// The media type of the archives served by the registry.
    fn content_type(&self) -> &'static str {
        "application/gzip"
    }

    /// Returns the download URL of `name` at `version` on `registry`.
    fn artifact_url(&self, registry: &Url, name: &str, version: &str)
        -> Result<Url, url::ParseError>;
}

/// The npm registry layout: `{registry}/{name}/-/{basename}-{version}.tgz`.
///
/// For scoped packages the basename is the part after the scope, so
/// `@types/node` at `20.1.0` lives at
/// `{registry}/@types/node/-/node-20.1.0.tgz`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NpmRegistry;

/// The public npm registry.
pub const NPM_REGISTRY: &str = "https://registry.npmjs.org";

impl RegistryUrlBuilder for NpmRegistry {
    fn ecosystem(&self) -> &'static str {
        "npm"
    }

    fn default_registry(&self) -> &'static str {
        NPM_REGISTRY
    }

    fn artifact_url(
        &self,
        registry: &Url,
        name: &str,
        version: &str,
    ) -> Result<Url, url::ParseError> {
        let basename = match name.strip_prefix('@') {
            Some(scoped) => scoped.split_once('/').map_or(scoped, |(_, base)| base),
            None => name,
        };
        let base = registry.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{name}/-/{basename}-{version}.tgz"))
    }
}
