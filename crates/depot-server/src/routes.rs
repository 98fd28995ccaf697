//! Path-to-operation parsing for each registry prefix.
//!
//! Parsers only split the path; identifier validation is the adapters' job.

/// Operations under `/pypi/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PypiRoute<'a> {
    SimpleRoot,
    SimpleIndex(&'a str),
    PackageJson(&'a str),
    VersionJson(&'a str, &'a str),
    Artifact(&'a str),
}

impl<'a> PypiRoute<'a> {
    pub fn parse(rest: &'a str) -> Option<Self> {
        if let Some(path) = rest.strip_prefix("packages/") {
            return (!path.is_empty()).then_some(Self::Artifact(path));
        }

        let parts: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
        match parts.as_slice() {
            ["simple"] => Some(Self::SimpleRoot),
            ["simple", package] => Some(Self::SimpleIndex(package)),
            [package, "json"] => Some(Self::PackageJson(package)),
            [package, version, "json"] => Some(Self::VersionJson(package, version)),
            _ => None,
        }
    }
}

/// Read operations under `/npm/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpmRoute<'a> {
    Package(&'a str),
    Version(&'a str, &'a str),
    Tarball(&'a str, &'a str),
}

impl<'a> NpmRoute<'a> {
    /// A leading `@scope/` makes the first two segments the package name.
    pub fn parse(rest: &'a str) -> Option<Self> {
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return None;
        }

        let (package, tail) = if rest.starts_with('@') {
            let slash = rest.find('/')?;
            match rest[slash + 1..].find('/') {
                Some(end) => rest.split_at(slash + 1 + end),
                None => (rest, ""),
            }
        } else {
            rest.split_once('/').unwrap_or((rest, ""))
        };
        let tail = tail.trim_start_matches('/');

        let parts: Vec<&str> = if tail.is_empty() {
            Vec::new()
        } else {
            tail.split('/').collect()
        };
        match parts.as_slice() {
            [] => Some(Self::Package(package)),
            ["-", file] => Some(Self::Tarball(package, file)),
            [version] => Some(Self::Version(package, version)),
            _ => None,
        }
    }
}

/// A path under `/maven2/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MavenRoute<'a>(pub &'a str);

impl<'a> MavenRoute<'a> {
    pub fn parse(path: &'a str) -> Option<Self> {
        (!path.is_empty() && !path.ends_with('/')).then_some(Self(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pypi_routes() {
        assert_eq!(PypiRoute::parse("simple/"), Some(PypiRoute::SimpleRoot));
        assert_eq!(
            PypiRoute::parse("simple/requests/"),
            Some(PypiRoute::SimpleIndex("requests"))
        );
        assert_eq!(
            PypiRoute::parse("requests/json"),
            Some(PypiRoute::PackageJson("requests"))
        );
        assert_eq!(
            PypiRoute::parse("requests/2.31.0/json"),
            Some(PypiRoute::VersionJson("requests", "2.31.0"))
        );
        assert_eq!(
            PypiRoute::parse("packages/ab/cd/requests-2.31.0.tar.gz"),
            Some(PypiRoute::Artifact("ab/cd/requests-2.31.0.tar.gz"))
        );
        assert_eq!(PypiRoute::parse("packages/"), None);
        assert_eq!(PypiRoute::parse("requests"), None);
        assert_eq!(PypiRoute::parse("a/b/c/json"), None);
    }

    #[test]
    fn test_npm_routes() {
        assert_eq!(NpmRoute::parse("lodash"), Some(NpmRoute::Package("lodash")));
        assert_eq!(
            NpmRoute::parse("@types/react"),
            Some(NpmRoute::Package("@types/react"))
        );
        assert_eq!(
            NpmRoute::parse("@types/react/18.2.0"),
            Some(NpmRoute::Version("@types/react", "18.2.0"))
        );
        assert_eq!(
            NpmRoute::parse("lodash/4.17.21"),
            Some(NpmRoute::Version("lodash", "4.17.21"))
        );
        assert_eq!(
            NpmRoute::parse("lodash/-/lodash-4.17.21.tgz"),
            Some(NpmRoute::Tarball("lodash", "lodash-4.17.21.tgz"))
        );
        assert_eq!(
            NpmRoute::parse("@types/react/-/react-18.2.0.tgz"),
            Some(NpmRoute::Tarball("@types/react", "react-18.2.0.tgz"))
        );
        assert_eq!(NpmRoute::parse(""), None);
        assert_eq!(NpmRoute::parse("@types"), None);
        assert_eq!(NpmRoute::parse("lodash/a/b/c"), None);
    }

    #[test]
    fn test_maven_route() {
        assert_eq!(
            MavenRoute::parse("org/x/y/1.0/y-1.0.jar"),
            Some(MavenRoute("org/x/y/1.0/y-1.0.jar"))
        );
        assert_eq!(MavenRoute::parse("org/x/"), None);
    }
}
