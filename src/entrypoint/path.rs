//! URL path finders: folders, filename and path discovery

use super::{Affixed, Entrypoint, Finder, InsertionPointType};
use crate::http::Request;

/// Finds every folder segment and the trailing filename of the URL path
pub struct UrlFinder;

impl Finder for UrlFinder {
    fn name(&self) -> &str {
        "url"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let path = &request.path;
        let path_only = request.path_only();
        let mut out = Vec::new();

        let mut start = 0;
        for segment in path_only.split('/') {
            let end = start + segment.len();
            if !segment.is_empty() {
                let kind = if end == path_only.len() {
                    InsertionPointType::UrlPathFilename
                } else {
                    InsertionPointType::UrlPathFolder
                };
                out.push(Entrypoint::Path(Affixed {
                    kind,
                    param: Some(segment.to_string()),
                    value: segment.to_string(),
                    prefix: path[..start].to_string(),
                    suffix: path[end..].to_string(),
                }));
            }
            start = end + 1;
        }

        out
    }
}

/// Finds directory levels where new paths can be probed.
///
/// The single variant targets the directory of the request; the multi
/// variant targets every directory level from the root down. Both drop the
/// rest of the path and the query.
pub struct PathDiscoveryFinder;

impl Finder for PathDiscoveryFinder {
    fn name(&self) -> &str {
        "path_discovery"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let path_only = request.path_only();
        if !path_only.starts_with('/') {
            return Vec::new();
        }

        let discovery = |kind: InsertionPointType, dir: &str| {
            Entrypoint::Path(Affixed {
                kind,
                param: None,
                value: String::new(),
                prefix: dir.to_string(),
                suffix: String::new(),
            })
        };

        let mut out = Vec::new();
        if let Some(last) = path_only.rfind('/') {
            out.push(discovery(
                InsertionPointType::SinglePathDiscovery,
                &path_only[..=last],
            ));
        }

        for (idx, _) in path_only.match_indices('/') {
            out.push(discovery(
                InsertionPointType::PathDiscovery,
                &path_only[..=idx],
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entrypoint::PayloadPosition;

    fn request(path: &str) -> Request {
        Request::get(&format!("http://a.test{path}")).expect("valid url")
    }

    #[test]
    fn test_folders_and_filename() {
        let req = request("/api/v1/users.php?id=1");
        let points = UrlFinder.find(&req);
        let kinds: Vec<_> = points.iter().map(|p| (p.kind(), p.value().to_string())).collect();
        assert_eq!(
            kinds,
            vec![
                (InsertionPointType::UrlPathFolder, "api".to_string()),
                (InsertionPointType::UrlPathFolder, "v1".to_string()),
                (InsertionPointType::UrlPathFilename, "users.php".to_string()),
            ]
        );

        let out = points[1].inject(&req, PayloadPosition::Replace, "..%2f");
        assert_eq!(out.path, "/api/..%2f/users.php?id=1");
    }

    #[test]
    fn test_trailing_slash_has_no_filename() {
        let points = UrlFinder.find(&request("/admin/"));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].kind(), InsertionPointType::UrlPathFolder);
    }

    #[test]
    fn test_path_discovery_levels() {
        let req = request("/a/b/c.php?x=1");
        let points = PathDiscoveryFinder.find(&req);

        let single: Vec<_> = points
            .iter()
            .filter(|p| p.kind() == InsertionPointType::SinglePathDiscovery)
            .collect();
        assert_eq!(single.len(), 1);
        assert_eq!(
            single[0].inject(&req, PayloadPosition::Replace, ".git/HEAD").path,
            "/a/b/.git/HEAD"
        );

        let multi: Vec<String> = points
            .iter()
            .filter(|p| p.kind() == InsertionPointType::PathDiscovery)
            .map(|p| p.inject(&req, PayloadPosition::Replace, "x").path)
            .collect();
        assert_eq!(multi, vec!["/x", "/a/x", "/a/b/x"]);
    }
}
