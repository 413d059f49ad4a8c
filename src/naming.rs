use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9._~-]+").expect("valid slug pattern"))
}

/// Allocates RO-relative slugs, never handing out the same path twice within
/// one research object.
#[derive(Debug, Clone)]
pub struct NameAllocator {
    ro: Url,
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new(ro: &Url) -> Self {
        Self {
            ro: ro.clone(),
            taken: HashSet::new(),
        }
    }

    /// Marks the paths of already aggregated resources as taken.
    pub fn reserve_existing<'a>(&mut self, resources: impl IntoIterator<Item = &'a Url>) {
        for resource in resources {
            if let Some(path) = self.relative(resource) {
                self.taken.insert(path);
            }
        }
    }

    pub fn relative(&self, uri: &Url) -> Option<String> {
        uri.as_str()
            .strip_prefix(self.ro.as_str())
            .map(ToOwned::to_owned)
    }

    /// Slug prefix for resources placed in `folder`: its path relative to the
    /// RO with a trailing slash, or empty when the folder lives elsewhere.
    pub fn folder_base(&self, folder: Option<&Url>) -> String {
        let Some(relative) = folder.and_then(|folder| self.relative(folder)) else {
            return String::new();
        };
        if relative.is_empty() || relative.ends_with('/') {
            relative
        } else {
            format!("{relative}/")
        }
    }

    pub fn allocate(&mut self, folder: Option<&Url>, name: &str) -> String {
        let base = self.folder_base(folder);
        let name = sanitize(name);
        let (stem, ext) = split_extension(&name);

        let mut candidate = format!("{base}{name}");
        let mut counter = 2usize;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}{stem}-{counter}{ext}");
            counter += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

pub fn sanitize(name: &str) -> String {
    let cleaned = unsafe_chars().replace_all(name.trim(), "_");
    if cleaned.is_empty() {
        "resource".to_string()
    } else {
        cleaned.into_owned()
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
