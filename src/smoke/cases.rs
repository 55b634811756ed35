//! Fixed smoke-test catalog and keyword matching

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeCase {
    pub id: String,
    pub label: String,
    pub path: PathBuf,
    pub expected_keywords: Vec<String>,
    /// Tried in order until one yields a valid image
    pub fallback_urls: Vec<String>,
}

impl SmokeCase {
    pub fn new(id: &str, label: &str, path: PathBuf, keywords: &[&str], urls: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            path,
            expected_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            fallback_urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    /// First expected keyword found in `text`, if any
    pub fn matched_keyword(&self, text: &str) -> Option<&str> {
        let haystack = normalize_text(text);
        self.expected_keywords
            .iter()
            .find(|k| haystack.contains(&normalize_text(k)))
            .map(String::as_str)
    }
}

const CAT_KEYWORDS: &[&str] = &["gato", "felino", "cat", "kitten", "gatito"];
const DOG_KEYWORDS: &[&str] = &["perro", "dog", "puppy", "cachorro", "canino"];

const CAT_URLS: &[&str] = &[
    "https://upload.wikimedia.org/wikipedia/commons/thumb/3/3a/Cat03.jpg/640px-Cat03.jpg",
    "https://cataas.com/cat?width=640",
];
const DOG_URLS: &[&str] = &[
    "https://upload.wikimedia.org/wikipedia/commons/thumb/2/26/YellowLabradorLooking_new.jpg/640px-YellowLabradorLooking_new.jpg",
    "https://placedog.net/640/480",
];

/// Five neutral samples under `samples_dir`: cats and dogs interleaved
pub fn default_catalog(samples_dir: &Path) -> Vec<SmokeCase> {
    let cat = |n: usize| {
        SmokeCase::new(
            &format!("sample_{:02}", n),
            "cat",
            samples_dir.join(format!("sample_{:02}.jpg", n)),
            CAT_KEYWORDS,
            CAT_URLS,
        )
    };
    let dog = |n: usize| {
        SmokeCase::new(
            &format!("sample_{:02}", n),
            "dog",
            samples_dir.join(format!("sample_{:02}.jpg", n)),
            DOG_KEYWORDS,
            DOG_URLS,
        )
    };
    vec![cat(1), dog(2), cat(3), dog(4), cat(5)]
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Lowercase and strip common Latin diacritics
pub fn normalize_text(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).map(fold_char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_case_and_accents() {
        assert_eq!(normalize_text("GatÓ PERRÓ"), "gato perro");
        assert_eq!(normalize_text("Cañón"), "canon");
    }

    #[test]
    fn test_any_keyword_matches() {
        let case = SmokeCase::new("s", "cat", PathBuf::from("s.jpg"), &["gato", "cat"], &[]);
        assert_eq!(case.matched_keyword("Se observa un GATO naranja"), Some("gato"));
        assert_eq!(case.matched_keyword("A small Cat."), Some("cat"));
        assert_eq!(case.matched_keyword("Un pequeño gató"), Some("gato"));
        assert!(case.matched_keyword("Un perro grande").is_none());
    }

    #[test]
    fn test_catalog_shape() {
        let cases = default_catalog(Path::new("data/samples"));
        assert_eq!(cases.len(), 5);
        assert!(cases.iter().filter(|c| c.label == "cat").count() >= 2);
        assert!(cases.iter().filter(|c| c.label == "dog").count() >= 2);
        assert!(cases.iter().all(|c| !c.fallback_urls.is_empty()));
        assert_eq!(cases[0].path, PathBuf::from("data/samples/sample_01.jpg"));
    }

    #[test]
    fn test_matched_keyword() {
        let case = &default_catalog(Path::new("s"))[1];
        assert_eq!(case.matched_keyword("Un cachorro juguetón"), Some("cachorro"));
        assert_eq!(case.matched_keyword("nothing here"), None);
    }
}
